//! Transcript normalization
//!
//! Splits the transcript into tokens, converts German number words to digits
//! and marks dosage and clock tokens so the pain scanner never reads them as
//! intensities. Every later stage works on the same token indices, which is
//! what lets the notes cleaner remove exactly what was consumed.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::text::{fold, trim_punctuation};
use crate::vocab::is_dose_unit;

/// Index range into [`NormalizedUtterance::tokens`]
pub type TokenSpan = Range<usize>;

static CLOCK_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}:\d{2}$").expect("clock token pattern"));

static FUSED_DOSE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(?:[.,]\d+)?(?:mg|g|µg|mcg|ml)$").expect("fused dose pattern")
});

/// Opaque placeholder class for masked tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mask {
    Dose,
    Clock,
}

impl Mask {
    pub fn placeholder(self) -> &'static str {
        match self {
            Self::Dose => "<dose>",
            Self::Clock => "<clock>",
        }
    }
}

/// A word of the transcript in its three forms
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub index: usize,
    /// Surface form with edge punctuation removed, original casing
    pub raw: String,
    /// Lowercased, number words replaced by digits
    pub text: String,
    /// Folded form of `text`
    pub folded: String,
    /// Byte range of `text` inside [`NormalizedUtterance::text`]
    pub start: usize,
    pub end: usize,
    pub mask: Option<Mask>,
    /// The word ended a clause (",", ".", ";", a dash) in the transcript
    pub break_after: bool,
}

impl Token {
    /// Text as seen by the intensity scanner
    pub fn masked(&self) -> &str {
        match self.mask {
            Some(mask) => mask.placeholder(),
            None => &self.text,
        }
    }
}

/// Tokenized, lowercased transcript
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedUtterance {
    /// Token texts joined by single spaces
    pub text: String,
    pub tokens: Vec<Token>,
}

impl NormalizedUtterance {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn token(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index)
    }

    /// Tokens overlapping a byte range of `text`
    pub fn span_for_bytes(&self, start: usize, end: usize) -> TokenSpan {
        let first = self
            .tokens
            .iter()
            .position(|t| t.end > start)
            .unwrap_or(self.tokens.len());
        let last = self
            .tokens
            .iter()
            .rposition(|t| t.start < end)
            .map_or(first, |i| i + 1);
        first..last.max(first)
    }

    /// Surface text of a token span
    pub fn raw_phrase(&self, span: &TokenSpan) -> String {
        self.tokens
            .get(span.clone())
            .unwrap_or_default()
            .iter()
            .map(|t| t.raw.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Folded tokens joined without separators, for merged-token lookups
    pub fn folded_concat(&self, span: &TokenSpan) -> String {
        self.tokens
            .get(span.clone())
            .unwrap_or_default()
            .iter()
            .map(|t| t.folded.as_str())
            .collect()
    }
}

/// Normalize a transcript into tokens
pub fn normalize(transcript: &str) -> NormalizedUtterance {
    let mut tokens: Vec<Token> = Vec::new();
    let mut text = String::with_capacity(transcript.len());

    for word in transcript.split_whitespace() {
        let raw = trim_punctuation(word);
        if raw.is_empty() {
            // a lone dash or ellipsis separates clauses like a comma
            if let Some(last) = tokens.last_mut() {
                last.break_after = true;
            }
            continue;
        }
        let lower = raw.to_lowercase();
        let normalized = number_word_value(&lower).map_or(lower, |n| n.to_string());
        let folded = fold(&normalized);
        if folded.is_empty() && !normalized.contains(['/', ':']) {
            if let Some(last) = tokens.last_mut() {
                last.break_after = true;
            }
            continue;
        }

        if !text.is_empty() {
            text.push(' ');
        }
        let start = text.len();
        text.push_str(&normalized);

        tokens.push(Token {
            index: tokens.len(),
            raw: raw.to_string(),
            text: normalized,
            folded,
            start,
            end: text.len(),
            mask: None,
            break_after: ends_clause(word),
        });
    }

    apply_masks(&mut tokens);

    NormalizedUtterance { text, tokens }
}

/// Trailing ",", ".", ";", ":", "!", "?" or a dash after the last letter or digit
fn ends_clause(word: &str) -> bool {
    word.chars()
        .rev()
        .take_while(|c| !c.is_alphanumeric())
        .any(|c| matches!(c, ',' | '.' | ';' | ':' | '!' | '?' | '-' | '–' | '—' | '…'))
}

/// Mark "400 mg", "400mg" and "20:30" so they cannot compete as intensities
fn apply_masks(tokens: &mut [Token]) {
    for i in 0..tokens.len() {
        if CLOCK_TOKEN.is_match(&tokens[i].text) {
            tokens[i].mask = Some(Mask::Clock);
            continue;
        }
        if FUSED_DOSE_TOKEN.is_match(&tokens[i].text) {
            tokens[i].mask = Some(Mask::Dose);
            continue;
        }
        let is_numeric = tokens[i]
            .text
            .chars()
            .all(|c| c.is_ascii_digit() || c == ',' || c == '.');
        if is_numeric
            && tokens
                .get(i + 1)
                .is_some_and(|next| is_dose_unit(&next.folded))
        {
            tokens[i].mask = Some(Mask::Dose);
            tokens[i + 1].mask = Some(Mask::Dose);
        }
    }
}

//=============================================================================
// Number words
//=============================================================================

const UNITS: &[(&str, u32)] = &[
    ("null", 0),
    ("eins", 1),
    ("ein", 1),
    ("zwei", 2),
    ("zwo", 2),
    ("drei", 3),
    ("vier", 4),
    ("fuenf", 5),
    ("sechs", 6),
    ("sieben", 7),
    ("acht", 8),
    ("neun", 9),
    ("zehn", 10),
    ("elf", 11),
    ("zwoelf", 12),
    ("dreizehn", 13),
    ("vierzehn", 14),
    ("fuenfzehn", 15),
    ("sechzehn", 16),
    ("siebzehn", 17),
    ("achtzehn", 18),
    ("neunzehn", 19),
];

const TENS: &[(&str, u32)] = &[
    ("zwanzig", 20),
    ("dreissig", 30),
    ("vierzig", 40),
    ("fuenfzig", 50),
    ("sechzig", 60),
    ("siebzig", 70),
    ("achtzig", 80),
    ("neunzig", 90),
];

/// Articles that look like number words but are left alone
const ARTICLE_FORMS: &[&str] = &["ein", "eine", "einen", "einer", "einem", "eines"];

fn lookup(table: &[(&str, u32)], word: &str) -> Option<u32> {
    table.iter().find(|(name, _)| *name == word).map(|(_, v)| *v)
}

fn below_hundred(word: &str) -> Option<u32> {
    if word.is_empty() {
        return Some(0);
    }
    if let Some(v) = lookup(UNITS, word).or_else(|| lookup(TENS, word)) {
        return Some(v);
    }
    // einundzwanzig, fuenfundvierzig
    let (unit, tens) = word.split_once("und")?;
    let unit = lookup(UNITS, unit).filter(|v| (1..=9).contains(v))?;
    let tens = lookup(TENS, tens)?;
    Some(tens + unit)
}

/// Value of a whole-word German number ("zwölf", "vierhundert")
pub fn number_word_value(word: &str) -> Option<u32> {
    let folded = fold(word);
    if folded.is_empty() || ARTICLE_FORMS.contains(&folded.as_str()) {
        return None;
    }

    if let Some(pos) = folded.find("hundert") {
        let head = &folded[..pos];
        let tail = &folded[pos + "hundert".len()..];
        let hundreds = if head.is_empty() {
            1
        } else {
            lookup(UNITS, head).filter(|v| (1..=9).contains(v))?
        };
        return Some(hundreds * 100 + below_hundred(tail)?);
    }

    if folded == "und" {
        return None;
    }
    below_hundred(&folded)
}
