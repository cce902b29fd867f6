//! Pain intensity extraction
//!
//! A cascade of strategies from most to least explicit. Every strategy works
//! on the masked token stream and skips numbers owned by the time extractor or
//! attached to a time, dose or quantity word, so "vor 10 Minuten Schmerz 5"
//! yields 5 and never 10.

use strsim::levenshtein;
use tracing::debug;

use crate::config::ParserConfig;
use crate::normalizer::{NormalizedUtterance, TokenSpan};
use crate::text::{in_list, parse_number};
use crate::types::ParsedPainIntensity;
use crate::vocab::{is_pain_context, is_unit_word};

/// Known trigger keywords, folded
const TRIGGERS: &[&str] = &[
    "schmerzstaerke",
    "schmerzlautstaerke",
    "schmerzlevel",
    "schmerzskala",
    "schmerzintensitaet",
    "schmerzwert",
    "schmerzgrad",
    "intensitaet",
    "lautstaerke",
    "skala",
    "skalenwert",
];

/// Stems compared by edit distance to catch misrecognised triggers
const TRIGGER_STEMS: &[&str] = &[
    "schmerz",
    "schmerzen",
    "schmerzstaerke",
    "schmerzlautstaerke",
    "schmerzlevel",
    "schmerzskala",
    "intensitaet",
    "lautstaerke",
];

const STRENGTH_WORDS: &[&str] = &["staerke", "stufe", "level"];

const SCALE_PREPOSITIONS: &[&str] = &["von", "auf", "aus"];

const CONTEXT_PREPOSITIONS: &[&str] = &["bei", "auf"];

/// Words before a number that make it a clock or a duration
const TIME_PREPOSITIONS: &[&str] = &["um", "vor", "seit", "gegen", "ab"];

/// Two-word descriptors, checked before single words
const DESCRIPTOR_PHRASES: &[(&str, &str, u8)] = &[
    ("keine", "schmerzen", 0),
    ("kein", "schmerz", 0),
    ("ganz", "leicht", 1),
    ("ganz", "leichte", 1),
    ("sehr", "leicht", 1),
    ("sehr", "leichte", 1),
    ("mittel", "stark", 5),
    ("mittel", "starke", 5),
    ("sehr", "stark", 9),
    ("sehr", "starke", 9),
    ("sehr", "starken", 9),
    ("sehr", "heftig", 9),
    ("sehr", "heftige", 9),
];

/// Descriptor words with their representative level:
/// none=0, minimal=1, mild=3, moderate=5, severe=7, extreme=9
const DESCRIPTORS: &[(&str, u8)] = &[
    ("schmerzfrei", 0),
    ("kaum", 1),
    ("minimal", 1),
    ("minimale", 1),
    ("winzig", 1),
    ("leicht", 3),
    ("leichte", 3),
    ("leichten", 3),
    ("leichter", 3),
    ("mild", 3),
    ("milde", 3),
    ("schwach", 3),
    ("schwache", 3),
    ("mittel", 5),
    ("mittlere", 5),
    ("mittleren", 5),
    ("mittelstark", 5),
    ("mittelstarke", 5),
    ("maessig", 5),
    ("maessige", 5),
    ("moderat", 5),
    ("moderate", 5),
    ("stark", 7),
    ("starke", 7),
    ("starken", 7),
    ("starker", 7),
    ("heftig", 7),
    ("heftige", 7),
    ("heftigen", 7),
    ("schlimm", 7),
    ("schlimme", 7),
    ("schlimmen", 7),
    ("massiv", 7),
    ("massive", 7),
    ("extrem", 9),
    ("extreme", 9),
    ("extremen", 9),
    ("unertraeglich", 9),
    ("unertraegliche", 9),
    ("unertraeglichen", 9),
    ("hoellisch", 9),
    ("hoellische", 9),
    ("maximal", 9),
    ("brutal", 9),
    ("brutale", 9),
    ("vernichtend", 9),
    ("vernichtende", 9),
];

/// Extracted pain plus the tokens used as evidence
#[derive(Debug, Clone, PartialEq)]
pub struct PainExtraction {
    pub pain: ParsedPainIntensity,
    pub spans: Vec<TokenSpan>,
}

impl PainExtraction {
    fn none() -> Self {
        Self {
            pain: ParsedPainIntensity::none(),
            spans: Vec::new(),
        }
    }
}

/// Raw strategy result before confidences are applied
struct PainHit {
    value: u8,
    spans: Vec<TokenSpan>,
    tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Scale,
    Trigger,
    Strength,
    ContextNumber,
    Descriptor,
    Standalone,
}

impl Tier {
    fn confidence(self, config: &ParserConfig) -> f32 {
        match self {
            Self::Scale => config.pain_scale_confidence,
            Self::Trigger => config.pain_trigger_confidence,
            Self::Strength => config.pain_strength_confidence,
            Self::ContextNumber => config.pain_context_number_confidence,
            Self::Descriptor => config.pain_descriptor_confidence,
            Self::Standalone => config.pain_standalone_confidence,
        }
    }
}

struct PainContext<'a> {
    utterance: &'a NormalizedUtterance,
    reserved: &'a [TokenSpan],
    /// Medication mention spans
    mentions: &'a [TokenSpan],
    config: &'a ParserConfig,
    has_pain_context: bool,
}

type PainStrategy = fn(&PainContext) -> Option<PainHit>;

const STRATEGIES: &[PainStrategy] = &[
    explicit_scale,
    trigger_keyword,
    strength_word,
    context_preposition,
    descriptor,
    standalone_number,
];

/// Extract the pain intensity, avoiding tokens in `reserved` (time and
/// medication spans) and numbers attached to a medication mention
pub fn extract_pain(
    utterance: &NormalizedUtterance,
    reserved: &[TokenSpan],
    mentions: &[TokenSpan],
    config: &ParserConfig,
) -> PainExtraction {
    let has_pain_context = utterance
        .tokens
        .iter()
        .any(|t| is_pain_context(&t.folded));
    let ctx = PainContext {
        utterance,
        reserved,
        mentions,
        config,
        has_pain_context,
    };

    let Some(mut hit) = STRATEGIES.iter().find_map(|strategy| strategy(&ctx)) else {
        return PainExtraction::none();
    };

    hit.spans.sort_by_key(|s| s.start);
    let confidence = hit.tier.confidence(config);
    let phrase = hit
        .spans
        .iter()
        .map(|s| utterance.raw_phrase(s))
        .collect::<Vec<_>>()
        .join(" ");

    debug!(
        "Pain {} from {:?} tier (confidence {:.2}): '{}'",
        hit.value, hit.tier, confidence, phrase
    );

    PainExtraction {
        pain: ParsedPainIntensity {
            value: Some(hit.value),
            confidence,
            phrase,
            needs_review: confidence < config.pain_review_below,
            estimated_from_descriptor: hit.tier == Tier::Descriptor,
        },
        spans: hit.spans,
    }
}

/// Whether a folded token is a pain-intensity trigger keyword, tolerating one
/// or two misrecognised characters
pub fn is_pain_trigger(folded: &str) -> bool {
    if folded.contains("schmerz") || in_list(TRIGGERS, folded) {
        return true;
    }
    if folded.chars().count() < 5 {
        return false;
    }
    TRIGGER_STEMS.iter().any(|stem| {
        let max_distance = if stem.len() >= 8 { 2 } else { 1 };
        levenshtein(folded, stem) <= max_distance
    })
}

/// Trigger keywords plus the bare strength words ("Stärke", "Stufe")
pub fn is_intensity_keyword(folded: &str) -> bool {
    in_list(STRENGTH_WORDS, folded) || is_pain_trigger(folded)
}

fn is_reserved(ctx: &PainContext, index: usize) -> bool {
    ctx.reserved.iter().any(|span| span.contains(&index))
}

/// A number glued to a medication mention: "Rizatriptan 10", "zwei
/// Ibuprofen". An intensity keyword right before the number keeps it
/// ("Stärke 2 Ibuprofen").
fn beside_mention(ctx: &PainContext, index: usize) -> bool {
    let unbroken = |i: usize| ctx.utterance.token(i).is_some_and(|t| !t.break_after);
    let after_mention = index > 0
        && unbroken(index - 1)
        && ctx.mentions.iter().any(|m| m.end == index);
    let before_mention = unbroken(index)
        && ctx.mentions.iter().any(|m| m.start == index + 1)
        && !index
            .checked_sub(1)
            .and_then(|p| ctx.utterance.token(p))
            .is_some_and(|prev| !prev.break_after && is_intensity_keyword(&prev.folded));
    after_mention || before_mention
}

/// Intensity value at `index` if that token is a number free to be one
fn free_intensity(ctx: &PainContext, index: usize) -> Option<u8> {
    let token = ctx.utterance.token(index)?;
    if token.mask.is_some() || is_reserved(ctx, index) || beside_mention(ctx, index) {
        return None;
    }
    let value = parse_number(&token.text)?;
    if !(0.0..=10.0).contains(&value) {
        return None;
    }
    if ctx
        .utterance
        .token(index + 1)
        .is_some_and(|next| is_unit_word(&next.folded))
    {
        return None;
    }
    if index > 0
        && ctx
            .utterance
            .token(index - 1)
            .is_some_and(|prev| in_list(TIME_PREPOSITIONS, &prev.folded))
    {
        return None;
    }
    Some(value.round() as u8)
}

// ========== Strategies ==========

/// "8 von 10", "8/10"
fn explicit_scale(ctx: &PainContext) -> Option<PainHit> {
    let tokens = &ctx.utterance.tokens;
    for (i, token) in tokens.iter().enumerate() {
        if is_reserved(ctx, i) {
            continue;
        }
        if let Some((value, "10")) = token.text.split_once('/')
            && let Some(v) = parse_number(value).filter(|v| (0.0..=10.0).contains(v))
        {
            return Some(PainHit {
                value: v.round() as u8,
                spans: vec![i..i + 1],
                tier: Tier::Scale,
            });
        }

        let is_scale = tokens
            .get(i + 1)
            .is_some_and(|t| in_list(SCALE_PREPOSITIONS, &t.folded))
            && tokens.get(i + 2).is_some_and(|t| t.text == "10");
        if is_scale
            && token.mask.is_none()
            && let Some(v) = parse_number(&token.text).filter(|v| (0.0..=10.0).contains(v))
        {
            return Some(PainHit {
                value: v.round() as u8,
                spans: vec![i..i + 3],
                tier: Tier::Scale,
            });
        }
    }
    None
}

/// Trigger keyword with the nearest free number after it, else before it
fn trigger_keyword(ctx: &PainContext) -> Option<PainHit> {
    let tokens = &ctx.utterance.tokens;
    for (i, token) in tokens.iter().enumerate() {
        if !is_pain_trigger(&token.folded) {
            continue;
        }
        let last = i
            .saturating_add(ctx.config.trigger_window_after)
            .min(tokens.len());
        let after = (i + 1..=last)
            .find_map(|j| free_intensity(ctx, j).map(|v| (j, v)));
        let before = || {
            (i.saturating_sub(ctx.config.trigger_window_before)..i)
                .rev()
                .find_map(|j| free_intensity(ctx, j).map(|v| (j, v)))
        };
        if let Some((j, value)) = after.or_else(before) {
            return Some(PainHit {
                value,
                spans: vec![i..i + 1, j..j + 1],
                tier: Tier::Trigger,
            });
        }
    }
    None
}

/// "Stärke 6", "Stufe 6"
fn strength_word(ctx: &PainContext) -> Option<PainHit> {
    ctx.utterance.tokens.iter().enumerate().find_map(|(i, token)| {
        if !in_list(STRENGTH_WORDS, &token.folded) {
            return None;
        }
        let value = free_intensity(ctx, i + 1)?;
        Some(PainHit {
            value,
            spans: vec![i..i + 2],
            tier: Tier::Strength,
        })
    })
}

/// "bei 6" / "auf 6" when the utterance talks about pain elsewhere
fn context_preposition(ctx: &PainContext) -> Option<PainHit> {
    if !ctx.has_pain_context {
        return None;
    }
    ctx.utterance.tokens.iter().enumerate().find_map(|(i, token)| {
        if !in_list(CONTEXT_PREPOSITIONS, &token.folded) {
            return None;
        }
        let value = free_intensity(ctx, i + 1)?;
        Some(PainHit {
            value,
            spans: vec![i..i + 2],
            tier: Tier::ContextNumber,
        })
    })
}

/// "starke Kopfschmerzen" → 7
fn descriptor(ctx: &PainContext) -> Option<PainHit> {
    if !ctx.has_pain_context {
        return None;
    }
    let tokens = &ctx.utterance.tokens;
    for (i, token) in tokens.iter().enumerate() {
        if let Some(next) = tokens.get(i + 1)
            && let Some((_, _, value)) = DESCRIPTOR_PHRASES
                .iter()
                .find(|(a, b, _)| *a == token.folded && *b == next.folded)
        {
            return Some(PainHit {
                value: *value,
                spans: vec![i..i + 2],
                tier: Tier::Descriptor,
            });
        }
        if let Some((_, value)) = DESCRIPTORS.iter().find(|(word, _)| *word == token.folded) {
            return Some(PainHit {
                value: *value,
                spans: vec![i..i + 1],
                tier: Tier::Descriptor,
            });
        }
    }
    None
}

/// Bare number right next to pain vocabulary
fn standalone_number(ctx: &PainContext) -> Option<PainHit> {
    let tokens = &ctx.utterance.tokens;
    (0..tokens.len()).find_map(|i| {
        let value = free_intensity(ctx, i)?;
        let near_pain = [i.checked_sub(1), Some(i + 1)]
            .into_iter()
            .flatten()
            .filter_map(|j| tokens.get(j))
            .any(|t| is_pain_context(&t.folded));
        near_pain.then(|| PainHit {
            value,
            spans: vec![i..i + 1],
            tier: Tier::Standalone,
        })
    })
}
