//! Medication mention matching
//!
//! Scans the token stream left to right and tries, at every position, the
//! single token, merged neighbours ("Ibu profen") and finally a unique
//! prefix. Hits are checked for negation, deduplicated by canonical name and
//! given a dose from the surrounding quantity phrase.

use strsim::{jaro_winkler, levenshtein};
use tracing::debug;

use crate::config::ParserConfig;
use crate::lexicon::MedicationLexicon;
use crate::normalizer::{Mask, NormalizedUtterance, TokenSpan};
use crate::pain::is_intensity_keyword;
use crate::text::{fold, in_list, parse_int, parse_number};
use crate::types::{DEFAULT_DOSE_QUARTERS, MatchKind, MedicationMatch, ParsedMedication};
use crate::vocab::{
    QUANTITY_WORDS, is_dose_unit, is_intake_verb, is_negation, is_pain_context,
    is_quantity_noun, is_unit_word,
};

/// Fuzzy matches never claim exact-level confidence
const MAX_FUZZY_CONFIDENCE: f32 = 0.95;

/// Variants shorter than this only match exactly ("ibu", "zolmi")
const MIN_FUZZY_VARIANT_LEN: usize = 6;

/// Registered base names ("Vomex") stay fuzzy down to this length
const MIN_FUZZY_BASE_LEN: usize = 5;

/// Jaro-Winkler needed for a prefix hit without medication context
const PREFIX_MIN_SIMILARITY: f32 = 0.75;

/// Longest run of tokens merged for split-token recovery
const MAX_MERGED_TOKENS: usize = 3;

/// Numbers after a mention checked against entry strengths
const STRENGTH_LOOKAHEAD: usize = 2;

/// Doses above this are kept but flagged for review
const MAX_DOSE_QUARTERS: u8 = 16;

/// Largest bare count read as tablets ("zwei Ibuprofen")
const MAX_BARE_COUNT: u32 = 4;

const SCALE_PREPOSITIONS: &[&str] = &["von", "auf", "aus"];

/// Function words and frequent false positives that never start a mention
const SKIP_WORDS: &[&str] = &[
    "und", "oder", "aber", "mit", "eine", "einer", "einen", "einem", "eines", "der", "die",
    "das", "den", "dem", "des", "ich", "habe", "hab", "hatte", "heute", "gestern", "morgen",
    "abend", "abends", "mittag", "nacht", "nachts", "jetzt", "gerade", "noch", "dann", "bitte",
    "etwas", "wieder", "sehr", "stark", "starke", "leicht", "leichte", "mittel", "stress",
    "schlaf", "wetter", "kaffee", "wasser", "essen", "trigger", "notiz", "eintrag", "halb",
    "halbe", "viertel", "dreiviertel", "anderthalb", "mein", "meine", "meinen", "seit", "nach",
    "eben", "schon", "auch", "nur", "wenig", "viel",
];

/// Common migraine and analgesic drugs recognised without registration
const KNOWN_DRUGS: &[(&str, &str)] = &[
    ("ibuprofen", "Ibuprofen"),
    ("ibu", "Ibuprofen"),
    ("paracetamol", "Paracetamol"),
    ("aspirin", "Aspirin"),
    ("ass", "ASS"),
    ("sumatriptan", "Sumatriptan"),
    ("rizatriptan", "Rizatriptan"),
    ("zolmitriptan", "Zolmitriptan"),
    ("naratriptan", "Naratriptan"),
    ("almotriptan", "Almotriptan"),
    ("eletriptan", "Eletriptan"),
    ("frovatriptan", "Frovatriptan"),
    ("naproxen", "Naproxen"),
    ("diclofenac", "Diclofenac"),
    ("metamizol", "Metamizol"),
    ("novalgin", "Novalgin"),
    ("thomapyrin", "Thomapyrin"),
    ("metoclopramid", "Metoclopramid"),
    ("mcp", "MCP"),
    ("domperidon", "Domperidon"),
    ("dimenhydrinat", "Dimenhydrinat"),
    ("vomex", "Vomex"),
    ("maxalt", "Maxalt"),
    ("imigran", "Imigran"),
    ("ascotop", "AscoTop"),
    ("relpax", "Relpax"),
    ("formigran", "Formigran"),
];

/// Medications found in one utterance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MedicationExtraction {
    pub medications: Vec<ParsedMedication>,
    /// Every token consumed: mentions, duplicate mentions, strengths, doses
    pub spans: Vec<TokenSpan>,
    /// Mention spans only, including duplicates
    pub mentions: Vec<TokenSpan>,
}

/// A lexicon hit before it becomes a [`MedicationMatch`]
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    entry: usize,
    confidence: f32,
    kind: MatchKind,
    alternatives: Vec<usize>,
}

impl Candidate {
    fn is_uncertain(&self) -> bool {
        self.kind == MatchKind::Prefix || !self.alternatives.is_empty()
    }
}

#[derive(Debug, Clone)]
enum MentionSource {
    Registered(Candidate),
    Unregistered(&'static str),
}

#[derive(Debug, Clone)]
struct Mention {
    span: TokenSpan,
    source: MentionSource,
}

impl Mention {
    fn name(&self, lexicon: &MedicationLexicon) -> Option<String> {
        match &self.source {
            MentionSource::Registered(c) => lexicon.entry(c.entry).map(|e| e.canonical_name.clone()),
            MentionSource::Unregistered(name) => Some((*name).to_string()),
        }
    }
}

struct MatchContext<'a> {
    utterance: &'a NormalizedUtterance,
    lexicon: &'a MedicationLexicon,
    reserved: &'a [TokenSpan],
    config: &'a ParserConfig,
}

impl MatchContext<'_> {
    fn is_reserved(&self, index: usize) -> bool {
        self.reserved.iter().any(|span| span.contains(&index))
    }

    /// Whether the token at `index` may be part of a mention
    fn is_candidate(&self, index: usize) -> bool {
        let Some(token) = self.utterance.token(index) else {
            return false;
        };
        let folded = token.folded.as_str();
        token.mask.is_none()
            && !self.is_reserved(index)
            && folded.chars().count() >= 3
            && !folded.chars().all(|c| c.is_ascii_digit())
            && !in_list(SKIP_WORDS, folded)
            && !is_negation(folded)
            && !is_pain_context(folded)
            && !is_unit_word(folded)
            && !is_intake_verb(folded)
    }

    /// Dose units, intake verbs or quantity words near `index`
    fn has_medication_context(&self, index: usize) -> bool {
        let window = self.config.medication_context_window;
        let lo = index.saturating_sub(window);
        let hi = index
            .saturating_add(window)
            .saturating_add(1)
            .min(self.utterance.len());
        (lo..hi).filter(|&j| j != index).any(|j| {
            self.utterance.token(j).is_some_and(|t| {
                t.mask == Some(Mask::Dose)
                    || is_dose_unit(&t.folded)
                    || is_intake_verb(&t.folded)
                    || is_quantity_noun(&t.folded)
                    || in_list(QUANTITY_WORDS, &t.folded)
            })
        })
    }

    /// A negation governs the mention when no pain word sits in between
    fn is_negated(&self, span: &TokenSpan) -> bool {
        let lo = span.start.saturating_sub(self.config.negation_window);
        (lo..span.start).rev().any(|j| {
            self.utterance
                .token(j)
                .is_some_and(|t| is_negation(&t.folded))
                && (j + 1..span.start).all(|k| {
                    self.utterance
                        .token(k)
                        .is_some_and(|t| !is_pain_context(&t.folded))
                })
        })
    }
}

/// Extract medication intakes. Tokens in `reserved` (time phrases) are never
/// part of a mention or dose.
pub fn extract_medications(
    utterance: &NormalizedUtterance,
    lexicon: &MedicationLexicon,
    reserved: &[TokenSpan],
    config: &ParserConfig,
) -> MedicationExtraction {
    let ctx = MatchContext {
        utterance,
        lexicon,
        reserved,
        config,
    };

    let mut mentions: Vec<Mention> = Vec::new();
    let mut i = 0;
    while i < utterance.len() {
        let Some(mut mention) = find_mention(&ctx, i) else {
            i += 1;
            continue;
        };
        i = mention.span.end;

        if ctx.is_negated(&mention.span) {
            debug!(
                "Discarding negated medication mention '{}'",
                utterance.raw_phrase(&mention.span)
            );
            continue;
        }
        if let MentionSource::Registered(candidate) = &mut mention.source {
            resolve_strength(&ctx, candidate, mention.span.end);
        }
        mentions.push(mention);
    }

    let mut extraction = MedicationExtraction::default();
    for (k, mention) in mentions.iter().enumerate() {
        extraction.mentions.push(mention.span.clone());
        extraction.spans.push(mention.span.clone());
        if let Some(strength) = strength_span(&ctx, &mention.span) {
            extraction.spans.push(strength);
        }

        let Some(name) = mention.name(lexicon) else {
            continue;
        };
        if extraction.medications.iter().any(|m| m.name == name) {
            debug!("Duplicate mention of '{}' ignored", name);
            continue;
        }

        let lower = k.checked_sub(1).map_or(0, |p| mentions[p].span.end);
        let upper = mentions
            .get(k + 1)
            .map_or(utterance.len(), |next| next.span.start);
        let dose = find_dose(&ctx, &mention.span, lower, upper);
        if let Some(dose) = &dose {
            extraction.spans.push(dose.span.clone());
        }

        let medication = match &mention.source {
            MentionSource::Registered(candidate) => {
                registered_medication(&ctx, candidate, name, dose.as_ref())
            }
            MentionSource::Unregistered(_) => ParsedMedication {
                name,
                medication_id: None,
                is_registered: false,
                dose_quarters: dose.as_ref().map_or(DEFAULT_DOSE_QUARTERS, |d| d.quarters),
                dose_text: dose.as_ref().map(|d| utterance.raw_phrase(&d.span)),
                confidence: config.medication_unregistered_confidence,
                needs_review: true,
                matched: None,
            },
        };

        debug!(
            "Medication '{}' ({} quarters, confidence {:.2})",
            medication.name, medication.dose_quarters, medication.confidence
        );
        extraction.medications.push(medication);
    }

    extraction
}

fn registered_medication(
    ctx: &MatchContext,
    candidate: &Candidate,
    name: String,
    dose: Option<&DosePhrase>,
) -> ParsedMedication {
    let medication_id = ctx
        .lexicon
        .entry(candidate.entry)
        .and_then(|e| e.medication_id.clone());
    let alternatives = candidate
        .alternatives
        .iter()
        .filter_map(|&idx| ctx.lexicon.entry(idx))
        .map(|e| e.canonical_name.clone())
        .collect();
    let is_uncertain = candidate.is_uncertain();

    ParsedMedication {
        name: name.clone(),
        medication_id: medication_id.clone(),
        is_registered: true,
        dose_quarters: dose.map_or(DEFAULT_DOSE_QUARTERS, |d| d.quarters),
        dose_text: dose.map(|d| ctx.utterance.raw_phrase(&d.span)),
        confidence: candidate.confidence,
        needs_review: is_uncertain
            || candidate.confidence < ctx.config.medication_review_below
            || dose.is_some_and(DosePhrase::is_unusual),
        matched: Some(MedicationMatch {
            canonical_name: name,
            medication_id,
            confidence: candidate.confidence,
            kind: candidate.kind,
            is_uncertain,
            alternatives,
        }),
    }
}

// ========== Matching ==========

fn find_mention(ctx: &MatchContext, i: usize) -> Option<Mention> {
    if !ctx.is_candidate(i) {
        return None;
    }
    let token = ctx.utterance.token(i)?;
    let has_context = ctx.has_medication_context(i);

    let single = match_phrase(ctx.lexicon, &token.folded, has_context, ctx.config);
    let merged = merged_match(ctx, i, has_context);

    let best = match (single, merged) {
        (Some(s), Some((span, m)))
            if m.confidence > s.confidence
                || (m.confidence >= s.confidence && m.entry == s.entry) =>
        {
            Some((span, m))
        }
        (Some(s), _) => Some((i..i + 1, s)),
        (None, merged) => merged,
    }
    .or_else(|| {
        prefix_match(ctx.lexicon, &token.folded, has_context, ctx.config).map(|c| (i..i + 1, c))
    });

    if let Some((span, candidate)) = best {
        debug!(
            "Matched '{}' as {:?} (confidence {:.2})",
            ctx.utterance.raw_phrase(&span),
            candidate.kind,
            candidate.confidence
        );
        return Some(Mention {
            span,
            source: MentionSource::Registered(candidate),
        });
    }

    KNOWN_DRUGS
        .iter()
        .find(|(folded, _)| *folded == token.folded)
        .map(|(_, display)| Mention {
            span: i..i + 1,
            source: MentionSource::Unregistered(*display),
        })
}

/// Exact lookup, then similarity over all variants
fn match_phrase(
    lexicon: &MedicationLexicon,
    folded: &str,
    has_context: bool,
    config: &ParserConfig,
) -> Option<Candidate> {
    if let Some((&first, rest)) = lexicon.exact_candidates(folded).split_first() {
        return Some(Candidate {
            entry: first,
            confidence: config.medication_exact_confidence,
            kind: MatchKind::Exact,
            alternatives: rest.to_vec(),
        });
    }
    if folded.chars().count() < config.medication_fuzzy_min_len {
        return None;
    }

    let mut scored: Vec<(usize, f32)> = lexicon
        .entries()
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| {
            let base = fold(&entry.base_name);
            entry
                .variants
                .iter()
                .filter(|v| {
                    let len = v.chars().count();
                    len >= MIN_FUZZY_VARIANT_LEN || (**v == base && len >= MIN_FUZZY_BASE_LEN)
                })
                .map(|v| similarity(folded, v))
                .max_by(f32::total_cmp)
                .map(|score| (idx, score))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let threshold = if has_context {
        config.medication_fuzzy_threshold_with_context
    } else {
        config.medication_fuzzy_threshold
    };
    let &(best, best_score) = scored.first()?;
    if best_score < threshold {
        return None;
    }

    let alternatives = scored[1..]
        .iter()
        .filter(|(_, score)| best_score - score < config.medication_ambiguity_delta)
        .map(|(idx, _)| *idx)
        .collect();

    Some(Candidate {
        entry: best,
        confidence: best_score.min(MAX_FUZZY_CONFIDENCE),
        kind: MatchKind::Fuzzy,
        alternatives,
    })
}

/// Jaro-Winkler, corroborated by edit distance for tokens of five or more
/// characters
pub fn similarity(token: &str, variant: &str) -> f32 {
    let jw = jaro_winkler(token, variant) as f32;
    let len = token.chars().count();
    if len < MIN_FUZZY_BASE_LEN {
        return jw;
    }
    let distance = levenshtein(token, variant);
    let bound = (len / 4).max(1);
    if distance <= bound {
        jw.max(1.0 - 0.05 * distance as f32)
    } else {
        jw - 0.1
    }
}

/// Best match over 2-3 merged tokens ("suma triptan")
fn merged_match(ctx: &MatchContext, i: usize, has_context: bool) -> Option<(TokenSpan, Candidate)> {
    let mut best: Option<(TokenSpan, Candidate)> = None;
    for len in 2..=MAX_MERGED_TOKENS {
        let span = i..i + len;
        if span.end > ctx.utterance.len() || !span.clone().all(|j| ctx.is_candidate(j)) {
            break;
        }
        let merged = ctx.utterance.folded_concat(&span);
        let Some(mut candidate) = match_phrase(ctx.lexicon, &merged, has_context, ctx.config)
        else {
            continue;
        };
        if candidate.confidence < ctx.config.medication_split_token_min {
            continue;
        }
        if candidate.kind != MatchKind::Exact {
            candidate.kind = MatchKind::SplitToken;
        }
        if best
            .as_ref()
            .is_none_or(|(_, b)| candidate.confidence > b.confidence)
        {
            best = Some((span, candidate));
        }
    }
    best
}

/// A single lexicon entry shares the token's first three characters
fn prefix_match(
    lexicon: &MedicationLexicon,
    folded: &str,
    has_context: bool,
    config: &ParserConfig,
) -> Option<Candidate> {
    if folded.chars().count() < 4 {
        return None;
    }
    let [entry] = lexicon.prefix_candidates(folded) else {
        return None;
    };
    let jw = lexicon
        .entry(*entry)?
        .variants
        .iter()
        .map(|v| jaro_winkler(folded, v) as f32)
        .fold(0.0, f32::max);

    (has_context || jw >= PREFIX_MIN_SIMILARITY).then(|| Candidate {
        entry: *entry,
        confidence: config.medication_prefix_confidence,
        kind: MatchKind::Prefix,
        alternatives: Vec::new(),
    })
}

// ========== Strength ==========

/// "400", "400mg", "7,5" → normalized leading number
fn leading_number(text: &str) -> Option<String> {
    let digits: String = text
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    let digits = digits.trim_end_matches([',', '.']);
    (!digits.is_empty()).then(|| digits.replace(',', "."))
}

/// Pick among same-named entries by a spoken strength ("Ibuprofen 600")
fn resolve_strength(ctx: &MatchContext, candidate: &mut Candidate, after: usize) {
    if candidate.alternatives.is_empty() {
        return;
    }
    for j in after..after + STRENGTH_LOOKAHEAD {
        let Some(number) = ctx.utterance.token(j).and_then(|t| leading_number(&t.text)) else {
            continue;
        };
        let matching: Vec<usize> = std::iter::once(candidate.entry)
            .chain(candidate.alternatives.iter().copied())
            .filter(|&idx| {
                ctx.lexicon
                    .entry(idx)
                    .and_then(|e| e.strength_number())
                    .is_some_and(|s| s == number)
            })
            .collect();
        if let [only] = matching[..] {
            debug!("Strength {} resolved ambiguous medication", number);
            candidate.entry = only;
            candidate.alternatives.clear();
            return;
        }
    }
}

/// The number right after a mention is its strength ("Rizatriptan 10",
/// "Ibuprofen 400 mg"), registered or not, unless a clause break separates
/// them or it opens a pain scale ("8 von 10", "8/10")
fn strength_span(ctx: &MatchContext, mention: &TokenSpan) -> Option<TokenSpan> {
    let last = ctx.utterance.token(mention.end.checked_sub(1)?)?;
    let after = mention.end;
    let token = ctx.utterance.token(after)?;
    if last.break_after
        || ctx.is_reserved(after)
        || token.mask == Some(Mask::Clock)
        || token.text.contains('/')
    {
        return None;
    }
    leading_number(&token.text)?;

    let next = ctx.utterance.token(after + 1);
    let opens_scale = next.is_some_and(|t| in_list(SCALE_PREPOSITIONS, &t.folded))
        && ctx.utterance.token(after + 2).is_some_and(|t| t.text == "10");
    if opens_scale {
        return None;
    }
    let unit_follows = !token.break_after && next.is_some_and(|t| is_dose_unit(&t.folded));
    Some(after..after + if unit_follows { 2 } else { 1 })
}

// ========== Dose ==========

#[derive(Debug, Clone, PartialEq)]
struct DosePhrase {
    quarters: u8,
    span: TokenSpan,
}

impl DosePhrase {
    fn is_unusual(&self) -> bool {
        self.quarters > MAX_DOSE_QUARTERS
    }
}

const ARTICLES: &[&str] = &["ein", "eine", "einen", "einer"];

fn fraction_quarters(folded: &str) -> Option<u8> {
    match folded {
        "viertel" => Some(1),
        "halbe" | "halben" | "halb" | "haelfte" => Some(2),
        "dreiviertel" => Some(3),
        "anderthalb" | "eineinhalb" => Some(6),
        "zweieinhalb" => Some(10),
        _ => None,
    }
}

fn quarters_from_count(count: f32) -> u8 {
    (count * 4.0).round().clamp(1.0, f32::from(u8::MAX)) as u8
}

/// "zwei Ibuprofen": a small count directly before the mention. A number
/// owned by an intensity keyword ("Stärke 2 Ibuprofen") is left alone.
fn bare_count(ctx: &MatchContext, j: usize, mention: &TokenSpan) -> Option<DosePhrase> {
    if j + 1 != mention.start {
        return None;
    }
    let token = ctx.utterance.token(j)?;
    if token.mask.is_some() || token.break_after {
        return None;
    }
    let count = parse_int(&token.text).filter(|c| (1..=MAX_BARE_COUNT).contains(c))?;
    let owned_by_keyword = j
        .checked_sub(1)
        .and_then(|p| ctx.utterance.token(p))
        .is_some_and(|prev| !prev.break_after && is_intensity_keyword(&prev.folded));
    if owned_by_keyword {
        return None;
    }
    Some(DosePhrase {
        quarters: quarters_from_count(count as f32),
        span: j..j + 1,
    })
}

/// Quantity phrase starting at `j`
fn dose_at(ctx: &MatchContext, j: usize, mention: &TokenSpan) -> Option<DosePhrase> {
    let token = ctx.utterance.token(j)?;
    let noun_follows = ctx
        .utterance
        .token(j + 1)
        .is_some_and(|t| is_quantity_noun(&t.folded) && !ctx.is_reserved(j + 1));
    let end = if noun_follows { j + 2 } else { j + 1 };

    if let Some(quarters) = fraction_quarters(&token.folded) {
        return Some(DosePhrase {
            quarters,
            span: j..end,
        });
    }
    if !noun_follows {
        return bare_count(ctx, j, mention);
    }
    if token.mask.is_none()
        && let Some(count) = parse_number(&token.text)
    {
        return Some(DosePhrase {
            quarters: quarters_from_count(count),
            span: j..end,
        });
    }
    in_list(ARTICLES, &token.folded).then(|| DosePhrase {
        quarters: DEFAULT_DOSE_QUARTERS,
        span: j..end,
    })
}

/// Nearest quantity phrase within the dose window, bounded by the
/// neighbouring mentions
fn find_dose(
    ctx: &MatchContext,
    mention: &TokenSpan,
    lower: usize,
    upper: usize,
) -> Option<DosePhrase> {
    let window = ctx.config.dose_window;
    let lo = lower.max(mention.start.saturating_sub(window));
    let hi = upper.min(mention.end.saturating_add(window));

    (lo..hi)
        .filter(|j| !mention.contains(j) && !ctx.is_reserved(*j))
        .filter_map(|j| dose_at(ctx, j, mention))
        .filter(|dose| dose.span.end <= hi && !dose.span.contains(&mention.start))
        .min_by_key(|dose| {
            if dose.span.end <= mention.start {
                mention.start - dose.span.end
            } else {
                dose.span.start.saturating_sub(mention.end)
            }
        })
}
