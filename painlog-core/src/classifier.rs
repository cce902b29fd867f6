//! New-event vs. context-note classification
//!
//! Extracted slots decide first: a pain value or a medication always makes a
//! new entry. Without them the utterance is scored against two keyword
//! vocabularies, and anything unclear falls back to a context entry so that
//! nothing is silently logged as an event.

use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use tracing::debug;

use crate::normalizer::NormalizedUtterance;
use crate::types::EntryType;

/// Symptom nouns, intake verbs, scale phrases, drug classes, relative time
const NEW_ENTRY_PATTERNS: &[&str] = &[
    "migraene", "kopfschmerz", "kopfweh", "schmerz", "attacke", "anfall", "aura", "pochend",
    "pochen", "stechend", "druckschmerz", "genommen", "eingenommen", "geschluckt", "tablette",
    "triptan", "schmerzmittel", "analgetik", "von 10", "auf 10", "minuten", "stunde", "seit",
    "angefangen", "begonnen", "losgegangen",
];

/// Causes and circumstances
const CONTEXT_PATTERNS: &[&str] = &[
    "schlaf", "geschlafen", "muede", "stress", "gestresst", "wetter", "foehn", "regen", "hitze",
    "periode", "menstruation", "zyklus", "regel", "essen", "gegessen", "hunger", "kaffee",
    "alkohol", "wein", "bildschirm", "laptop", "handy", "arbeit", "buero", "sport", "trigger",
    "laerm", "licht", "streit", "reise", "flug", "getrunken", "wasser", "dehydriert",
];

static NEW_ENTRY_AUTOMATON: LazyLock<Option<AhoCorasick>> =
    LazyLock::new(|| build_automaton(NEW_ENTRY_PATTERNS));

static CONTEXT_AUTOMATON: LazyLock<Option<AhoCorasick>> =
    LazyLock::new(|| build_automaton(CONTEXT_PATTERNS));

fn build_automaton(patterns: &[&str]) -> Option<AhoCorasick> {
    AhoCorasickBuilder::new()
        .match_kind(MatchKind::LeftmostLongest)
        .build(patterns)
        .ok()
}

const FORCED_CONFIDENCE: f32 = 0.9;
const FORCED_ON_REVIEW_CONFIDENCE: f32 = 0.75;
const NEW_ONLY_CONFIDENCE: f32 = 0.6;
const NEW_LEADING_CONFIDENCE: f32 = 0.55;
const MIXED_CONFIDENCE: f32 = 0.5;
const CONTEXT_ONLY_CONFIDENCE: f32 = 0.7;
const NO_EVIDENCE_CONFIDENCE: f32 = 0.3;

/// New-entry evidence must lead context evidence by this many hits
const NEW_ENTRY_MARGIN: usize = 2;

/// What the extractors found
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotEvidence {
    pub has_pain: bool,
    pub has_medication: bool,
    /// Every pain/medication slot present is flagged for review
    pub review_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub entry_type: EntryType,
    pub confidence: f32,
    pub can_toggle: bool,
    pub new_entry_hits: usize,
    pub context_hits: usize,
}

/// Folded tokens joined by spaces, padded so every token starts after a space
fn haystack(utterance: &NormalizedUtterance) -> String {
    let mut text = String::from(" ");
    for token in &utterance.tokens {
        text.push_str(&token.folded);
        text.push(' ');
    }
    text
}

/// Pattern hits that start at a token boundary
fn count_hits(automaton: &Option<AhoCorasick>, haystack: &str) -> usize {
    let Some(ac) = automaton else {
        return 0;
    };
    ac.find_iter(haystack)
        .filter(|m| m.start() > 0 && haystack.as_bytes()[m.start() - 1] == b' ')
        .count()
}

pub fn classify(utterance: &NormalizedUtterance, evidence: SlotEvidence) -> Classification {
    let text = haystack(utterance);
    let new_entry_hits = count_hits(&NEW_ENTRY_AUTOMATON, &text);
    let context_hits = count_hits(&CONTEXT_AUTOMATON, &text);

    let (entry_type, confidence, can_toggle) = if evidence.has_pain || evidence.has_medication {
        let confidence = if evidence.review_only {
            FORCED_ON_REVIEW_CONFIDENCE
        } else {
            FORCED_CONFIDENCE
        };
        (
            EntryType::NewEntry,
            confidence,
            evidence.review_only && context_hits > 0,
        )
    } else {
        match (new_entry_hits, context_hits) {
            (0, 0) if utterance.is_empty() => (EntryType::ContextEntry, 0.0, false),
            (0, 0) => (EntryType::ContextEntry, NO_EVIDENCE_CONFIDENCE, false),
            (_, 0) => (EntryType::NewEntry, NEW_ONLY_CONFIDENCE, false),
            (0, _) => (EntryType::ContextEntry, CONTEXT_ONLY_CONFIDENCE, false),
            (new, context) if new >= context + NEW_ENTRY_MARGIN => {
                (EntryType::NewEntry, NEW_LEADING_CONFIDENCE, true)
            }
            _ => (EntryType::ContextEntry, MIXED_CONFIDENCE, true),
        }
    };

    debug!(
        "Classified as {:?} ({:.2}): {} new-entry / {} context hits",
        entry_type, confidence, new_entry_hits, context_hits
    );

    Classification {
        entry_type,
        confidence,
        can_toggle,
        new_entry_hits,
        context_hits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;

    fn classify_text(text: &str) -> Classification {
        classify(&normalize(text), SlotEvidence::default())
    }

    #[test]
    fn test_slots_force_new_entry() {
        let evidence = SlotEvidence {
            has_pain: true,
            ..Default::default()
        };
        let result = classify(&normalize("Stress und schlecht geschlafen"), evidence);
        assert_eq!(result.entry_type, EntryType::NewEntry);
        assert_eq!(result.confidence, 0.9);
        assert!(!result.can_toggle);
    }

    #[test]
    fn test_review_only_evidence_with_context_can_toggle() {
        let evidence = SlotEvidence {
            has_medication: true,
            review_only: true,
            ..Default::default()
        };
        let result = classify(&normalize("Stress im Büro"), evidence);
        assert_eq!(result.entry_type, EntryType::NewEntry);
        assert!(result.can_toggle);
    }

    #[test]
    fn test_context_only() {
        let result = classify_text("Trigger: wenig geschlafen und Stress im Büro.");
        assert_eq!(result.entry_type, EntryType::ContextEntry);
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.new_entry_hits, 0);
        assert_eq!(result.context_hits, 4);
    }

    #[test]
    fn test_new_entry_vocabulary_only() {
        let result = classify_text("Migräne seit dem Aufstehen");
        assert_eq!(result.entry_type, EntryType::NewEntry);
        assert_eq!(result.confidence, 0.6);
    }

    #[test]
    fn test_mixed_defaults_to_context() {
        let result = classify_text("Migräne wegen Stress");
        assert_eq!(result.entry_type, EntryType::ContextEntry);
        assert_eq!(result.confidence, 0.5);
        assert!(result.can_toggle);
    }

    #[test]
    fn test_mixed_with_clear_lead() {
        let result = classify_text("Migräne Attacke pochend seit dem Kaffee");
        assert_eq!(result.entry_type, EntryType::NewEntry);
        assert_eq!(result.confidence, 0.55);
        assert!(result.can_toggle);
    }

    #[test]
    fn test_inner_substrings_ignored() {
        // "schlaf" inside "ausschlafen" is not a token start
        let result = classify_text("ausschlafen");
        assert_eq!(result.context_hits, 0);
    }

    #[test]
    fn test_no_evidence() {
        assert_eq!(classify_text("hallo welt").confidence, 0.3);
        assert_eq!(classify_text("").confidence, 0.0);
        assert_eq!(classify_text("").entry_type, EntryType::ContextEntry);
    }
}
