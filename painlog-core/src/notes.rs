//! Residual note cleanup
//!
//! Whatever the extractors did not consume becomes the free-text note. Removal
//! works on token indices, never on substrings, so a consumed "8" cannot take
//! the "8" out of "18 Uhr Termin" elsewhere in the sentence.

use tracing::debug;

use crate::normalizer::{NormalizedUtterance, TokenSpan};
use crate::pain::is_intensity_keyword;
use crate::text::{in_list, parse_number};
use crate::types::EntryType;
use crate::vocab::{
    CLINICAL_VOCABULARY, LEADING_FILLERS, QUANTITY_WORDS, TRAILING_CONNECTIVES, is_dose_unit,
    is_event_noun, is_intake_verb, is_quantity_noun,
};

/// Tokens around a medication mention scanned for dose vocabulary
const MEDICATION_WINDOW: usize = 3;

/// Notes shorter than this are dropped
const MIN_NOTE_CHARS: usize = 3;

/// Words up to this length count as filler-like in the quality gate
const SHORT_WORD_CHARS: usize = 5;

fn is_numeric(text: &str) -> bool {
    parse_number(text).is_some()
}

/// Build the note from the tokens left after extraction.
///
/// `consumed` holds every span claimed by time, pain and medication
/// extraction; `medication_mentions` the mention spans alone. Intensity
/// keywords ("Stärke", "Schmerzlautstärke") are only dropped when a pain value
/// was extracted, otherwise they are part of what the user said.
pub fn clean_note(
    utterance: &NormalizedUtterance,
    consumed: &[TokenSpan],
    medication_mentions: &[TokenSpan],
    entry_type: EntryType,
    pain_found: bool,
) -> String {
    let tokens = &utterance.tokens;
    let len = tokens.len();
    let mut keep = vec![true; len];

    for span in consumed {
        for i in span.clone().filter(|&i| i < len) {
            keep[i] = false;
        }
    }

    for (i, token) in tokens.iter().enumerate() {
        let folded = token.folded.as_str();
        let event_noun = is_event_noun(folded);
        if (pain_found && is_intensity_keyword(folded) && !event_noun)
            || (event_noun && entry_type == EntryType::NewEntry)
        {
            keep[i] = false;
        }
    }

    for mention in medication_mentions {
        let lo = mention.start.saturating_sub(MEDICATION_WINDOW);
        let hi = (mention.end + MEDICATION_WINDOW).min(tokens.len());
        for i in lo..hi {
            let token = &tokens[i];
            let folded = token.folded.as_str();
            if token.mask.is_some()
                || is_numeric(&token.text)
                || is_dose_unit(folded)
                || is_quantity_noun(folded)
                || is_intake_verb(folded)
                || in_list(QUANTITY_WORDS, folded)
            {
                keep[i] = false;
            }
        }
    }

    let mut remaining: Vec<&str> = tokens
        .iter()
        .zip(&keep)
        .filter(|(_, keep)| **keep)
        .map(|(t, _)| t.folded.as_str())
        .collect();
    let mut raw: Vec<&str> = tokens
        .iter()
        .zip(&keep)
        .filter(|(_, keep)| **keep)
        .map(|(t, _)| t.raw.as_str())
        .collect();

    strip_edges(&mut remaining, &mut raw);

    let note = raw.join(" ");
    if !passes_quality_gate(&remaining, &note) {
        if !note.is_empty() {
            debug!("Dropping low-value note '{}'", note);
        }
        return String::new();
    }
    note
}

/// Strip leading fillers and trailing connectives until neither applies
fn strip_edges(folded: &mut Vec<&str>, raw: &mut Vec<&str>) {
    loop {
        let mut changed = false;
        while folded.first().is_some_and(|f| in_list(LEADING_FILLERS, f)) {
            folded.remove(0);
            raw.remove(0);
            changed = true;
        }
        while folded
            .last()
            .is_some_and(|f| in_list(TRAILING_CONNECTIVES, f))
        {
            folded.pop();
            raw.pop();
            changed = true;
        }
        if !changed {
            break;
        }
    }
}

fn passes_quality_gate(folded: &[&str], note: &str) -> bool {
    if note.chars().filter(|c| !c.is_whitespace()).count() < MIN_NOTE_CHARS {
        return false;
    }
    if folded.iter().all(|f| f.chars().all(|c| c.is_ascii_digit())) {
        return false;
    }
    let has_clinical = folded.iter().any(|f| in_list(CLINICAL_VOCABULARY, f));
    let filler_like = folded.len() <= 2
        && folded
            .iter()
            .all(|f| f.chars().count() <= SHORT_WORD_CHARS);
    has_clinical || !filler_like
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;

    fn note(text: &str, consumed: &[TokenSpan], mentions: &[TokenSpan], entry: EntryType) -> String {
        clean_note(&normalize(text), consumed, mentions, entry, true)
    }

    #[test]
    fn test_context_note_keeps_content() {
        let result = note(
            "Trigger: wenig geschlafen und Stress im Büro.",
            &[],
            &[],
            EntryType::ContextEntry,
        );
        assert_eq!(result, "wenig geschlafen und Stress im Büro");
    }

    #[test]
    fn test_everything_consumed() {
        // seit 30 minuten | migräne | schmerzlautstärke | 8 von 10 | ibuprofen 400
        let text = "Seit 30 Minuten Migräne, Schmerzlautstärke 8 von 10, Ibuprofen 400.";
        let consumed = [0..3, 5..8, 8..9, 9..10];
        let result = note(text, &consumed, &[8..9], EntryType::NewEntry);
        assert_eq!(result, "");
    }

    #[test]
    fn test_event_noun_kept_for_context_entry() {
        let result = note("Migräne wegen Stress", &[], &[], EntryType::ContextEntry);
        assert_eq!(result, "Migräne wegen Stress");
        let result = note("Migräne wegen Stress", &[], &[], EntryType::NewEntry);
        assert_eq!(result, "Stress");
    }

    #[test]
    fn test_medication_window_removes_dose_words() {
        let text = "Ibuprofen zwei Tabletten genommen danach Übelkeit";
        let result = note(text, &[0..1], &[0..1], EntryType::NewEntry);
        assert_eq!(result, "danach Übelkeit");
    }

    #[test]
    fn test_index_based_removal_keeps_equal_words() {
        let text = "Schmerzstärke 8 und um 18 Uhr 8 Leute im Meeting";
        let result = note(text, &[1..2], &[], EntryType::NewEntry);
        assert_eq!(result, "um 18 Uhr 8 Leute im Meeting");
    }

    #[test]
    fn test_intensity_word_kept_without_pain() {
        let text = "Trigger: Lautstärke im Großraumbüro und Stress";
        let result = clean_note(&normalize(text), &[], &[], EntryType::ContextEntry, false);
        assert_eq!(result, "Lautstärke im Großraumbüro und Stress");

        let result = clean_note(&normalize("Stärke 6"), &[1..2], &[], EntryType::NewEntry, true);
        assert_eq!(result, "");
    }

    #[test]
    fn test_strip_until_stable() {
        let result = note("also ich habe Übelkeit und", &[], &[], EntryType::ContextEntry);
        assert_eq!(result, "Übelkeit");
    }

    #[test]
    fn test_quality_gate() {
        assert_eq!(note("ok", &[], &[], EntryType::ContextEntry), "");
        assert_eq!(note("nur kurz", &[], &[], EntryType::ContextEntry), "");
        assert_eq!(note("links", &[], &[], EntryType::ContextEntry), "links");
        assert_eq!(note("Schmerz 5 5", &[], &[], EntryType::NewEntry), "");
    }
}
