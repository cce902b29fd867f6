//! Voice entry parser
//!
//! Runs the extraction pipeline over one utterance:
//! normalize → time → medications → pain → classify → note.
//! Time goes first so its numbers are reserved before the pain scanner runs,
//! and medications go before pain so strengths and doses are reserved too.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::{SlotEvidence, classify};
use crate::config::ParserConfig;
use crate::lexicon::MedicationLexicon;
use crate::medication::extract_medications;
use crate::normalizer::normalize;
use crate::notes::clean_note;
use crate::pain::extract_pain;
use crate::time::extract_time;
use crate::types::{ConfidenceTier, ReviewReason, TimeKind, VoiceParseResult};

/// Weight of the slot confidences in the overall confidence
const SLOT_WEIGHT: f32 = 0.7;

/// A transcript plus what the recognizer knows about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseRequest {
    pub transcript: String,
    /// Recognizer confidence in [0, 1], if reported
    #[serde(default)]
    pub stt_confidence: Option<f32>,
    /// Reference clock; local now when absent
    #[serde(default)]
    pub reference_time: Option<NaiveDateTime>,
}

impl ParseRequest {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            stt_confidence: None,
            reference_time: None,
        }
    }
}

fn tier_confidence(tier: ConfidenceTier) -> f32 {
    match tier {
        ConfidenceTier::High => 0.95,
        ConfidenceTier::Medium => 0.75,
        ConfidenceTier::Low => 0.5,
    }
}

/// Parses voice diary utterances. Stateless apart from its configuration.
#[derive(Debug, Clone, Default)]
pub struct VoiceParser {
    config: ParserConfig,
}

impl VoiceParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse against the local clock
    pub fn parse(&self, transcript: &str, lexicon: &MedicationLexicon) -> VoiceParseResult {
        self.parse_at(transcript, lexicon, Local::now().naive_local())
    }

    /// Parse a request, applying the recognizer confidence if present
    pub fn parse_request(
        &self,
        request: &ParseRequest,
        lexicon: &MedicationLexicon,
    ) -> VoiceParseResult {
        let now = request
            .reference_time
            .unwrap_or_else(|| Local::now().naive_local());
        let mut result = self.parse_at(&request.transcript, lexicon, now);

        if let Some(stt) = request.stt_confidence
            && stt < self.config.low_stt_confidence
            && !result.raw_text.trim().is_empty()
        {
            debug!("Low STT confidence {:.2}, flagging for review", stt);
            result.confidence = (result.confidence * stt.clamp(0.0, 1.0)).clamp(0.0, 1.0);
            result.review_reasons.push(ReviewReason::LowSttConfidence);
            result.needs_review = true;
        }
        result
    }

    /// Parse with a pinned reference clock. Deterministic for equal inputs.
    pub fn parse_at(
        &self,
        transcript: &str,
        lexicon: &MedicationLexicon,
        now: NaiveDateTime,
    ) -> VoiceParseResult {
        let utterance = normalize(transcript);
        if utterance.is_empty() {
            return VoiceParseResult::empty(transcript, now);
        }
        let config = &self.config;

        let time = extract_time(&utterance, now);
        let medications = extract_medications(&utterance, lexicon, &time.spans, config);

        let mut reserved = time.spans.clone();
        reserved.extend(medications.spans.iter().cloned());
        let pain = extract_pain(&utterance, &reserved, &medications.mentions, config);

        let has_pain = pain.pain.is_present();
        let has_medication = !medications.medications.is_empty();
        let review_only = (has_pain || has_medication)
            && (!has_pain || pain.pain.needs_review)
            && medications.medications.iter().all(|m| m.needs_review);
        let classification = classify(
            &utterance,
            SlotEvidence {
                has_pain,
                has_medication,
                review_only,
            },
        );

        let mut consumed = reserved;
        consumed.extend(pain.spans.iter().cloned());
        let note = clean_note(
            &utterance,
            &consumed,
            &medications.mentions,
            classification.entry_type,
            has_pain,
        );

        let mut review_reasons = Vec::new();
        if pain.pain.needs_review {
            review_reasons.push(ReviewReason::LowPainConfidence);
        }
        if pain.pain.estimated_from_descriptor {
            review_reasons.push(ReviewReason::DescriptorEstimate);
        }
        if medications
            .medications
            .iter()
            .any(|m| m.is_registered && m.needs_review)
        {
            review_reasons.push(ReviewReason::UncertainMedication);
        }
        if medications.medications.iter().any(|m| !m.is_registered) {
            review_reasons.push(ReviewReason::UnregisteredMedication);
        }
        if classification.can_toggle {
            review_reasons.push(ReviewReason::AmbiguousClassification);
        }

        let mut slot_confidences: Vec<f32> = medications
            .medications
            .iter()
            .map(|m| m.confidence)
            .collect();
        if has_pain {
            slot_confidences.push(pain.pain.confidence);
        }
        if time.time.kind != TimeKind::None {
            slot_confidences.push(tier_confidence(time.time.confidence));
        }
        let confidence = if slot_confidences.is_empty() {
            classification.confidence
        } else {
            let mean = slot_confidences.iter().sum::<f32>() / slot_confidences.len() as f32;
            SLOT_WEIGHT * mean + (1.0 - SLOT_WEIGHT) * classification.confidence
        };

        debug!(
            "Parsed {:?}: pain={:?}, {} medication(s), note='{}'",
            classification.entry_type,
            pain.pain.value,
            medications.medications.len(),
            note
        );

        VoiceParseResult {
            entry_type: classification.entry_type,
            confidence: confidence.clamp(0.0, 1.0),
            raw_text: transcript.to_string(),
            time: time.time,
            pain: pain.pain,
            medications: medications.medications,
            note,
            needs_review: !review_reasons.is_empty(),
            review_reasons,
            can_toggle_entry_type: classification.can_toggle,
        }
    }
}

/// Parse with the default configuration against the local clock
pub fn parse(transcript: &str, lexicon: &MedicationLexicon) -> VoiceParseResult {
    VoiceParser::default().parse(transcript, lexicon)
}
