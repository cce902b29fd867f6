//! Threshold and confidence tables
//!
//! Every tunable number the parser and the policy gate use lives here, so a
//! host can audit or override them in one place. The similarity thresholds
//! were tuned by hand against a small set of recorded utterances.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Largest token window a config may ask for
pub const MAX_WINDOW: usize = 12;

/// Confidences and windows used by the extraction pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// "8 von 10", "8/10"
    pub pain_scale_confidence: f32,
    /// Trigger keyword followed by a number
    pub pain_trigger_confidence: f32,
    /// "Stärke 6"
    pub pain_strength_confidence: f32,
    /// "bei 6" with pain context elsewhere in the utterance
    pub pain_context_number_confidence: f32,
    /// Descriptor words ("stark", "leicht")
    pub pain_descriptor_confidence: f32,
    /// Bare number next to pain vocabulary
    pub pain_standalone_confidence: f32,
    /// Pain values below this confidence are flagged for review
    pub pain_review_below: f32,
    /// Tokens scanned after a trigger keyword
    pub trigger_window_after: usize,
    /// Tokens scanned before a trigger keyword when nothing follows it
    pub trigger_window_before: usize,

    pub medication_exact_confidence: f32,
    /// Minimum similarity for a fuzzy medication match
    pub medication_fuzzy_threshold: f32,
    /// Lowered similarity bar when dose units or intake verbs are nearby
    pub medication_fuzzy_threshold_with_context: f32,
    pub medication_prefix_confidence: f32,
    /// Merged-token matches below this are dropped
    pub medication_split_token_min: f32,
    /// Top two candidates closer than this are reported as ambiguous
    pub medication_ambiguity_delta: f32,
    /// Confidence for drugs recognised from the built-in vocabulary only
    pub medication_unregistered_confidence: f32,
    /// Medications below this confidence are flagged for review
    pub medication_review_below: f32,
    /// Shortest token considered for fuzzy matching
    pub medication_fuzzy_min_len: usize,
    /// Tokens scanned for medication context around a candidate
    pub medication_context_window: usize,
    /// Tokens scanned for a negation before a candidate
    pub negation_window: usize,
    /// Tokens scanned for a dose phrase around a mention
    pub dose_window: usize,

    /// STT confidence below this marks the whole result for review
    pub low_stt_confidence: f32,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            pain_scale_confidence: 0.95,
            pain_trigger_confidence: 0.85,
            pain_strength_confidence: 0.80,
            pain_context_number_confidence: 0.70,
            pain_descriptor_confidence: 0.60,
            pain_standalone_confidence: 0.55,
            pain_review_below: 0.75,
            trigger_window_after: 4,
            trigger_window_before: 3,

            medication_exact_confidence: 0.98,
            medication_fuzzy_threshold: 0.88,
            medication_fuzzy_threshold_with_context: 0.80,
            medication_prefix_confidence: 0.75,
            medication_split_token_min: 0.85,
            medication_ambiguity_delta: 0.03,
            medication_unregistered_confidence: 0.70,
            medication_review_below: 0.85,
            medication_fuzzy_min_len: 4,
            medication_context_window: 3,
            negation_window: 2,
            dose_window: 4,

            low_stt_confidence: 0.6,
        }
    }
}

impl ParserConfig {
    /// Load a config from JSON. Missing fields fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values outside [0, 1] and inverted thresholds
    pub fn validate(&self) -> Result<()> {
        let unit_values = [
            ("pain_scale_confidence", self.pain_scale_confidence),
            ("pain_trigger_confidence", self.pain_trigger_confidence),
            ("pain_strength_confidence", self.pain_strength_confidence),
            (
                "pain_context_number_confidence",
                self.pain_context_number_confidence,
            ),
            ("pain_descriptor_confidence", self.pain_descriptor_confidence),
            ("pain_standalone_confidence", self.pain_standalone_confidence),
            ("pain_review_below", self.pain_review_below),
            ("medication_exact_confidence", self.medication_exact_confidence),
            ("medication_fuzzy_threshold", self.medication_fuzzy_threshold),
            (
                "medication_fuzzy_threshold_with_context",
                self.medication_fuzzy_threshold_with_context,
            ),
            (
                "medication_prefix_confidence",
                self.medication_prefix_confidence,
            ),
            ("medication_split_token_min", self.medication_split_token_min),
            ("medication_ambiguity_delta", self.medication_ambiguity_delta),
            (
                "medication_unregistered_confidence",
                self.medication_unregistered_confidence,
            ),
            ("medication_review_below", self.medication_review_below),
            ("low_stt_confidence", self.low_stt_confidence),
        ];
        check_unit_interval(&unit_values)?;

        if self.medication_fuzzy_threshold_with_context > self.medication_fuzzy_threshold {
            return Err(config_error(
                "medication_fuzzy_threshold_with_context must not exceed medication_fuzzy_threshold",
            ));
        }
        if self.medication_fuzzy_min_len < 3 {
            return Err(config_error("medication_fuzzy_min_len must be at least 3"));
        }
        for (name, window) in [
            ("trigger_window_after", self.trigger_window_after),
            ("trigger_window_before", self.trigger_window_before),
            ("medication_context_window", self.medication_context_window),
            ("negation_window", self.negation_window),
            ("dose_window", self.dose_window),
        ] {
            if window > MAX_WINDOW {
                warn!("Rejected {} = {} (above {})", name, window, MAX_WINDOW);
                return Err(config_error(&format!("{name} must not exceed {MAX_WINDOW}")));
            }
        }
        Ok(())
    }
}

/// Thresholds for the execution policy gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyThresholds {
    /// Runner-up intents closer than this force disambiguation
    pub min_score_gap: f32,
    /// Below this nothing is executed or confirmed; the action picker is shown
    pub confidence_floor: f32,
    /// Navigation and queries run without confirmation at or above this
    pub navigation_auto_execute: f32,
    /// Mutations run without confirmation at or above this
    pub mutation_auto_execute: f32,
    /// Mutations are offered for confirmation at or above this
    pub mutation_confirm: f32,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            min_score_gap: 0.10,
            confidence_floor: 0.40,
            navigation_auto_execute: 0.75,
            mutation_auto_execute: 0.90,
            mutation_confirm: 0.65,
        }
    }
}

impl PolicyThresholds {
    /// Load thresholds from JSON. Missing fields fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let thresholds: Self = serde_json::from_str(json)?;
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        check_unit_interval(&[
            ("min_score_gap", self.min_score_gap),
            ("confidence_floor", self.confidence_floor),
            ("navigation_auto_execute", self.navigation_auto_execute),
            ("mutation_auto_execute", self.mutation_auto_execute),
            ("mutation_confirm", self.mutation_confirm),
        ])?;

        if self.mutation_confirm > self.mutation_auto_execute {
            return Err(config_error(
                "mutation_confirm must not exceed mutation_auto_execute",
            ));
        }
        if self.confidence_floor > self.mutation_confirm
            || self.confidence_floor > self.navigation_auto_execute
        {
            return Err(config_error(
                "confidence_floor must not exceed the confirm and auto-execute thresholds",
            ));
        }
        Ok(())
    }
}

fn check_unit_interval(values: &[(&str, f32)]) -> Result<()> {
    for (name, value) in values {
        if !(0.0..=1.0).contains(value) {
            warn!("Rejected {} = {} (outside 0..=1)", name, value);
            return Err(config_error(&format!("{name} must be within 0..=1")));
        }
    }
    Ok(())
}

fn config_error(message: &str) -> Error {
    Error::Config(message.to_string())
}
