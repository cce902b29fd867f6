//! Execution policy gate
//!
//! Decides how the UI proceeds with a planned command. A pure function of its
//! inputs: it always returns exactly one decision, and the rules are checked
//! in a fixed order so the safety rules for destructive and low-trust input
//! cannot be bypassed by a high confidence.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PolicyThresholds;
use crate::intent::{IntentCategory, SlotName};

/// Channel the command arrived through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Typed,
    #[default]
    Speech,
    /// Secondary recognizer used when the primary one failed
    SpeechFallback,
}

impl InputSource {
    pub fn is_low_trust(self) -> bool {
        matches!(self, Self::SpeechFallback)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyInput {
    #[serde(default)]
    pub source: InputSource,
    pub confidence: f32,
    pub category: IntentCategory,
    #[serde(default)]
    pub destructive: bool,
    /// Margin over the runner-up intent
    #[serde(default)]
    pub score_gap: Option<f32>,
    #[serde(default)]
    pub missing_slots: Vec<SlotName>,
    #[serde(default)]
    pub ambiguous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    AutoExecute,
    Confirm,
    SlotFilling,
    Disambiguation,
    ActionPicker,
}

/// Which rule produced the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    AmbiguousFragment,
    LowScoreGap,
    MissingSlots,
    NotSupported,
    BelowConfidenceFloor,
    HighConfidence,
    BelowAutoExecute,
    BelowMutationConfirm,
    Destructive,
    LowTrustSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub kind: DecisionKind,
    pub reason: DecisionReason,
    /// Human-readable explanation with the values that decided it
    pub message: String,
}

impl PolicyDecision {
    fn new(kind: DecisionKind, reason: DecisionReason, message: impl Into<String>) -> Self {
        Self {
            kind,
            reason,
            message: message.into(),
        }
    }
}

/// Map a planned command to exactly one execution path
pub fn evaluate_policy(input: &PolicyInput, thresholds: &PolicyThresholds) -> PolicyDecision {
    let decision = decide(input, thresholds);
    debug!(
        "Policy {:?} ({:?}) for {:?} at {:.2} from {:?}",
        decision.kind, decision.reason, input.category, input.confidence, input.source
    );
    decision
}

fn decide(input: &PolicyInput, thresholds: &PolicyThresholds) -> PolicyDecision {
    use DecisionKind::*;
    use DecisionReason::*;

    // NaN counts as no confidence at all
    let confidence = if input.confidence.is_nan() {
        0.0
    } else {
        input.confidence.clamp(0.0, 1.0)
    };

    if input.ambiguous {
        return PolicyDecision::new(
            Disambiguation,
            AmbiguousFragment,
            "Fragment fits more than one pending question",
        );
    }
    if let Some(gap) = input.score_gap
        && !(gap >= thresholds.min_score_gap)
    {
        return PolicyDecision::new(
            Disambiguation,
            LowScoreGap,
            format!(
                "Score gap {:.2} to the runner-up below {:.2}",
                gap, thresholds.min_score_gap
            ),
        );
    }
    if !input.missing_slots.is_empty() {
        let slots: Vec<&str> = input.missing_slots.iter().map(|s| s.as_str()).collect();
        return PolicyDecision::new(
            SlotFilling,
            MissingSlots,
            format!("Missing slots: {}", slots.join(", ")),
        );
    }
    if input.category == IntentCategory::NotSupported {
        return PolicyDecision::new(ActionPicker, NotSupported, "Command is not supported");
    }
    if confidence < thresholds.confidence_floor {
        return PolicyDecision::new(
            ActionPicker,
            BelowConfidenceFloor,
            format!(
                "Confidence {:.2} below floor {:.2}",
                confidence, thresholds.confidence_floor
            ),
        );
    }

    let changes_data = input.category == IntentCategory::Mutation || input.destructive;
    if !changes_data {
        return if confidence >= thresholds.navigation_auto_execute {
            PolicyDecision::new(
                AutoExecute,
                HighConfidence,
                format!(
                    "Confidence {:.2} reaches {:.2}",
                    confidence, thresholds.navigation_auto_execute
                ),
            )
        } else {
            PolicyDecision::new(
                Confirm,
                BelowAutoExecute,
                format!(
                    "Confidence {:.2} below auto-execute {:.2}",
                    confidence, thresholds.navigation_auto_execute
                ),
            )
        };
    }

    if confidence < thresholds.mutation_confirm {
        return PolicyDecision::new(
            ActionPicker,
            BelowMutationConfirm,
            format!(
                "Confidence {:.2} too low to change data (needs {:.2})",
                confidence, thresholds.mutation_confirm
            ),
        );
    }
    if input.destructive {
        return PolicyDecision::new(
            Confirm,
            Destructive,
            "Destructive action always needs confirmation",
        );
    }
    if input.source.is_low_trust() {
        return PolicyDecision::new(
            Confirm,
            LowTrustSource,
            "Changes from the fallback recognizer need confirmation",
        );
    }
    if confidence >= thresholds.mutation_auto_execute {
        PolicyDecision::new(
            AutoExecute,
            HighConfidence,
            format!(
                "Confidence {:.2} reaches {:.2}",
                confidence, thresholds.mutation_auto_execute
            ),
        )
    } else {
        PolicyDecision::new(
            Confirm,
            BelowAutoExecute,
            format!(
                "Confidence {:.2} below auto-execute {:.2}",
                confidence, thresholds.mutation_auto_execute
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(category: IntentCategory, confidence: f32) -> PolicyInput {
        PolicyInput {
            source: InputSource::Typed,
            confidence,
            category,
            destructive: false,
            score_gap: None,
            missing_slots: Vec::new(),
            ambiguous: false,
        }
    }

    fn decide_kind(input: &PolicyInput) -> DecisionKind {
        evaluate_policy(input, &PolicyThresholds::default()).kind
    }

    #[test]
    fn test_navigation_thresholds() {
        assert_eq!(
            decide_kind(&input(IntentCategory::Navigate, 0.8)),
            DecisionKind::AutoExecute
        );
        assert_eq!(
            decide_kind(&input(IntentCategory::Query, 0.6)),
            DecisionKind::Confirm
        );
        assert_eq!(
            decide_kind(&input(IntentCategory::SlotFilling, 0.9)),
            DecisionKind::AutoExecute
        );
    }

    #[test]
    fn test_mutation_bands() {
        assert_eq!(
            decide_kind(&input(IntentCategory::Mutation, 0.95)),
            DecisionKind::AutoExecute
        );
        assert_eq!(
            decide_kind(&input(IntentCategory::Mutation, 0.7)),
            DecisionKind::Confirm
        );
        assert_eq!(
            decide_kind(&input(IntentCategory::Mutation, 0.5)),
            DecisionKind::ActionPicker
        );
    }

    #[test]
    fn test_rule_order() {
        let mut both = input(IntentCategory::Mutation, 0.95);
        both.ambiguous = true;
        both.missing_slots = vec![SlotName::Time];
        assert_eq!(decide_kind(&both), DecisionKind::Disambiguation);

        both.ambiguous = false;
        assert_eq!(decide_kind(&both), DecisionKind::SlotFilling);

        let mut unsupported = input(IntentCategory::NotSupported, 0.99);
        unsupported.score_gap = Some(0.5);
        assert_eq!(decide_kind(&unsupported), DecisionKind::ActionPicker);
    }

    #[test]
    fn test_score_gap() {
        let mut close = input(IntentCategory::Navigate, 0.9);
        close.score_gap = Some(0.05);
        assert_eq!(decide_kind(&close), DecisionKind::Disambiguation);
        close.score_gap = Some(f32::NAN);
        assert_eq!(decide_kind(&close), DecisionKind::Disambiguation);
        close.score_gap = Some(0.3);
        assert_eq!(decide_kind(&close), DecisionKind::AutoExecute);
    }

    #[test]
    fn test_confidence_floor() {
        let decision = evaluate_policy(
            &input(IntentCategory::Navigate, 0.2),
            &PolicyThresholds::default(),
        );
        assert_eq!(decision.kind, DecisionKind::ActionPicker);
        assert_eq!(decision.reason, DecisionReason::BelowConfidenceFloor);
        assert_eq!(decision.message, "Confidence 0.20 below floor 0.40");
        assert_eq!(
            decide_kind(&input(IntentCategory::Navigate, f32::NAN)),
            DecisionKind::ActionPicker
        );
    }

    #[test]
    fn test_destructive_never_auto_executes() {
        let mut delete = input(IntentCategory::Mutation, 1.0);
        delete.destructive = true;
        let decision = evaluate_policy(&delete, &PolicyThresholds::default());
        assert_eq!(decision.kind, DecisionKind::Confirm);
        assert_eq!(decision.reason, DecisionReason::Destructive);
        assert_eq!(decision.message, "Destructive action always needs confirmation");

        delete.confidence = 0.5;
        assert_eq!(decide_kind(&delete), DecisionKind::ActionPicker);
    }

    #[test]
    fn test_low_trust_mutation_confirms() {
        let mut mutation = input(IntentCategory::Mutation, 0.99);
        mutation.source = InputSource::SpeechFallback;
        let decision = evaluate_policy(&mutation, &PolicyThresholds::default());
        assert_eq!(decision.kind, DecisionKind::Confirm);
        assert_eq!(decision.reason, DecisionReason::LowTrustSource);

        let mut navigation = input(IntentCategory::Navigate, 0.99);
        navigation.source = InputSource::SpeechFallback;
        assert_eq!(decide_kind(&navigation), DecisionKind::AutoExecute);
    }

    #[test]
    fn test_messages_name_thresholds() {
        let thresholds = PolicyThresholds::default();
        let mut slots = input(IntentCategory::Mutation, 0.9);
        slots.missing_slots = vec![SlotName::Date, SlotName::Time];
        assert_eq!(evaluate_policy(&slots, &thresholds).message, "Missing slots: date, time");

        let mut close = input(IntentCategory::Navigate, 0.9);
        close.score_gap = Some(0.05);
        let message = evaluate_policy(&close, &thresholds).message;
        assert!(message.starts_with("Score gap 0.05"), "{message}");
    }

    #[test]
    fn test_input_from_json_defaults() {
        let input: PolicyInput =
            serde_json::from_str(r#"{"confidence": 0.8, "category": "navigate"}"#).unwrap();
        assert_eq!(input.source, InputSource::Speech);
        assert!(input.missing_slots.is_empty());
        assert_eq!(decide_kind(&input), DecisionKind::AutoExecute);
    }
}
