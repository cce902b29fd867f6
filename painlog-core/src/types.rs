//! Core types produced by the voice parsing pipeline

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Default dose when no quantity phrase is found: one full tablet
pub const DEFAULT_DOSE_QUARTERS: u8 = 4;

/// A medication as supplied by the medication registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserMedication {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub active_ingredient: Option<String>,
}

impl UserMedication {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            active_ingredient: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_active_ingredient(mut self, ingredient: impl Into<String>) -> Self {
        self.active_ingredient = Some(ingredient.into());
        self
    }
}

// ============ Time ============

/// How a time slot was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeKind {
    /// Clock time or day part ("um 8 Uhr", "gestern abend")
    Absolute,
    /// Offset from now ("vor 30 Minuten", "jetzt")
    Relative,
    /// Nothing in the utterance, defaulted to now
    None,
}

/// Coarse confidence for time slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

/// Extracted point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTime {
    pub kind: TimeKind,
    /// Resolved local instant
    pub instant: NaiveDateTime,
    /// Only set for relative times
    pub minutes_ago: Option<u32>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub is_now: bool,
    pub confidence: ConfidenceTier,
    /// Phrase as it appeared in the utterance, empty when defaulted
    pub phrase: String,
}

impl ParsedTime {
    /// Default slot: now, nothing matched
    pub fn now(now: NaiveDateTime) -> Self {
        Self {
            kind: TimeKind::None,
            instant: now,
            minutes_ago: None,
            date: now.date(),
            time: now.time(),
            is_now: true,
            confidence: ConfidenceTier::High,
            phrase: String::new(),
        }
    }

    pub(crate) fn relative(
        now: NaiveDateTime,
        minutes_ago: u32,
        phrase: String,
    ) -> Self {
        let instant = now - chrono::Duration::minutes(i64::from(minutes_ago));
        Self {
            kind: TimeKind::Relative,
            instant,
            minutes_ago: Some(minutes_ago),
            date: instant.date(),
            time: instant.time(),
            is_now: minutes_ago == 0,
            confidence: ConfidenceTier::High,
            phrase,
        }
    }

    pub(crate) fn absolute(
        instant: NaiveDateTime,
        confidence: ConfidenceTier,
        phrase: String,
    ) -> Self {
        Self {
            kind: TimeKind::Absolute,
            instant,
            minutes_ago: None,
            date: instant.date(),
            time: instant.time(),
            is_now: false,
            confidence,
            phrase,
        }
    }

    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    pub fn minute(&self) -> u32 {
        self.time.minute()
    }
}

// ============ Pain ============

/// Extracted pain intensity on the 0-10 scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPainIntensity {
    pub value: Option<u8>,
    pub confidence: f32,
    /// Evidence phrase, empty when nothing matched
    pub phrase: String,
    pub needs_review: bool,
    #[serde(default)]
    pub estimated_from_descriptor: bool,
}

impl ParsedPainIntensity {
    pub fn none() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            phrase: String::new(),
            needs_review: false,
            estimated_from_descriptor: false,
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

// ============ Medication ============

/// How a medication mention was matched against the lexicon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
    Prefix,
    SplitToken,
}

/// A lexicon hit for one mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationMatch {
    pub canonical_name: String,
    pub medication_id: Option<String>,
    pub confidence: f32,
    pub kind: MatchKind,
    pub is_uncertain: bool,
    /// Competing canonical names when the match is ambiguous
    #[serde(default)]
    pub alternatives: Vec<String>,
}

/// A medication intake extracted from the utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMedication {
    pub name: String,
    pub medication_id: Option<String>,
    /// False when only the built-in drug vocabulary recognised it
    pub is_registered: bool,
    /// Dose in quarter tablets (4 = one tablet)
    pub dose_quarters: u8,
    pub dose_text: Option<String>,
    pub confidence: f32,
    pub needs_review: bool,
    /// Lexicon match details, absent for unregistered drugs
    pub matched: Option<MedicationMatch>,
}

impl ParsedMedication {
    /// Dose expressed in whole tablets
    pub fn tablets(&self) -> f32 {
        f32::from(self.dose_quarters) / 4.0
    }
}

// ============ Result ============

/// Whether the utterance describes a discrete event or circumstances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    NewEntry,
    #[default]
    ContextEntry,
}

/// Why a parse result should be shown to the user before saving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    LowPainConfidence,
    DescriptorEstimate,
    UncertainMedication,
    UnregisteredMedication,
    LowSttConfidence,
    AmbiguousClassification,
}

/// Structured record for one utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParseResult {
    pub entry_type: EntryType,
    pub confidence: f32,
    pub raw_text: String,
    pub time: ParsedTime,
    pub pain: ParsedPainIntensity,
    pub medications: Vec<ParsedMedication>,
    pub note: String,
    pub needs_review: bool,
    #[serde(default)]
    pub review_reasons: Vec<ReviewReason>,
    /// The UI may offer switching between new and context entry
    pub can_toggle_entry_type: bool,
}

impl VoiceParseResult {
    /// Result for empty or degenerate input
    pub fn empty(raw_text: &str, now: NaiveDateTime) -> Self {
        Self {
            entry_type: EntryType::ContextEntry,
            confidence: 0.0,
            raw_text: raw_text.to_string(),
            time: ParsedTime::now(now),
            pain: ParsedPainIntensity::none(),
            medications: Vec::new(),
            note: String::new(),
            needs_review: false,
            review_reasons: Vec::new(),
            can_toggle_entry_type: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_relative_time_crosses_midnight() {
        let parsed = ParsedTime::relative(at(0, 10), 30, "vor 30 minuten".to_string());
        assert_eq!(parsed.kind, TimeKind::Relative);
        assert_eq!(parsed.minutes_ago, Some(30));
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!((parsed.hour(), parsed.minute()), (23, 40));
        assert!(!parsed.is_now);
    }

    #[test]
    fn test_default_time_is_now() {
        let parsed = ParsedTime::now(at(9, 15));
        assert_eq!(parsed.kind, TimeKind::None);
        assert!(parsed.is_now);
        assert!(parsed.phrase.is_empty());
    }

    #[test]
    fn test_tablets_from_quarters() {
        let med = ParsedMedication {
            name: "Ibuprofen 400 mg".to_string(),
            medication_id: None,
            is_registered: true,
            dose_quarters: 6,
            dose_text: Some("anderthalb tabletten".to_string()),
            confidence: 0.98,
            needs_review: false,
            matched: None,
        };
        assert_eq!(med.tablets(), 1.5);
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&EntryType::NewEntry).unwrap();
        assert_eq!(json, "\"new_entry\"");
        let json = serde_json::to_string(&MatchKind::SplitToken).unwrap();
        assert_eq!(json, "\"split_token\"");
    }

    #[test]
    fn test_user_medication_defaults_from_json() {
        let med: UserMedication = serde_json::from_str(r#"{"name": "Sumatriptan 50 mg"}"#).unwrap();
        assert_eq!(med.name, "Sumatriptan 50 mg");
        assert!(med.id.is_none());
        assert!(med.active_ingredient.is_none());
    }
}
