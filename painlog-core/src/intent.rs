//! Voice command intent planning
//!
//! Scores a free-form command against a table of keyword rules, extracts the
//! slots an intent needs with the regular voice parser, and reports the best
//! candidate with its margin over the runner-up. The result feeds the policy
//! gate through [`IntentPlan::policy_input`].

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ParserConfig;
use crate::lexicon::MedicationLexicon;
use crate::normalizer::{NormalizedUtterance, normalize};
use crate::parser::VoiceParser;
use crate::policy::{InputSource, PolicyInput};
use crate::types::{ConfidenceTier, ParsedTime, TimeKind, VoiceParseResult};

/// Broad kind of a command, as seen by the policy gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Navigate,
    Query,
    Mutation,
    SlotFilling,
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    OpenDiary,
    OpenAnalytics,
    OpenMedications,
    OpenSettings,
    OpenReminders,
    OpenReport,
    QueryPainStatistics,
    QueryMedicationUsage,
    QueryLastEntry,
    CreateEntry,
    AddContextNote,
    CreateReminder,
    EditLastEntry,
    DeleteLastEntry,
    DeleteEntriesByDate,
    /// A bare answer to a pending question ("um 8 Uhr")
    SlotFragment,
    Unknown,
}

impl IntentKind {
    pub fn category(self) -> IntentCategory {
        match self {
            Self::OpenDiary
            | Self::OpenAnalytics
            | Self::OpenMedications
            | Self::OpenSettings
            | Self::OpenReminders
            | Self::OpenReport => IntentCategory::Navigate,
            Self::QueryPainStatistics | Self::QueryMedicationUsage | Self::QueryLastEntry => {
                IntentCategory::Query
            }
            Self::CreateEntry
            | Self::AddContextNote
            | Self::CreateReminder
            | Self::EditLastEntry
            | Self::DeleteLastEntry
            | Self::DeleteEntriesByDate => IntentCategory::Mutation,
            Self::SlotFragment => IntentCategory::SlotFilling,
            Self::Unknown => IntentCategory::NotSupported,
        }
    }

    pub fn is_destructive(self) -> bool {
        matches!(self, Self::DeleteLastEntry | Self::DeleteEntriesByDate)
    }

    pub fn required_slots(self) -> &'static [SlotName] {
        match self {
            Self::CreateReminder => &[SlotName::Time],
            Self::DeleteEntriesByDate => &[SlotName::Date],
            Self::CreateEntry => &[SlotName::PainOrMedication],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Time,
    Date,
    PainOrMedication,
}

impl SlotName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Date => "date",
            Self::PainOrMedication => "pain_or_medication",
        }
    }
}

/// Parameters extracted from a command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentSlots {
    pub time: Option<ParsedTime>,
    pub date: Option<NaiveDate>,
    pub pain: Option<u8>,
    #[serde(default)]
    pub medications: Vec<String>,
    pub note: Option<String>,
}

impl IntentSlots {
    fn has(&self, slot: SlotName) -> bool {
        match slot {
            SlotName::Time => self.time.is_some(),
            SlotName::Date => self.date.is_some(),
            SlotName::PainOrMedication => self.pain.is_some() || !self.medications.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCandidate {
    pub kind: IntentKind,
    pub score: f32,
}

/// The planner's reading of one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentPlan {
    pub kind: IntentKind,
    pub category: IntentCategory,
    pub confidence: f32,
    /// Margin over the runner-up, absent when nothing else matched
    pub score_gap: Option<f32>,
    pub slots: IntentSlots,
    pub missing_slots: Vec<SlotName>,
    /// Bare fragment with more than one plausible reading ("acht")
    pub ambiguous: bool,
    pub destructive: bool,
    /// Other candidates, best first
    pub alternatives: Vec<IntentCandidate>,
}

impl IntentPlan {
    /// Input for [`crate::policy::evaluate_policy`]
    pub fn policy_input(&self, source: InputSource) -> PolicyInput {
        PolicyInput {
            source,
            confidence: self.confidence,
            category: self.category,
            destructive: self.destructive,
            score_gap: self.score_gap,
            missing_slots: self.missing_slots.clone(),
            ambiguous: self.ambiguous,
        }
    }
}

// ========== Rules ==========

/// Stems ending in `*` match any token with that prefix, others match whole
/// tokens only
struct IntentRule {
    kind: IntentKind,
    /// Every group needs at least one matching token
    all_of: &'static [&'static [&'static str]],
    boosts: &'static [&'static str],
}

const BASE_SCORE: f32 = 0.7;
const BOOST: f32 = 0.1;
const MAX_BOOSTS: usize = 2;
const SLOT_BONUS: f32 = 0.1;
const MAX_RULE_SCORE: f32 = 0.95;
const FRAGMENT_AMBIGUOUS_CONFIDENCE: f32 = 0.5;

const NAV_VERBS: &[&str] = &[
    "oeffne", "oeffnen", "zeig*", "geh", "gehe", "wechsel*", "navigier*", "bring", "springe",
    "zum", "zur",
];

const QUESTION_WORDS: &[&str] = &[
    "wie", "wieviel", "wieviele", "wann", "was", "welche*", "hatte", "gab",
];

const QUERY_BOOSTS: &[&str] = &["oft", "viele", "woche", "monat", "letzte*", "diese*"];

const RULES: &[IntentRule] = &[
    IntentRule {
        kind: IntentKind::OpenDiary,
        all_of: &[&["tagebuch*", "kalender*", "verlauf*", "uebersicht*"]],
        boosts: NAV_VERBS,
    },
    IntentRule {
        kind: IntentKind::OpenAnalytics,
        all_of: &[&[
            "auswertung*",
            "analyse*",
            "analytics",
            "diagramm*",
            "grafik*",
            "trend*",
            "statistik*",
        ]],
        boosts: NAV_VERBS,
    },
    IntentRule {
        kind: IntentKind::OpenMedications,
        all_of: &[&[
            "medikamente",
            "medikamentenliste",
            "medikamentenplan",
            "medikamentenuebersicht",
            "arzneimittel",
        ]],
        boosts: NAV_VERBS,
    },
    IntentRule {
        kind: IntentKind::OpenSettings,
        all_of: &[&["einstellung*", "optionen"]],
        boosts: NAV_VERBS,
    },
    IntentRule {
        kind: IntentKind::OpenReminders,
        all_of: &[&["erinnerungen"]],
        boosts: NAV_VERBS,
    },
    IntentRule {
        kind: IntentKind::OpenReport,
        all_of: &[&["bericht*", "report*", "arztbericht*", "export*", "pdf"]],
        boosts: &["oeffne", "zeig*", "erstell*"],
    },
    IntentRule {
        kind: IntentKind::QueryPainStatistics,
        all_of: &[
            QUESTION_WORDS,
            &[
                "schmerz*",
                "migraene*",
                "kopfschmerz*",
                "kopfweh",
                "attacke*",
                "durchschnitt*",
                "schnitt",
            ],
        ],
        boosts: QUERY_BOOSTS,
    },
    IntentRule {
        kind: IntentKind::QueryMedicationUsage,
        all_of: &[
            QUESTION_WORDS,
            &[
                "medikament*",
                "tablette*",
                "eingenommen",
                "genommen",
                "einnahme*",
                "verbrauch*",
                "triptan*",
                "schmerzmittel*",
            ],
        ],
        boosts: QUERY_BOOSTS,
    },
    IntentRule {
        kind: IntentKind::QueryLastEntry,
        all_of: &[QUESTION_WORDS, &["letzte*", "zuletzt"], &["eintrag*"]],
        boosts: &["war", "mein*"],
    },
    IntentRule {
        kind: IntentKind::CreateEntry,
        all_of: &[&[
            "neue*",
            "eintragen",
            "trage",
            "erfasse*",
            "protokollier*",
            "dokumentier*",
            "logge*",
        ]],
        boosts: &["eintrag*", "migraene*", "schmerz*"],
    },
    IntentRule {
        kind: IntentKind::AddContextNote,
        all_of: &[&["notiz*", "kontext*", "anmerkung*", "kommentar*"]],
        boosts: &["fuege", "hinzu", "notier*", "schreib*"],
    },
    IntentRule {
        kind: IntentKind::CreateReminder,
        all_of: &[&["erinnerung", "erinnere", "wecker"]],
        boosts: &["erstell*", "stell*", "setz*", "neue*", "mich", "taeglich"],
    },
    IntentRule {
        kind: IntentKind::EditLastEntry,
        all_of: &[&["aender*", "bearbeit*", "korrigier*"]],
        boosts: &["letzte*", "eintrag"],
    },
    IntentRule {
        kind: IntentKind::DeleteLastEntry,
        all_of: &[&["loesch*", "entfern*"]],
        boosts: &["letzte*", "eintrag", "zuletzt"],
    },
    IntentRule {
        kind: IntentKind::DeleteEntriesByDate,
        all_of: &[&["loesch*", "entfern*"]],
        boosts: &["alle", "eintraege", "vom", "von"],
    },
];

fn matches_stem(token: &str, stem: &str) -> bool {
    match stem.strip_suffix('*') {
        Some(prefix) => token.starts_with(prefix),
        None => token == stem,
    }
}

fn any_match(tokens: &[&str], stems: &[&str]) -> bool {
    stems
        .iter()
        .any(|stem| tokens.iter().any(|t| matches_stem(t, stem)))
}

impl IntentRule {
    fn score(&self, tokens: &[&str]) -> Option<f32> {
        if !self.all_of.iter().all(|group| any_match(tokens, group)) {
            return None;
        }
        let boosts = self
            .boosts
            .iter()
            .filter(|stem| tokens.iter().any(|t| matches_stem(t, stem)))
            .count()
            .min(MAX_BOOSTS);
        Some(BASE_SCORE + BOOST * boosts as f32)
    }
}

// ========== Dates ==========

static NUMERIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})\.(\d{1,2})(?:\.(\d{2}|\d{4}))?$").expect("numeric date pattern")
});

/// Date named in the command: day words, "12.3.", or the day of an absolute time
fn extract_date(
    utterance: &NormalizedUtterance,
    time: &ParsedTime,
    now: NaiveDateTime,
) -> Option<NaiveDate> {
    let today = now.date();
    for token in &utterance.tokens {
        let days_back = match token.folded.as_str() {
            "heute" => Some(0),
            "gestern" => Some(1),
            "vorgestern" => Some(2),
            _ => None,
        };
        if let Some(days) = days_back {
            return Some(today - Duration::days(days));
        }

        if let Some(date) = numeric_date(&token.text, today) {
            return Some(date);
        }
    }
    (time.kind == TimeKind::Absolute).then_some(time.date)
}

/// "3.5.", "24.12.2023"; None for impossible dates like "32.13."
fn numeric_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = NUMERIC_DATE.captures(text)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let explicit_year = caps
        .get(3)
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .map(|y| if y < 100 { 2000 + y } else { y });
    let date = NaiveDate::from_ymd_opt(explicit_year.unwrap_or(today.year()), month, day)?;
    // a diary date without a year is never in the future
    if explicit_year.is_none() && date > today {
        return NaiveDate::from_ymd_opt(today.year() - 1, month, day);
    }
    Some(date)
}

// ========== Planner ==========

/// Plans voice commands, reusing the voice parser for slots
#[derive(Debug, Clone, Default)]
pub struct IntentPlanner {
    parser: VoiceParser,
}

impl IntentPlanner {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            parser: VoiceParser::new(config),
        }
    }

    pub fn plan(
        &self,
        command: &str,
        lexicon: &MedicationLexicon,
        now: NaiveDateTime,
    ) -> IntentPlan {
        let utterance = normalize(command);
        let parsed = self.parser.parse_at(command, lexicon, now);
        let tokens: Vec<&str> = utterance.tokens.iter().map(|t| t.folded.as_str()).collect();

        let slots = IntentSlots {
            time: (parsed.time.kind != TimeKind::None).then(|| parsed.time.clone()),
            date: extract_date(&utterance, &parsed.time, now),
            pain: parsed.pain.value,
            medications: parsed.medications.iter().map(|m| m.name.clone()).collect(),
            note: (!parsed.note.is_empty()).then(|| parsed.note.clone()),
        };

        let mut candidates: Vec<IntentCandidate> = RULES
            .iter()
            .filter_map(|rule| {
                let mut score = rule.score(&tokens)?;
                if rule.kind == IntentKind::CreateEntry && slots.has(SlotName::PainOrMedication)
                {
                    score += SLOT_BONUS;
                }
                if rule.kind == IntentKind::DeleteEntriesByDate && slots.date.is_some() {
                    score += SLOT_BONUS;
                }
                Some(IntentCandidate {
                    kind: rule.kind,
                    score: score.min(MAX_RULE_SCORE),
                })
            })
            .collect();

        let mut ambiguous = false;
        if candidates.is_empty() {
            if let Some(candidate) = implicit_candidate(&tokens, &parsed, &slots) {
                candidates.push(candidate);
            } else if is_bare_number(&utterance) {
                ambiguous = true;
                candidates.push(IntentCandidate {
                    kind: IntentKind::SlotFragment,
                    score: FRAGMENT_AMBIGUOUS_CONFIDENCE,
                });
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut candidates = candidates.into_iter();
        let Some(best) = candidates.next() else {
            debug!("No intent recognised for '{}'", command);
            return IntentPlan {
                kind: IntentKind::Unknown,
                category: IntentCategory::NotSupported,
                confidence: 0.0,
                score_gap: None,
                slots,
                missing_slots: Vec::new(),
                ambiguous: false,
                destructive: false,
                alternatives: Vec::new(),
            };
        };
        let alternatives: Vec<IntentCandidate> = candidates.collect();
        let score_gap = alternatives.first().map(|second| best.score - second.score);

        let missing_slots: Vec<SlotName> = best
            .kind
            .required_slots()
            .iter()
            .copied()
            .filter(|slot| !slots.has(*slot))
            .collect();

        debug!(
            "Planned {:?} ({:.2}, gap {:?}, missing {:?})",
            best.kind, best.score, score_gap, missing_slots
        );

        IntentPlan {
            kind: best.kind,
            category: best.kind.category(),
            confidence: best.score,
            score_gap,
            slots,
            missing_slots,
            ambiguous,
            destructive: best.kind.is_destructive(),
            alternatives,
        }
    }
}

/// Commands without keywords: a bare entry ("Migräne Stärke 7, Ibuprofen")
/// or a bare time answering a question ("um 8 Uhr")
fn implicit_candidate(
    tokens: &[&str],
    parsed: &VoiceParseResult,
    slots: &IntentSlots,
) -> Option<IntentCandidate> {
    let is_question = any_match(tokens, QUESTION_WORDS);
    if slots.has(SlotName::PainOrMedication) && !is_question {
        return Some(IntentCandidate {
            kind: IntentKind::CreateEntry,
            score: 0.5 + 0.5 * parsed.confidence,
        });
    }
    if slots.time.is_some() && parsed.note.is_empty() {
        let score = match parsed.time.confidence {
            ConfidenceTier::High => 0.9,
            ConfidenceTier::Medium => 0.75,
            ConfidenceTier::Low => 0.5,
        };
        return Some(IntentCandidate {
            kind: IntentKind::SlotFragment,
            score,
        });
    }
    None
}

/// "8" or "8 9": could be a pain value, a time or a dose
fn is_bare_number(utterance: &NormalizedUtterance) -> bool {
    !utterance.is_empty()
        && utterance.len() <= 2
        && utterance
            .tokens
            .iter()
            .all(|t| !t.folded.is_empty() && t.folded.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserMedication;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 12)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
    }

    fn plan(command: &str) -> IntentPlan {
        let lexicon = MedicationLexicon::build(&[
            UserMedication::new("Ibuprofen 400 mg"),
            UserMedication::new("Sumatriptan 50 mg"),
        ]);
        IntentPlanner::default().plan(command, &lexicon, now())
    }

    #[test]
    fn test_stem_matching() {
        assert!(matches_stem("letzten", "letzte*"));
        assert!(!matches_stem("eintraege", "eintrag"));
        assert!(matches_stem("eintrag", "eintrag"));
    }

    // ========== Navigation and queries ==========

    #[test]
    fn test_open_diary() {
        let plan = plan("Öffne das Tagebuch");
        assert_eq!(plan.kind, IntentKind::OpenDiary);
        assert_eq!(plan.category, IntentCategory::Navigate);
        assert!((plan.confidence - 0.8).abs() < 1e-6);
        assert!(plan.score_gap.is_none());
    }

    #[test]
    fn test_reminders_list_vs_new_reminder() {
        assert_eq!(plan("Zeig meine Erinnerungen").kind, IntentKind::OpenReminders);
        assert_eq!(
            plan("Erstelle eine Erinnerung um 20 Uhr").kind,
            IntentKind::CreateReminder
        );
    }

    #[test]
    fn test_queries() {
        assert_eq!(
            plan("Wie oft hatte ich diesen Monat Migräne").kind,
            IntentKind::QueryPainStatistics
        );
        assert_eq!(
            plan("Wie viele Tabletten habe ich diese Woche genommen").kind,
            IntentKind::QueryMedicationUsage
        );
        let last = plan("Wann war mein letzter Eintrag");
        assert_eq!(last.kind, IntentKind::QueryLastEntry);
        assert_eq!(last.category, IntentCategory::Query);
    }

    // ========== Mutations ==========

    #[test]
    fn test_delete_last_entry() {
        let plan = plan("Lösche den letzten Eintrag");
        assert_eq!(plan.kind, IntentKind::DeleteLastEntry);
        assert!(plan.destructive);
        assert!(plan.score_gap.unwrap() > 0.15);
    }

    #[test]
    fn test_delete_by_date() {
        let plan = plan("Lösche alle Einträge von gestern");
        assert_eq!(plan.kind, IntentKind::DeleteEntriesByDate);
        assert_eq!(plan.slots.date, NaiveDate::from_ymd_opt(2024, 6, 11));
        assert!(plan.missing_slots.is_empty());
        assert!(plan.destructive);
    }

    #[test]
    fn test_delete_by_date_missing_date() {
        let plan = plan("Lösche alle Einträge");
        assert_eq!(plan.kind, IntentKind::DeleteEntriesByDate);
        assert_eq!(plan.missing_slots, vec![SlotName::Date]);
    }

    #[test]
    fn test_numeric_date() {
        let plan = plan("Lösche alle Einträge vom 3.5.");
        assert_eq!(plan.slots.date, NaiveDate::from_ymd_opt(2024, 5, 3));
        let plan = self::plan("Lösche alle Einträge vom 24.12.");
        assert_eq!(plan.slots.date, NaiveDate::from_ymd_opt(2023, 12, 24));
    }

    #[test]
    fn test_invalid_numeric_date_skipped() {
        let plan = plan("Lösche alle Einträge vom 32.13. gestern");
        assert_eq!(plan.slots.date, NaiveDate::from_ymd_opt(2024, 6, 11));
    }

    #[test]
    fn test_reminder_requires_time() {
        let plan = plan("Erstelle eine Erinnerung");
        assert_eq!(plan.kind, IntentKind::CreateReminder);
        assert_eq!(plan.missing_slots, vec![SlotName::Time]);
    }

    #[test]
    fn test_reminder_with_medication_stays_reminder() {
        let plan = plan("Erinnere mich um 20 Uhr an Sumatriptan");
        assert_eq!(plan.kind, IntentKind::CreateReminder);
        assert!(plan.slots.time.is_some());
        assert_eq!(plan.slots.medications, vec!["Sumatriptan 50 mg".to_string()]);
    }

    #[test]
    fn test_implicit_entry() {
        let plan = plan("Migräne Stärke 7, Ibuprofen genommen");
        assert_eq!(plan.kind, IntentKind::CreateEntry);
        assert_eq!(plan.slots.pain, Some(7));
        assert!(plan.confidence >= 0.9);
        assert!(plan.missing_slots.is_empty());
    }

    #[test]
    fn test_new_entry_without_slots() {
        let plan = plan("Neuer Eintrag");
        assert_eq!(plan.kind, IntentKind::CreateEntry);
        assert_eq!(plan.missing_slots, vec![SlotName::PainOrMedication]);
    }

    #[test]
    fn test_context_note_slot() {
        let plan = plan("Notiz: schlecht geschlafen");
        assert_eq!(plan.kind, IntentKind::AddContextNote);
        assert_eq!(plan.slots.note.as_deref(), Some("schlecht geschlafen"));
    }

    // ========== Fragments ==========

    #[test]
    fn test_bare_number_is_ambiguous() {
        let plan = plan("acht");
        assert_eq!(plan.kind, IntentKind::SlotFragment);
        assert_eq!(plan.category, IntentCategory::SlotFilling);
        assert!(plan.ambiguous);
    }

    #[test]
    fn test_bare_time_fragment() {
        let plan = plan("um 8 Uhr");
        assert_eq!(plan.kind, IntentKind::SlotFragment);
        assert!(!plan.ambiguous);
        assert!(plan.slots.time.is_some());
    }

    #[test]
    fn test_unknown_command() {
        let plan = plan("Wie ist das Wetter");
        assert_eq!(plan.kind, IntentKind::Unknown);
        assert_eq!(plan.category, IntentCategory::NotSupported);
        assert_eq!(plan.confidence, 0.0);
    }
}
