//! Time extraction
//!
//! Ordered cascade, first match wins:
//! relative duration → day part (refined by a clock) → clock → immediacy → now.
//! Relative durations run first so the number in "vor 10 Minuten" is never
//! taken for a clock hour.

use std::sync::LazyLock;

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use regex::{Captures, Regex};
use tracing::debug;

use crate::normalizer::{NormalizedUtterance, TokenSpan};
use crate::types::{ConfidenceTier, ParsedTime};
use crate::vocab::is_unit_word;

/// Relative durations are capped at one week
const MAX_RELATIVE_MINUTES: u32 = 7 * 24 * 60;

/// Extracted time plus the tokens it consumed
#[derive(Debug, Clone, PartialEq)]
pub struct TimeExtraction {
    pub time: ParsedTime,
    pub spans: Vec<TokenSpan>,
}

struct TimeContext<'a> {
    utterance: &'a NormalizedUtterance,
    now: NaiveDateTime,
}

type TimeStrategy = fn(&TimeContext) -> Option<TimeExtraction>;

const STRATEGIES: &[(&str, TimeStrategy)] = &[
    ("relative", relative_duration),
    ("day_part", day_part),
    ("clock", absolute_clock),
    ("immediacy", immediacy),
];

/// Extract the time slot. Falls back to "now" when nothing matches.
pub fn extract_time(utterance: &NormalizedUtterance, now: NaiveDateTime) -> TimeExtraction {
    let ctx = TimeContext { utterance, now };
    for (name, strategy) in STRATEGIES {
        if let Some(hit) = strategy(&ctx) {
            debug!("Time matched by {} strategy: '{}'", name, hit.time.phrase);
            return hit;
        }
    }
    TimeExtraction {
        time: ParsedTime::now(now),
        spans: Vec::new(),
    }
}

//=============================================================================
// Relative durations
//=============================================================================

const VOR: &str = r"\b(?:vor|seit)\s+(?:(?:ca|circa|etwa|ungefähr|knapp|gut|fast)\s+)?";
const ARTICLE: &str = r"(?:(?:einer|ner|1)\s+)?";

struct RelativePattern {
    regex: Regex,
    minutes: fn(&Captures) -> Option<u32>,
}

static RELATIVE_PATTERNS: LazyLock<Vec<RelativePattern>> = LazyLock::new(|| {
    let pattern = |re: String, minutes: fn(&Captures) -> Option<u32>| RelativePattern {
        regex: Regex::new(&re).expect("relative time pattern"),
        minutes,
    };
    vec![
        pattern(
            format!(r"{VOR}(?:anderthalb|eineinhalb)\s+stunden?\b"),
            |_| Some(90),
        ),
        pattern(
            format!(r"{VOR}(zwei|drei|vier|fünf)einhalb\s+stunden\b"),
            |c| {
                let hours = match c.get(1)?.as_str() {
                    "zwei" => 2,
                    "drei" => 3,
                    "vier" => 4,
                    _ => 5,
                };
                Some(hours * 60 + 30)
            },
        ),
        pattern(
            format!(r"{VOR}(\d{{1,2}})\s+und\s+{ARTICLE}halben?\s+stunden?\b"),
            |c| Some(c.get(1)?.as_str().parse::<u32>().ok()? * 60 + 30),
        ),
        pattern(format!(r"{VOR}{ARTICLE}halben?\s+stunde\b"), |_| Some(30)),
        pattern(
            format!(r"{VOR}{ARTICLE}dreiviertel\s*stunde\b"),
            |_| Some(45),
        ),
        pattern(format!(r"{VOR}{ARTICLE}viertel\s*stunde\b"), |_| Some(15)),
        pattern(
            format!(r"{VOR}(?:einer|ner|einem|nem)\s+(minute|stunde|tag)\b"),
            |c| Some(unit_minutes(c.get(1)?.as_str())),
        ),
        pattern(
            format!(
                r"{VOR}(\d{{1,3}})(?:[.,](\d))?\s*(min|minute|minuten|std|stunde|stunden|h|tag|tage|tagen)\b"
            ),
            |c| {
                let whole: u32 = c.get(1)?.as_str().parse().ok()?;
                let tenths: u32 = c.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
                let per_unit = unit_minutes(c.get(3)?.as_str());
                Some(whole * per_unit + tenths * per_unit / 10)
            },
        ),
    ]
});

fn unit_minutes(unit: &str) -> u32 {
    match unit {
        "std" | "stunde" | "stunden" | "h" => 60,
        "tag" | "tage" | "tagen" => 24 * 60,
        _ => 1,
    }
}

fn relative_duration(ctx: &TimeContext) -> Option<TimeExtraction> {
    let text = &ctx.utterance.text;
    for pattern in RELATIVE_PATTERNS.iter() {
        let Some(caps) = pattern.regex.captures(text) else {
            continue;
        };
        let Some(minutes) = (pattern.minutes)(&caps) else {
            continue;
        };
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let span = ctx.utterance.span_for_bytes(whole.start(), whole.end());
        let phrase = ctx.utterance.raw_phrase(&span);
        return Some(TimeExtraction {
            time: ParsedTime::relative(ctx.now, minutes.min(MAX_RELATIVE_MINUTES), phrase),
            spans: vec![span],
        });
    }
    None
}

//=============================================================================
// Clock phrases
//=============================================================================

/// A clock reading before date resolution
#[derive(Debug, Clone, PartialEq)]
struct ClockReading {
    hour: u32,
    minute: u32,
    /// Spoken in 12-hour style ("halb 8", "um 8"), AM/PM still open
    twelve_hour: bool,
    span: TokenSpan,
}

struct ClockPattern {
    regex: Regex,
    /// (hour, minute, twelve_hour)
    read: fn(&Captures) -> Option<(u32, u32, bool)>,
    /// Reject when the number is followed by a unit word ("um 8 mg")
    check_unit: bool,
}

fn capture_u32(caps: &Captures, group: usize) -> Option<u32> {
    caps.get(group)?.as_str().parse().ok()
}

/// Hour before the spoken one, for "halb 8" = 7:30
fn previous_hour(hour: u32) -> u32 {
    (hour % 24 + 23) % 24
}

static CLOCK_PATTERNS: LazyLock<Vec<ClockPattern>> = LazyLock::new(|| {
    let pattern = |re: &str, read: fn(&Captures) -> Option<(u32, u32, bool)>, check_unit| {
        ClockPattern {
            regex: Regex::new(re).expect("clock pattern"),
            read,
            check_unit,
        }
    };
    vec![
        pattern(
            r"\b(?:um\s+)?(\d{1,2}):(\d{2})(?:\s+uhr)?\b",
            |c| {
                let hour = capture_u32(c, 1)?;
                let raw_hour = c.get(1)?.as_str();
                // "08:30" and "20:30" are unambiguous, "8:30" is not
                let twelve_hour = hour <= 12 && raw_hour.len() == 1;
                Some((hour, capture_u32(c, 2)?, twelve_hour))
            },
            false,
        ),
        pattern(
            r"\b(?:um\s+)?(\d{1,2})\s+uhr(?:\s+(\d{2}))?\b",
            |c| {
                let hour = capture_u32(c, 1)?;
                let minute = c.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
                Some((hour, minute, hour <= 12))
            },
            false,
        ),
        pattern(
            r"\b(?:um\s+)?viertel\s+nach\s+(\d{1,2})\b",
            |c| {
                let hour = capture_u32(c, 1)?;
                Some((hour, 15, hour <= 12))
            },
            true,
        ),
        pattern(
            r"\b(?:um\s+)?viertel\s+vor\s+(\d{1,2})\b",
            |c| {
                let hour = capture_u32(c, 1)?;
                Some((previous_hour(hour), 45, hour <= 12))
            },
            true,
        ),
        pattern(
            r"\b(?:um\s+)?dreiviertel\s+(\d{1,2})\b",
            |c| {
                let hour = capture_u32(c, 1)?;
                Some((previous_hour(hour), 45, hour <= 12))
            },
            true,
        ),
        pattern(
            r"\b(?:um\s+)?halb\s+(\d{1,2})\b",
            |c| {
                let hour = capture_u32(c, 1)?;
                Some((previous_hour(hour), 30, hour <= 12))
            },
            true,
        ),
        pattern(
            r"\bum\s+(\d{1,2})\b",
            |c| {
                let hour = capture_u32(c, 1)?;
                Some((hour, 0, hour <= 12))
            },
            true,
        ),
    ]
});

fn find_clock(utterance: &NormalizedUtterance) -> Option<ClockReading> {
    for pattern in CLOCK_PATTERNS.iter() {
        for caps in pattern.regex.captures_iter(&utterance.text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let span = utterance.span_for_bytes(whole.start(), whole.end());
            if pattern.check_unit
                && utterance
                    .token(span.end)
                    .is_some_and(|next| is_unit_word(&next.folded) || next.folded == "von")
            {
                continue;
            }
            let Some((hour, minute, twelve_hour)) = (pattern.read)(&caps) else {
                continue;
            };
            return Some(ClockReading {
                hour: hour.min(23),
                minute: minute.min(59),
                twelve_hour,
                span,
            });
        }
    }
    None
}

static DAY_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(heute|gestern|vorgestern)\b").expect("day word pattern"));

fn day_offset(word: &str) -> i64 {
    match word {
        "gestern" => 1,
        "vorgestern" => 2,
        _ => 0,
    }
}

/// Build an instant `days_back` days before `now` at the given clock time
fn at_clock(now: NaiveDateTime, days_back: i64, hour: u32, minute: u32) -> Option<NaiveDateTime> {
    let date = now.date() - Duration::days(days_back);
    let time = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0)?;
    Some(date.and_time(time))
}

/// Most recent past occurrence of a 12-hour reading on an implicit day
fn resolve_implicit(now: NaiveDateTime, reading: &ClockReading) -> Option<NaiveDateTime> {
    let mut candidates = vec![reading.hour];
    if reading.twelve_hour && reading.hour < 12 {
        candidates.push(reading.hour + 12);
    }
    let today: Vec<NaiveDateTime> = candidates
        .iter()
        .filter_map(|&h| at_clock(now, 0, h, reading.minute))
        .filter(|instant| *instant <= now)
        .collect();
    if let Some(latest) = today.into_iter().max() {
        return Some(latest);
    }
    let latest_hour = candidates.iter().copied().max()?;
    at_clock(now, 1, latest_hour, reading.minute)
}

fn absolute_clock(ctx: &TimeContext) -> Option<TimeExtraction> {
    let reading = find_clock(ctx.utterance)?;
    let mut spans = vec![reading.span.clone()];

    let day = DAY_WORD.captures(&ctx.utterance.text).and_then(|c| c.get(1));
    let instant = match day {
        Some(m) if m.as_str() != "heute" => {
            spans.push(ctx.utterance.span_for_bytes(m.start(), m.end()));
            let mut hour = reading.hour;
            // "gestern um 3" is afternoon more often than not
            if reading.twelve_hour && (1..=6).contains(&hour) {
                hour += 12;
            }
            at_clock(ctx.now, day_offset(m.as_str()), hour, reading.minute)?
        }
        Some(m) => {
            spans.push(ctx.utterance.span_for_bytes(m.start(), m.end()));
            resolve_implicit(ctx.now, &reading)?
        }
        None => resolve_implicit(ctx.now, &reading)?,
    };

    spans.sort_by_key(|s| s.start);
    Some(TimeExtraction {
        time: ParsedTime::absolute(instant, ConfidenceTier::High, phrase_of(ctx, &spans)),
        spans,
    })
}

//=============================================================================
// Day parts
//=============================================================================

static DAY_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:(heute|gestern|vorgestern)\s+)?(?:(am|in\s+der|heut)\s+)?(früh|frueh|morgens?|vormittags?|mittags?|nachmittags?|abends?|nachts?)\b",
    )
    .expect("day part pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayPart {
    Early,
    Morning,
    Forenoon,
    Noon,
    Afternoon,
    Evening,
    Night,
}

impl DayPart {
    fn parse(word: &str) -> Option<Self> {
        match word.trim_end_matches('s') {
            "früh" | "frueh" => Some(Self::Early),
            "morgen" => Some(Self::Morning),
            "vormittag" => Some(Self::Forenoon),
            "mittag" => Some(Self::Noon),
            "nachmittag" => Some(Self::Afternoon),
            "abend" => Some(Self::Evening),
            "nacht" => Some(Self::Night),
            _ => None,
        }
    }

    fn default_hour(self, days_back: i64) -> u32 {
        match self {
            Self::Early => 6,
            Self::Morning => 8,
            Self::Forenoon => 10,
            Self::Noon => 12,
            Self::Afternoon => 15,
            Self::Evening => 19,
            // "heute nacht" is the small hours, "gestern nacht" the late evening
            Self::Night if days_back == 0 => 2,
            Self::Night => 23,
        }
    }

    /// Turn a 12-hour clock reading into 24-hour using the day part
    fn apply_to(self, hour: u32) -> u32 {
        match self {
            Self::Afternoon | Self::Evening if (1..12).contains(&hour) => hour + 12,
            Self::Night if (6..12).contains(&hour) => hour + 12,
            Self::Noon if (1..=3).contains(&hour) => hour + 12,
            _ => hour,
        }
    }
}

fn day_part(ctx: &TimeContext) -> Option<TimeExtraction> {
    let (caps, part) = DAY_PART.captures_iter(&ctx.utterance.text).find_map(|caps| {
        let word = caps.get(3)?.as_str();
        let has_day = caps.get(1).is_some();
        let has_prep = caps.get(2).is_some();
        // bare "morgen" means tomorrow, bare "früh" is an adjective
        if matches!(word, "morgen" | "früh" | "frueh") && !has_day && !has_prep {
            return None;
        }
        let part = DayPart::parse(word)?;
        Some((caps, part))
    })?;

    let whole = caps.get(0)?;
    let explicit_day = caps.get(1).map(|m| m.as_str());
    let days_back = explicit_day.map_or(0, day_offset);
    let mut spans = vec![ctx.utterance.span_for_bytes(whole.start(), whole.end())];

    let (hour, minute, confidence) = match find_clock(ctx.utterance) {
        Some(reading) => {
            spans.push(reading.span.clone());
            let hour = if reading.twelve_hour {
                part.apply_to(reading.hour)
            } else {
                reading.hour
            };
            (hour, reading.minute, ConfidenceTier::High)
        }
        None => (part.default_hour(days_back), 0, ConfidenceTier::Medium),
    };

    let mut instant = at_clock(ctx.now, days_back, hour, minute)?;
    let mut confidence = confidence;
    if instant > ctx.now {
        if explicit_day.is_none() {
            instant -= Duration::days(1);
        } else {
            confidence = ConfidenceTier::Low;
        }
    }

    spans.sort_by_key(|s| s.start);
    Some(TimeExtraction {
        time: ParsedTime::absolute(instant, confidence, phrase_of(ctx, &spans)),
        spans,
    })
}

//=============================================================================
// Immediacy
//=============================================================================

static IMMEDIACY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:gerade\s+eben|jetzt\s+gerade|jetzt|gerade|grade|soeben|eben|aktuell|momentan)\b")
        .expect("immediacy pattern")
});

fn immediacy(ctx: &TimeContext) -> Option<TimeExtraction> {
    let m = IMMEDIACY.find(&ctx.utterance.text)?;
    let span = ctx.utterance.span_for_bytes(m.start(), m.end());
    let phrase = ctx.utterance.raw_phrase(&span);
    Some(TimeExtraction {
        time: ParsedTime::relative(ctx.now, 0, phrase),
        spans: vec![span],
    })
}

fn phrase_of(ctx: &TimeContext, spans: &[TokenSpan]) -> String {
    spans
        .iter()
        .map(|s| ctx.utterance.raw_phrase(s))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hour and minute of a parsed time, for logging and tests
pub fn clock_of(time: &ParsedTime) -> (u32, u32) {
    (time.instant.hour(), time.instant.minute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use crate::types::TimeKind;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn extract(text: &str, now: NaiveDateTime) -> TimeExtraction {
        extract_time(&normalize(text), now)
    }

    // ========== Relative ==========

    #[test]
    fn test_relative_minutes() {
        let hit = extract("Seit 30 Minuten Migräne", at(14, 0));
        assert_eq!(hit.time.kind, TimeKind::Relative);
        assert_eq!(hit.time.minutes_ago, Some(30));
        assert_eq!(clock_of(&hit.time), (13, 30));
        assert_eq!(hit.time.confidence, ConfidenceTier::High);
        assert_eq!(hit.time.phrase, "Seit 30 Minuten");
        assert_eq!(hit.spans, vec![0..3]);
    }

    #[test]
    fn test_relative_number_words() {
        let hit = extract("vor zwei Stunden Ibuprofen genommen", at(14, 0));
        assert_eq!(hit.time.minutes_ago, Some(120));
    }

    #[test]
    fn test_relative_idioms() {
        let now = at(14, 0);
        assert_eq!(extract("vor einer halben Stunde", now).time.minutes_ago, Some(30));
        assert_eq!(extract("seit einer Viertelstunde", now).time.minutes_ago, Some(15));
        assert_eq!(extract("vor einer dreiviertel Stunde", now).time.minutes_ago, Some(45));
        assert_eq!(extract("seit anderthalb Stunden", now).time.minutes_ago, Some(90));
        assert_eq!(extract("vor eineinhalb Stunden", now).time.minutes_ago, Some(90));
        assert_eq!(extract("vor zweieinhalb Stunden", now).time.minutes_ago, Some(150));
        assert_eq!(extract("vor 2 und einer halben Stunde", now).time.minutes_ago, Some(150));
        assert_eq!(extract("vor einer Stunde", now).time.minutes_ago, Some(60));
        assert_eq!(extract("seit 1,5 Stunden", now).time.minutes_ago, Some(90));
    }

    #[test]
    fn test_relative_capped_at_one_week() {
        let hit = extract("seit 30 Tagen", at(14, 0));
        assert_eq!(hit.time.minutes_ago, Some(MAX_RELATIVE_MINUTES));
    }

    #[test]
    fn test_relative_beats_clock() {
        // the 10 must never become 10 o'clock
        let hit = extract("vor 10 Minuten schmerzstärke 5", at(14, 0));
        assert_eq!(hit.time.kind, TimeKind::Relative);
        assert_eq!(hit.time.minutes_ago, Some(10));
    }

    // ========== Day parts ==========

    #[test]
    fn test_day_part_defaults() {
        let hit = extract("gestern abend Migräne", at(9, 0));
        assert_eq!(hit.time.kind, TimeKind::Absolute);
        assert_eq!(hit.time.confidence, ConfidenceTier::Medium);
        assert_eq!(hit.time.date, NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
        assert_eq!(clock_of(&hit.time), (19, 0));

        let hit = extract("heute morgen Kopfweh", at(11, 0));
        assert_eq!(clock_of(&hit.time), (8, 0));
        assert_eq!(hit.time.date, NaiveDate::from_ymd_opt(2024, 5, 14).unwrap());
    }

    #[test]
    fn test_day_part_refined_by_clock() {
        let hit = extract("gestern abend um halb 9", at(9, 0));
        assert_eq!(clock_of(&hit.time), (20, 30));
        assert_eq!(hit.time.confidence, ConfidenceTier::High);
        assert_eq!(hit.time.date, NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
    }

    #[test]
    fn test_implicit_day_part_rolls_back() {
        // "abends" said in the morning means last evening
        let hit = extract("abends Migräne", at(8, 0));
        assert_eq!(hit.time.date, NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
        assert_eq!(clock_of(&hit.time), (19, 0));
    }

    #[test]
    fn test_bare_morgen_is_not_a_day_part() {
        let hit = extract("morgen Termin beim Arzt", at(8, 0));
        assert_eq!(hit.time.kind, TimeKind::None);
    }

    // ========== Clock ==========

    #[test]
    fn test_explicit_clock() {
        let hit = extract("um 14:30 Uhr Sumatriptan", at(16, 0));
        assert_eq!(hit.time.kind, TimeKind::Absolute);
        assert_eq!(clock_of(&hit.time), (14, 30));
        assert_eq!(hit.time.confidence, ConfidenceTier::High);
    }

    #[test]
    fn test_twelve_hour_resolves_to_recent_past() {
        assert_eq!(clock_of(&extract("um 8 Uhr", at(21, 0)).time), (20, 0));
        assert_eq!(clock_of(&extract("um 8 Uhr", at(9, 0)).time), (8, 0));
        assert_eq!(clock_of(&extract("halb 3", at(16, 0)).time), (14, 30));
        assert_eq!(clock_of(&extract("viertel nach 7", at(8, 0)).time), (7, 15));
        assert_eq!(clock_of(&extract("viertel vor 7", at(8, 0)).time), (6, 45));
        assert_eq!(clock_of(&extract("um 8 uhr 30", at(9, 0)).time), (8, 30));
    }

    #[test]
    fn test_future_clock_rolls_to_yesterday() {
        let hit = extract("um 23:00", at(7, 0));
        assert_eq!(hit.time.date, NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
        assert_eq!(clock_of(&hit.time), (23, 0));
    }

    #[test]
    fn test_clock_with_yesterday() {
        let hit = extract("gestern um 20 Uhr Ibuprofen", at(7, 0));
        assert_eq!(hit.time.date, NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
        assert_eq!(clock_of(&hit.time), (20, 0));
        assert_eq!(hit.spans.len(), 2);
    }

    #[test]
    fn test_clock_values_clamped() {
        let hit = extract("um 27:75", at(23, 59));
        assert_eq!(clock_of(&hit.time), (23, 59));
    }

    #[test]
    fn test_um_followed_by_unit_is_not_clock() {
        let hit = extract("um 2 Tabletten", at(9, 0));
        assert_eq!(hit.time.kind, TimeKind::None);
    }

    // ========== Immediacy & default ==========

    #[test]
    fn test_immediacy() {
        let hit = extract("jetzt gerade starke Kopfschmerzen", at(9, 0));
        assert!(hit.time.is_now);
        assert_eq!(hit.time.minutes_ago, Some(0));
        assert_eq!(hit.time.instant, at(9, 0));
        assert_eq!(hit.time.phrase, "jetzt gerade");
    }

    #[test]
    fn test_default_now() {
        let hit = extract("Stress im Büro", at(9, 0));
        assert_eq!(hit.time.kind, TimeKind::None);
        assert!(hit.time.is_now);
        assert!(hit.spans.is_empty());
    }
}
