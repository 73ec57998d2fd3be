//! Recurrence intervals and Turkish time phrases.
//!
//! Recognized recurrence forms: `hourly|daily|weekly|monthly`, their Turkish
//! equivalents (`saatlik|günlük|haftalık|aylık`), and the shorthand
//! `NNm|NNh|NNd|NNw`. Unrecognized intervals yield `None`; the scheduler
//! marks such reminders done instead of looping on them.

use std::sync::OnceLock;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use regex::Regex;

fn shorthand_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^(\d+)\s*([mhdw])$").unwrap()
    })
}

/// Next fire time for a recurring reminder, from the time it last fired.
///
/// Deterministic: the same `(last_fire, interval)` always yields the same
/// result. `monthly` is a fixed 30 days.
pub fn compute_next_occurrence(last_fire: NaiveDateTime, interval: &str) -> Option<NaiveDateTime> {
    let key = interval.trim().to_lowercase();
    let delta = match key.as_str() {
        "hourly" | "saatlik" => Some(Duration::hours(1)),
        "daily" | "günlük" => Some(Duration::days(1)),
        "weekly" | "haftalık" => Some(Duration::weeks(1)),
        "monthly" | "aylık" => Some(Duration::days(30)),
        _ => None,
    };
    if let Some(delta) = delta {
        return last_fire.checked_add_signed(delta);
    }

    let captures = shorthand_re().captures(&key)?;
    let amount: i64 = captures.get(1)?.as_str().parse().ok()?;
    let delta = match captures.get(2)?.as_str() {
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        "w" => Duration::weeks(amount),
        _ => return None,
    };
    last_fire.checked_add_signed(delta)
}

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^(\d+)\s*(dakika|dk|saat|sa|saniye|sn)\s*sonra$").unwrap()
    })
}

fn tomorrow_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^yarın\s*(\d{1,2})[:.](\d{2})$").unwrap()
    })
}

fn clock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^(?:bugün\s*)?(\d{1,2})[:.](\d{2})$").unwrap()
    })
}

/// Parse a Turkish time phrase relative to `now`.
///
/// Supported: `"20:00"`, `"bugün 20:00"`, `"yarın 9:00"`,
/// `"5 dakika sonra"`, `"2 saat sonra"`, `"30 saniye sonra"`. A bare clock
/// time already in the past rolls to tomorrow.
pub fn parse_time_phrase(phrase: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let phrase = phrase.trim().to_lowercase();

    if let Some(captures) = relative_re().captures(&phrase) {
        let amount: i64 = captures.get(1)?.as_str().parse().ok()?;
        let delta = match captures.get(2)?.as_str() {
            "dakika" | "dk" => Duration::minutes(amount),
            "saat" | "sa" => Duration::hours(amount),
            "saniye" | "sn" => Duration::seconds(amount),
            _ => return None,
        };
        return now.checked_add_signed(delta);
    }

    if let Some(captures) = tomorrow_re().captures(&phrase) {
        let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
        let minute: u32 = captures.get(2)?.as_str().parse().ok()?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        return Some(now.date().checked_add_signed(Duration::days(1))?.and_time(time));
    }

    if let Some(captures) = clock_re().captures(&phrase) {
        let hour: u32 = captures.get(1)?.as_str().parse().ok()?;
        let minute: u32 = captures.get(2)?.as_str().parse().ok()?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let mut target = now.date().and_time(time);
        if target <= now {
            target = target.checked_add_signed(Duration::days(1))?;
        }
        return Some(target);
    }

    None
}
