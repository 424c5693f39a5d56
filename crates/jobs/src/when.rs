//! Time expressions for `schedule` and `repeatAt`.
//!
//! Accepted forms (case-insensitive):
//! - RFC 3339 timestamps: `2024-05-10T09:00:00Z`
//! - `now`
//! - relative: `in 5 minutes`, `10 minutes from now`, `2 hours ago`, `5 minutes`
//! - day anchored: `today at 3pm`, `tomorrow`, `tomorrow at noon`
//! - time of day: `3:30pm`, `15:30`, `at 9am`, `noon`, `midnight` (next occurrence)

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use agendum_core::{DomainError, DomainResult};

use crate::interval::parse_duration;

/// Argument to `Job::schedule`: an absolute instant or an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleAt {
    At(DateTime<Utc>),
    Expr(String),
}

impl From<DateTime<Utc>> for ScheduleAt {
    fn from(value: DateTime<Utc>) -> Self {
        Self::At(value)
    }
}

impl From<&str> for ScheduleAt {
    fn from(value: &str) -> Self {
        Self::Expr(value.to_string())
    }
}

impl From<String> for ScheduleAt {
    fn from(value: String) -> Self {
        Self::Expr(value)
    }
}

impl ScheduleAt {
    /// Resolve against `now`, reading wall-clock forms in `tz`.
    pub fn resolve(&self, now: DateTime<Utc>, tz: Tz) -> DomainResult<DateTime<Utc>> {
        match self {
            Self::At(at) => Ok(*at),
            Self::Expr(expr) => resolve(expr, now, tz),
        }
    }
}

/// Resolve a time expression to an instant.
pub fn resolve(expr: &str, now: DateTime<Utc>, tz: Tz) -> DomainResult<DateTime<Utc>> {
    let invalid = || DomainError::invalid_time(expr.to_string());
    let trimmed = expr.trim();

    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(at.with_timezone(&Utc));
    }

    let lower = trimmed.to_lowercase();
    let text = lower.as_str();

    if text == "now" {
        return Ok(now);
    }
    if let Some(rest) = text.strip_prefix("in ") {
        return offset(now, rest, 1).ok_or_else(invalid);
    }
    if let Some(rest) = text.strip_suffix(" from now") {
        return offset(now, rest, 1).ok_or_else(invalid);
    }
    if let Some(rest) = text.strip_suffix(" ago") {
        return offset(now, rest, -1).ok_or_else(invalid);
    }

    let today = now.with_timezone(&tz).date_naive();
    if text == "tomorrow" {
        return now.checked_add_signed(Duration::days(1)).ok_or_else(invalid);
    }
    if let Some(rest) = text.strip_prefix("tomorrow at ") {
        let time = parse_time_of_day(rest)?;
        let day = today.succ_opt().ok_or_else(invalid)?;
        return local_instant(day, time, tz).ok_or_else(invalid);
    }
    if let Some(rest) = text.strip_prefix("today at ") {
        let time = parse_time_of_day(rest)?;
        return local_instant(today, time, tz).ok_or_else(invalid);
    }

    let bare = text.strip_prefix("at ").unwrap_or(text);
    if let Ok(time) = parse_time_of_day(bare) {
        return next_time_of_day(time, now, tz).ok_or_else(invalid);
    }

    offset(now, text, 1).ok_or_else(invalid)
}

fn offset(now: DateTime<Utc>, duration: &str, sign: i32) -> Option<DateTime<Utc>> {
    let duration = parse_duration(duration).ok()?;
    if sign < 0 {
        now.checked_sub_signed(duration)
    } else {
        now.checked_add_signed(duration)
    }
}

/// Parse a time of day: `noon`, `midnight`, `15:30`, `15:30:05`, `3pm`,
/// `3:30 pm`, `11:00am`.
pub fn parse_time_of_day(input: &str) -> DomainResult<NaiveTime> {
    let invalid = || DomainError::invalid_time(input.to_string());
    let text = input.trim().to_lowercase();

    match text.as_str() {
        "noon" => return NaiveTime::from_hms_opt(12, 0, 0).ok_or_else(invalid),
        "midnight" => return NaiveTime::from_hms_opt(0, 0, 0).ok_or_else(invalid),
        _ => {}
    }

    let (clock, meridiem) = if let Some(rest) = text.strip_suffix("am") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = text.strip_suffix("pm") {
        (rest.trim_end(), Some(true))
    } else {
        (text.as_str(), None)
    };

    let parts = clock
        .split(':')
        .map(|p| p.parse::<u32>().map_err(|_| invalid()))
        .collect::<DomainResult<Vec<u32>>>()?;

    let (hour, minute, second) = match parts.as_slice() {
        [h] if meridiem.is_some() => (*h, 0, 0),
        [h, m] => (*h, *m, 0),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(invalid()),
    };

    let hour = match meridiem {
        Some(pm) => {
            if !(1..=12).contains(&hour) {
                return Err(invalid());
            }
            match (hour, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, false) => h,
                (h, true) => h + 12,
            }
        }
        None => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(invalid)
}

/// First instant strictly after `after` whose wall-clock time in `tz` is `time`.
pub fn next_time_of_day(time: NaiveTime, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let mut day = after.with_timezone(&tz).date_naive();
    // A DST gap can skip a wall-clock time for a whole day.
    for _ in 0..3 {
        if let Some(candidate) = local_instant(day, time, tz) {
            if candidate > after {
                return Some(candidate);
            }
        }
        day = day.succ_opt()?;
    }
    None
}

fn local_instant(day: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&day.and_time(time))
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 14, 0, 0).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn time_of_day_forms() {
        assert_eq!(parse_time_of_day("noon").unwrap(), hm(12, 0));
        assert_eq!(parse_time_of_day("midnight").unwrap(), hm(0, 0));
        assert_eq!(parse_time_of_day("15:30").unwrap(), hm(15, 30));
        assert_eq!(parse_time_of_day("3pm").unwrap(), hm(15, 0));
        assert_eq!(parse_time_of_day("3:30 PM").unwrap(), hm(15, 30));
        assert_eq!(parse_time_of_day("12am").unwrap(), hm(0, 0));
        assert_eq!(parse_time_of_day("12:15pm").unwrap(), hm(12, 15));
        assert_eq!(
            parse_time_of_day("07:05:09").unwrap(),
            NaiveTime::from_hms_opt(7, 5, 9).unwrap()
        );

        for bad in ["", "25:00", "13pm", "3", "half past", "10:61"] {
            assert!(parse_time_of_day(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn absolute_and_relative_expressions() {
        let tz = Tz::UTC;
        assert_eq!(
            resolve("2024-06-01T08:00:00+02:00", now(), tz).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()
        );
        assert_eq!(resolve("now", now(), tz).unwrap(), now());
        assert_eq!(
            resolve("in 5 minutes", now(), tz).unwrap(),
            now() + Duration::minutes(5)
        );
        assert_eq!(
            resolve("2 hours from now", now(), tz).unwrap(),
            now() + Duration::hours(2)
        );
        assert_eq!(
            resolve("1 day ago", now(), tz).unwrap(),
            now() - Duration::days(1)
        );
        assert_eq!(
            resolve("10 minutes", now(), tz).unwrap(),
            now() + Duration::minutes(10)
        );
    }

    #[test]
    fn day_anchored_expressions() {
        let tz = Tz::UTC;
        assert_eq!(
            resolve("tomorrow at noon", now(), tz).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 11, 12, 0, 0).unwrap()
        );
        assert_eq!(
            resolve("today at 9am", now(), tz).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
        );
        assert_eq!(
            resolve("tomorrow", now(), tz).unwrap(),
            now() + Duration::days(1)
        );
    }

    #[test]
    fn bare_time_rolls_to_next_occurrence() {
        let tz = Tz::UTC;
        assert_eq!(
            resolve("3pm", now(), tz).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 10, 15, 0, 0).unwrap()
        );
        assert_eq!(
            resolve("at 9am", now(), tz).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 11, 9, 0, 0).unwrap()
        );
        // Exactly now is not "after" now.
        assert_eq!(
            resolve("14:00", now(), tz).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 11, 14, 0, 0).unwrap()
        );
    }

    #[test]
    fn wall_clock_is_read_in_timezone() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        // 14:00 UTC is 16:00 in Berlin (CEST), so 17:00 local is 15:00 UTC today.
        assert_eq!(
            resolve("5pm", now(), tz).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 10, 15, 0, 0).unwrap()
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            resolve("whenever you like", now(), Tz::UTC),
            Err(DomainError::InvalidTime(_))
        ));
        assert!(ScheduleAt::from("in a jiffy").resolve(now(), Tz::UTC).is_err());
    }

    #[test]
    fn absolute_argument_passes_through() {
        let at = now() + Duration::hours(3);
        assert_eq!(ScheduleAt::from(at).resolve(now(), Tz::UTC).unwrap(), at);
    }
}
