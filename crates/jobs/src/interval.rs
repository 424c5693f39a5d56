//! Recurrence grammar for `repeatInterval`.
//!
//! An interval is either a cron expression (5, 6 or 7 fields; five-field
//! expressions get a leading seconds field of `0`) or a human duration such as
//! `"1 day"`, `"2 hours and 30 minutes"`, `"one minute"`, `"90s"` or a bare
//! number of milliseconds.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;

use agendum_core::{DomainError, DomainResult};

/// A parsed `repeatInterval`.
#[derive(Debug, Clone)]
pub enum RepeatInterval {
    /// Cron schedule (boxed to keep the enum small).
    Cron(Box<CronSchedule>),
    /// Fixed duration between runs.
    Every(Duration),
}

impl RepeatInterval {
    /// Parse an interval, trying cron first and falling back to a duration.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_interval("empty interval"));
        }
        if let Some(schedule) = parse_cron(trimmed) {
            return Ok(Self::Cron(Box::new(schedule)));
        }
        parse_duration(trimmed).map(Self::Every)
    }

    /// Next run strictly after `reference`.
    ///
    /// Cron fields are evaluated in `tz`; durations are zone-independent.
    pub fn next_after(&self, reference: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule
                .after(&reference.with_timezone(&tz))
                .next()
                .map(|at| at.with_timezone(&Utc)),
            Self::Every(every) => reference.checked_add_signed(*every),
        }
    }
}

fn parse_cron(expr: &str) -> Option<CronSchedule> {
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {expr}"),
        6 | 7 => expr.to_string(),
        _ => return None,
    };
    CronSchedule::from_str(&normalized).ok()
}

/// Resolve an optional IANA timezone name; absent means UTC.
pub fn parse_timezone(name: Option<&str>) -> DomainResult<Tz> {
    match name {
        None => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| DomainError::invalid_timezone(name.to_string())),
    }
}

const SECOND_MS: f64 = 1_000.0;
const MINUTE_MS: f64 = 60.0 * SECOND_MS;
const HOUR_MS: f64 = 60.0 * MINUTE_MS;
const DAY_MS: f64 = 24.0 * HOUR_MS;
const WEEK_MS: f64 = 7.0 * DAY_MS;
const MONTH_MS: f64 = 30.0 * DAY_MS;
const YEAR_MS: f64 = 365.0 * DAY_MS;

fn unit_ms(unit: &str) -> Option<f64> {
    let ms = match unit {
        "ms" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND_MS,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE_MS,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR_MS,
        "d" | "day" | "days" => DAY_MS,
        "w" | "week" | "weeks" => WEEK_MS,
        "month" | "months" => MONTH_MS,
        "y" | "year" | "years" => YEAR_MS,
        _ => return None,
    };
    Some(ms)
}

fn number_word(word: &str) -> Option<f64> {
    let n = match word {
        "a" | "an" | "one" => 1.0,
        "two" => 2.0,
        "three" => 3.0,
        "four" => 4.0,
        "five" => 5.0,
        "six" => 6.0,
        "seven" => 7.0,
        "eight" => 8.0,
        "nine" => 9.0,
        "ten" => 10.0,
        "eleven" => 11.0,
        "twelve" => 12.0,
        _ => return None,
    };
    Some(n)
}

fn parse_amount(token: &str) -> Option<f64> {
    token
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .or_else(|| number_word(token))
}

/// Parse a human duration.
///
/// Terms may be separated by spaces, commas or `and`; a term is an amount
/// followed by a unit (`"3 days"`) or glued to it (`"3d"`). A lone number is
/// milliseconds. The total must be positive.
pub fn parse_duration(input: &str) -> DomainResult<Duration> {
    let invalid = || DomainError::invalid_interval(input.to_string());
    let normalized = input.trim().to_lowercase().replace(',', " ");

    if let Ok(ms) = normalized.parse::<i64>() {
        return if ms > 0 {
            Ok(Duration::milliseconds(ms))
        } else {
            Err(invalid())
        };
    }

    let tokens: Vec<&str> = normalized
        .split_whitespace()
        .filter(|t| *t != "and")
        .collect();

    let mut total_ms = 0.0;
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if let Some(amount) = parse_amount(token) {
            let unit = tokens.get(i + 1).copied().ok_or_else(invalid)?;
            total_ms += amount * unit_ms(unit).ok_or_else(invalid)?;
            i += 2;
            continue;
        }

        let split = token
            .find(|c: char| c.is_ascii_alphabetic())
            .filter(|at| *at > 0)
            .ok_or_else(invalid)?;
        let (amount, unit) = token.split_at(split);
        let amount = amount.parse::<f64>().map_err(|_| invalid())?;
        total_ms += amount * unit_ms(unit).ok_or_else(invalid)?;
        i += 1;
    }

    if total_ms < 1.0 || !total_ms.is_finite() || total_ms > i64::MAX as f64 / 2.0 {
        return Err(invalid());
    }
    Ok(Duration::milliseconds(total_ms.round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, h, m, 0).unwrap()
    }

    #[test]
    fn human_durations() {
        assert_eq!(parse_duration("1 day").unwrap(), Duration::days(1));
        assert_eq!(parse_duration("one minute").unwrap(), Duration::minutes(1));
        assert_eq!(parse_duration("an hour").unwrap(), Duration::hours(1));
        assert_eq!(
            parse_duration("2 hours and 30 minutes").unwrap(),
            Duration::minutes(150)
        );
        assert_eq!(parse_duration("1.5 hours").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("3 weeks").unwrap(), Duration::weeks(3));
        assert_eq!(parse_duration("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_duration("1h, 15m").unwrap(), Duration::minutes(75));
        assert_eq!(parse_duration("5000").unwrap(), Duration::milliseconds(5000));
    }

    #[test]
    fn bad_durations_are_rejected() {
        for bad in ["", "soon", "0", "0 seconds", "3 fortnights", "minutes", "-2 days"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn cron_takes_precedence_and_accepts_five_fields() {
        assert!(matches!(
            RepeatInterval::parse("*/15 * * * *").unwrap(),
            RepeatInterval::Cron(_)
        ));
        assert!(matches!(
            RepeatInterval::parse("0 0 9 * * Mon-Fri").unwrap(),
            RepeatInterval::Cron(_)
        ));
        assert!(matches!(
            RepeatInterval::parse("2 hours and 30 minutes").unwrap(),
            RepeatInterval::Every(_)
        ));
        assert!(RepeatInterval::parse("whenever").is_err());
    }

    #[test]
    fn cron_next_is_strictly_after_reference() {
        let every_quarter = RepeatInterval::parse("*/15 * * * *").unwrap();
        assert_eq!(every_quarter.next_after(at(10, 0), Tz::UTC), Some(at(10, 15)));
        assert_eq!(every_quarter.next_after(at(10, 7), Tz::UTC), Some(at(10, 15)));
    }

    #[test]
    fn cron_honours_timezone() {
        // 09:00 in New York during DST is 13:00 UTC.
        let daily = RepeatInterval::parse("0 9 * * *").unwrap();
        let tz = parse_timezone(Some("America/New_York")).unwrap();
        let next = daily.next_after(at(0, 0), tz).unwrap();
        assert_eq!(next.hour(), 13);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn duration_next_adds_interval() {
        let daily = RepeatInterval::parse("1 day").unwrap();
        assert_eq!(
            daily.next_after(at(8, 0), Tz::UTC),
            Some(at(8, 0) + Duration::days(1))
        );
    }

    #[test]
    fn timezones() {
        assert_eq!(parse_timezone(None).unwrap(), Tz::UTC);
        assert!(parse_timezone(Some("Europe/Berlin")).is_ok());
        assert!(matches!(
            parse_timezone(Some("Mars/Olympus")),
            Err(DomainError::InvalidTimezone(_))
        ));
    }
}
