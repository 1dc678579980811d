//! RFC 5545 recurrence rule subset for task templates.
//!
//! Supported: `FREQ=DAILY|WEEKLY|MONTHLY`, `INTERVAL=n`, `BYDAY=MO,..`
//! (weekly), `UNTIL=YYYYMMDD[THHMMSSZ]`, `COUNT=n` (validated, not
//! enforced across occurrences — templates advance one occurrence at a
//! time). Occurrences land on UTC midnight of the matching day.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use thiserror::Error;

/// Recurrence parse errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RruleError {
    /// Rule string missing the FREQ part.
    #[error("missing FREQ")]
    MissingFreq,
    /// FREQ value outside the supported set.
    #[error("unsupported FREQ: {0}")]
    UnsupportedFreq(String),
    /// A key=value part was malformed.
    #[error("malformed part: {0}")]
    MalformedPart(String),
    /// BYDAY token not a weekday code.
    #[error("invalid BYDAY token: {0}")]
    InvalidByDay(String),
    /// INTERVAL or COUNT not a positive integer.
    #[error("invalid number in {0}")]
    InvalidNumber(String),
    /// UNTIL timestamp unparseable.
    #[error("invalid UNTIL: {0}")]
    InvalidUntil(String),
}

/// Supported frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freq {
    /// Every `interval` days.
    Daily,
    /// Every `interval` weeks on the BYDAY weekdays.
    Weekly,
    /// Every `interval` months on the anchor day-of-month.
    Monthly,
}

/// A parsed recurrence rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    /// Frequency.
    pub freq: Freq,
    /// Step between occurrences, default 1.
    pub interval: u32,
    /// Weekdays for weekly rules; empty means "same weekday as the
    /// reference instant".
    pub by_day: Vec<Weekday>,
    /// Inclusive end of the recurrence.
    pub until: Option<DateTime<Utc>>,
    /// Declared occurrence count (validated only).
    pub count: Option<u32>,
}

impl RecurrenceRule {
    /// Parse an RRULE string such as `FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,FR`.
    ///
    /// A leading `RRULE:` prefix is accepted and stripped.
    pub fn parse(input: &str) -> Result<Self, RruleError> {
        let body = input.trim().strip_prefix("RRULE:").unwrap_or(input.trim());

        let mut freq = None;
        let mut interval = 1u32;
        let mut by_day = Vec::new();
        let mut until = None;
        let mut count = None;

        for part in body.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RruleError::MalformedPart(part.to_owned()))?;
            match key.to_ascii_uppercase().as_str() {
                "FREQ" => {
                    freq = Some(match value.to_ascii_uppercase().as_str() {
                        "DAILY" => Freq::Daily,
                        "WEEKLY" => Freq::Weekly,
                        "MONTHLY" => Freq::Monthly,
                        other => return Err(RruleError::UnsupportedFreq(other.to_owned())),
                    });
                }
                "INTERVAL" => {
                    interval = value
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n >= 1)
                        .ok_or_else(|| RruleError::InvalidNumber("INTERVAL".to_owned()))?;
                }
                "BYDAY" => {
                    for token in value.split(',') {
                        by_day.push(parse_weekday(token)?);
                    }
                }
                "UNTIL" => {
                    until = Some(parse_until(value)?);
                }
                "COUNT" => {
                    count = Some(
                        value
                            .parse::<u32>()
                            .ok()
                            .filter(|n| *n >= 1)
                            .ok_or_else(|| RruleError::InvalidNumber("COUNT".to_owned()))?,
                    );
                }
                // Unknown parts (WKST, BYMONTHDAY, …) are tolerated.
                _ => {}
            }
        }

        Ok(Self {
            freq: freq.ok_or(RruleError::MissingFreq)?,
            interval,
            by_day,
            until,
            count,
        })
    }

    /// The first occurrence strictly after `after`, or `None` when the
    /// rule has run out (past UNTIL).
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let candidate_date = match self.freq {
            Freq::Daily => after.date_naive() + Duration::days(i64::from(self.interval)),
            Freq::Weekly => self.next_weekly(after.date_naive())?,
            Freq::Monthly => next_monthly(after.date_naive(), self.interval)?,
        };

        let candidate = candidate_date.and_hms_opt(0, 0, 0)?.and_utc();
        match self.until {
            Some(until) if candidate > until => None,
            _ => Some(candidate),
        }
    }

    /// Next weekly occurrence after `after_date`.
    ///
    /// Without BYDAY the anchor weekday repeats every `interval` weeks.
    /// With BYDAY the next listed weekday is taken, scanning up to
    /// `interval` weeks out.
    fn next_weekly(&self, after_date: NaiveDate) -> Option<NaiveDate> {
        if self.by_day.is_empty() {
            return Some(after_date + Duration::days(7 * i64::from(self.interval.max(1))));
        }
        let horizon = 7 * i64::from(self.interval.max(1));
        (1..=horizon)
            .map(|offset| after_date + Duration::days(offset))
            .find(|date| self.by_day.contains(&date.weekday()))
    }
}

/// Next monthly occurrence: the anchor's day-of-month, `interval` months
/// later, clamped to the target month's length.
fn next_monthly(after_date: NaiveDate, interval: u32) -> Option<NaiveDate> {
    let months_total =
        after_date.year() * 12 + after_date.month0() as i32 + interval as i32;
    let year = months_total.div_euclid(12);
    let month = months_total.rem_euclid(12) as u32 + 1;
    let day = after_date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (next, NaiveDate::from_ymd_opt(year, month, 1)) {
        (Some(next), Some(first)) => (next - first).num_days() as u32,
        _ => 28,
    }
}

fn parse_weekday(token: &str) -> Result<Weekday, RruleError> {
    match token.to_ascii_uppercase().as_str() {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(RruleError::InvalidByDay(other.to_owned())),
    }
}

/// Parse `UNTIL` in `YYYYMMDD` or `YYYYMMDDTHHMMSSZ` form.
fn parse_until(value: &str) -> Result<DateTime<Utc>, RruleError> {
    let invalid = || RruleError::InvalidUntil(value.to_owned());
    if value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|_| invalid())?;
        return date
            .and_hms_opt(23, 59, 59)
            .map(|naive| naive.and_utc())
            .ok_or_else(invalid);
    }
    let trimmed = value.strip_suffix('Z').unwrap_or(value);
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y%m%dT%H%M%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().expect("ts")
    }

    #[test]
    fn test_parse_daily_defaults() {
        let rule = RecurrenceRule::parse("FREQ=DAILY").expect("parse");
        assert_eq!(rule.freq, Freq::Daily);
        assert_eq!(rule.interval, 1);
        assert!(rule.by_day.is_empty());
    }

    #[test]
    fn test_parse_strips_rrule_prefix() {
        let rule = RecurrenceRule::parse("RRULE:FREQ=WEEKLY;BYDAY=MO,FR").expect("parse");
        assert_eq!(rule.freq, Freq::Weekly);
        assert_eq!(rule.by_day, vec![Weekday::Mon, Weekday::Fri]);
    }

    #[test]
    fn test_parse_rejects_missing_freq() {
        assert_eq!(
            RecurrenceRule::parse("INTERVAL=2"),
            Err(RruleError::MissingFreq)
        );
    }

    #[test]
    fn test_parse_rejects_unknown_freq() {
        assert!(matches!(
            RecurrenceRule::parse("FREQ=HOURLY"),
            Err(RruleError::UnsupportedFreq(_))
        ));
    }

    #[test]
    fn test_parse_rejects_zero_interval() {
        assert!(matches!(
            RecurrenceRule::parse("FREQ=DAILY;INTERVAL=0"),
            Err(RruleError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_daily_next_occurrence() {
        let rule = RecurrenceRule::parse("FREQ=DAILY").expect("parse");
        let next = rule.next_occurrence(at(2026, 3, 4, 15)).expect("next");
        assert_eq!(next, at(2026, 3, 5, 0));
    }

    #[test]
    fn test_daily_interval_skips_days() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;INTERVAL=3").expect("parse");
        let next = rule.next_occurrence(at(2026, 3, 4, 0)).expect("next");
        assert_eq!(next, at(2026, 3, 7, 0));
    }

    #[test]
    fn test_weekly_byday_picks_next_listed_day() {
        // 2026-03-04 is a Wednesday.
        let rule = RecurrenceRule::parse("FREQ=WEEKLY;BYDAY=MO,FR").expect("parse");
        let next = rule.next_occurrence(at(2026, 3, 4, 12)).expect("next");
        assert_eq!(next, at(2026, 3, 6, 0)); // Friday
        let after_friday = rule.next_occurrence(next).expect("next");
        assert_eq!(after_friday, at(2026, 3, 9, 0)); // Monday
    }

    #[test]
    fn test_weekly_without_byday_repeats_same_weekday() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY").expect("parse");
        let next = rule.next_occurrence(at(2026, 3, 4, 12)).expect("next");
        assert_eq!(next, at(2026, 3, 11, 0));
    }

    #[test]
    fn test_monthly_clamps_to_month_length() {
        let rule = RecurrenceRule::parse("FREQ=MONTHLY").expect("parse");
        let next = rule.next_occurrence(at(2026, 1, 31, 8)).expect("next");
        // February 2026 has 28 days.
        assert_eq!(next, at(2026, 2, 28, 0));
    }

    #[test]
    fn test_until_cuts_off_recurrence() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;UNTIL=20260305").expect("parse");
        assert!(rule.next_occurrence(at(2026, 3, 4, 0)).is_some());
        assert!(rule.next_occurrence(at(2026, 3, 5, 0)).is_none());
    }

    #[test]
    fn test_until_with_time_component() {
        let rule =
            RecurrenceRule::parse("FREQ=DAILY;UNTIL=20260305T120000Z").expect("parse");
        assert_eq!(
            rule.until,
            Some(at(2026, 3, 5, 12))
        );
    }

    #[test]
    fn test_unknown_parts_tolerated() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;WKST=MO").expect("parse");
        assert_eq!(rule.freq, Freq::Daily);
    }
}
