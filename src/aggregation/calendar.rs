//! Calendar bucket splitting.
//!
//! Interval generation for fiscal or custom calendars lives outside this
//! crate; anything implementing [`Calendar`] can be plugged into the query
//! builder. [`GregorianCalendar`] covers the standard units.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

use crate::model::GranularityUnit;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalendarError {
    #[error("Invalid interval `{0}`: expected <start>/<end>")]
    InvalidInterval(String),

    #[error("Invalid instant `{0}`")]
    InvalidInstant(String),

    #[error("Cannot split into `{0}` buckets")]
    UnsupportedGranularity(GranularityUnit),
}

/// Splits ISO intervals into consecutive time buckets.
pub trait Calendar: Send + Sync {
    /// Buckets of `unit` covering `interval`, in order. The first and last
    /// buckets are clipped to the interval.
    fn split(&self, interval: &str, unit: GranularityUnit) -> Result<Vec<String>, CalendarError>;
}

/// Calendar with ISO weeks (Monday start) and January-start years.
#[derive(Debug, Clone, Copy, Default)]
pub struct GregorianCalendar;

impl Calendar for GregorianCalendar {
    fn split(&self, interval: &str, unit: GranularityUnit) -> Result<Vec<String>, CalendarError> {
        let (start, end) = parse_interval(interval)?;
        match unit {
            GranularityUnit::All => return Ok(vec![format_interval(start, end)]),
            GranularityUnit::None => return Err(CalendarError::UnsupportedGranularity(unit)),
            _ => {}
        }

        let mut buckets = Vec::new();
        let mut cursor = floor(start, unit);
        while cursor < end {
            let next = step(cursor, unit)
                .ok_or_else(|| CalendarError::InvalidInterval(interval.to_string()))?;
            buckets.push(format_interval(cursor.max(start), next.min(end)));
            cursor = next;
        }
        Ok(buckets)
    }
}

pub fn parse_instant(s: &str) -> Result<NaiveDateTime, CalendarError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| CalendarError::InvalidInstant(s.to_string()))
}

pub fn parse_interval(interval: &str) -> Result<(NaiveDateTime, NaiveDateTime), CalendarError> {
    let (start, end) = interval
        .split_once('/')
        .ok_or_else(|| CalendarError::InvalidInterval(interval.to_string()))?;
    let start = parse_instant(start)?;
    let end = parse_instant(end)?;
    if end < start {
        return Err(CalendarError::InvalidInterval(interval.to_string()));
    }
    Ok((start, end))
}

pub fn format_interval(start: NaiveDateTime, end: NaiveDateTime) -> String {
    format!(
        "{}/{}",
        start.format("%Y-%m-%dT%H:%M:%SZ"),
        end.format("%Y-%m-%dT%H:%M:%SZ")
    )
}

/// Sort intervals and merge overlapping or touching ones.
pub fn normalize_intervals(intervals: &[String]) -> Result<Vec<String>, CalendarError> {
    let mut parsed = intervals
        .iter()
        .map(|i| parse_interval(i))
        .collect::<Result<Vec<_>, _>>()?;
    parsed.sort();

    let mut merged: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::with_capacity(parsed.len());
    for (start, end) in parsed {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                if end > *last_end {
                    *last_end = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }
    Ok(merged
        .into_iter()
        .map(|(s, e)| format_interval(s, e))
        .collect())
}

fn floor(dt: NaiveDateTime, unit: GranularityUnit) -> NaiveDateTime {
    let date = dt.date();
    let midnight = |d: NaiveDate| d.and_time(chrono::NaiveTime::MIN);
    match unit {
        GranularityUnit::Minute => dt
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(dt),
        GranularityUnit::Hour => dt
            .with_minute(0)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(dt),
        GranularityUnit::Day => midnight(date),
        GranularityUnit::Week => {
            midnight(date - Duration::days(date.weekday().num_days_from_monday() as i64))
        }
        GranularityUnit::Month => midnight(date.with_day(1).unwrap_or(date)),
        GranularityUnit::Quarter => {
            let month = (date.month0() / 3) * 3 + 1;
            midnight(NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date))
        }
        GranularityUnit::Year => {
            midnight(NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date))
        }
        GranularityUnit::None | GranularityUnit::All => dt,
    }
}

fn step(dt: NaiveDateTime, unit: GranularityUnit) -> Option<NaiveDateTime> {
    match unit {
        GranularityUnit::Minute => dt.checked_add_signed(Duration::minutes(1)),
        GranularityUnit::Hour => dt.checked_add_signed(Duration::hours(1)),
        GranularityUnit::Day => dt.checked_add_signed(Duration::days(1)),
        GranularityUnit::Week => dt.checked_add_signed(Duration::days(7)),
        GranularityUnit::Month => dt.checked_add_months(Months::new(1)),
        GranularityUnit::Quarter => dt.checked_add_months(Months::new(3)),
        GranularityUnit::Year => dt.checked_add_months(Months::new(12)),
        GranularityUnit::None | GranularityUnit::All => None,
    }
}
