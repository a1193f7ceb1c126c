//! Core data structures: inbound events, persisted records and aggregates.
//!
//! All calendar derivation happens in UTC so day/month boundaries never move
//! when the machine timezone changes.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Event as delivered by the input hook. `name` is an opaque label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub code: i64,
    pub name: String,
    pub timestamp_ms: i64,
}

impl Event {
    pub fn new(code: i64, name: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            code,
            name: name.into(),
            timestamp_ms,
        }
    }

    /// UTC instant of the event, `None` if outside the calendar range.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }
}

/// Persisted event with its derived calendar fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub code: i64,
    pub name: String,
    pub timestamp_ms: i64,
    /// `YYYY-MM-DD`, UTC
    pub day_key: String,
    /// 0-23, UTC
    pub hour_of_day: u32,
}

impl Record {
    /// Strip the store-assigned fields.
    pub fn to_event(&self) -> Event {
        Event::new(self.code, self.name.clone(), self.timestamp_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStat {
    pub name: String,
    pub count: i64,
}

/// One bucket of a trend line. `period` is an hour (`"13"`), a day key or a
/// month key (`"2024-02"`) depending on the owning stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub period: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStats {
    pub date: NaiveDate,
    pub total_count: i64,
    pub breakdown: Vec<KeyStat>,
    /// 24 hourly buckets
    pub trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthStats {
    pub year: i32,
    pub month: u32,
    pub total_count: i64,
    pub breakdown: Vec<KeyStat>,
    /// One bucket per calendar day
    pub trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearStats {
    pub year: i32,
    pub total_count: i64,
    pub breakdown: Vec<KeyStat>,
    /// One bucket per month
    pub trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub path: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Day,
    Month,
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    /// First and last calendar day of the period containing `anchor`.
    pub fn bounds(&self, anchor: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Granularity::Day => (anchor, anchor),
            Granularity::Month => {
                let first = anchor.with_day(1).unwrap_or(anchor);
                let days = days_in_month(anchor.year(), anchor.month()).unwrap_or(28);
                let last = anchor.with_day(days).unwrap_or(anchor);
                (first, last)
            }
            Granularity::Year => {
                let first = anchor.with_ordinal(1).unwrap_or(anchor);
                let last = NaiveDate::from_ymd_opt(anchor.year(), 12, 31).unwrap_or(anchor);
                (first, last)
            }
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Granularity::Day),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(format!("unknown granularity: {}", other)),
        }
    }
}

pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM`, with the same year rendering as [`day_key`] (`-0001-03`,
/// `+10000-11`) so it always equals a day key minus its `-DD` suffix.
pub fn month_key(year: i32, month: u32) -> String {
    match NaiveDate::from_ymd_opt(year, month, 1) {
        Some(first) => first.format("%Y-%m").to_string(),
        None => format!("{}-{:02}", year, month),
    }
}

/// UTC calendar day of a millisecond timestamp.
pub fn utc_day(timestamp_ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(timestamp_ms).map(|dt| dt.date_naive())
}

/// UTC `(day_key, hour_of_day)` derived at write time.
pub fn derive_calendar_fields(timestamp_ms: i64) -> Option<(String, u32)> {
    let dt = DateTime::from_timestamp_millis(timestamp_ms)?;
    Some((day_key(dt.date_naive()), dt.hour()))
}

/// Days since 1970-01-01 for a calendar date.
pub fn epoch_day(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    date.signed_duration_since(epoch).num_days()
}

/// Actual length of the month, leap years included. `None` for an invalid month.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    NaiveDate::from_ymd_opt(year, month, 1)?;
    match month {
        2 if NaiveDate::from_ymd_opt(year, 2, 29).is_some() => Some(29),
        2 => Some(28),
        4 | 6 | 9 | 11 => Some(30),
        _ => Some(31),
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
