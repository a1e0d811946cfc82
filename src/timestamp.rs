//! Timestamp parsing and normalisation
//!
//! Everything is stored as naive UTC with whole seconds so that text
//! ordering in SQLite matches time ordering.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Drop sub-second precision
pub fn truncate_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Parse an operator-supplied timestamp. Accepts RFC 3339 with an offset,
/// or a naive `YYYY-MM-DD HH:MM[:SS]` taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(truncate_seconds(dt.with_timezone(&Utc)));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| truncate_seconds(naive.and_utc()))
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// `2024-06-01 12:00:00`
pub fn display(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
