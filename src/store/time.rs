//! Conversions between Slack's decimal-second timestamps and UTC datetimes.
//!
//! Slack represents event times as strings of fractional seconds since the
//! Unix epoch (e.g. `"1700000000.000200"`). The database stores absolute
//! `TIMESTAMPTZ` values. These two functions are the only place the formats
//! meet; they are applied at insertion and when exporting history rows.

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

/// Error returned when a Slack timestamp cannot be parsed.
#[derive(Debug, Clone, Error)]
#[error("malformed slack timestamp: {value:?}")]
pub struct TimestampError {
    value: String,
}

impl TimestampError {
    fn new(value: impl Into<String>) -> Self {
        TimestampError {
            value: value.into(),
        }
    }
}

/// Parses a Slack decimal-seconds timestamp into a UTC datetime.
///
/// Accepts a bare seconds value (`"1700000000"`) or seconds with a
/// fractional part of up to microsecond precision (`"1700000000.123456"`).
/// Extra fractional digits are truncated.
pub fn from_slack_ts(ts: &str) -> Result<DateTime<Utc>, TimestampError> {
    let (secs_part, frac_part) = match ts.split_once('.') {
        Some((s, f)) => (s, Some(f)),
        None => (ts, None),
    };

    let secs: i64 = secs_part
        .parse()
        .map_err(|_| TimestampError::new(ts))?;

    let micros = match frac_part {
        None | Some("") => 0u32,
        Some(frac) => {
            if !frac.chars().all(|c| c.is_ascii_digit()) {
                return Err(TimestampError::new(ts));
            }
            // Normalize to exactly six fractional digits.
            let mut padded: String = frac.chars().take(6).collect();
            while padded.len() < 6 {
                padded.push('0');
            }
            padded.parse().map_err(|_| TimestampError::new(ts))?
        }
    };

    Utc.timestamp_opt(secs, micros * 1_000)
        .single()
        .ok_or_else(|| TimestampError::new(ts))
}

/// Formats a UTC datetime as a Slack decimal-seconds timestamp.
///
/// Always emits six fractional digits, matching the precision Slack uses
/// for message timestamps.
pub fn to_slack_ts(dt: DateTime<Utc>) -> String {
    format!("{}.{:06}", dt.timestamp(), dt.timestamp_subsec_micros())
}
