//! ISO-8601 handling for request bounds, continuation tokens and Snowflake cells.

use chrono::{DateTime, NaiveDateTime, Timelike};

use crate::error::{ConnectorError, Result};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO-8601 timestamp. Offsets are normalised to UTC.
pub fn parse_iso(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();

    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed);
        }
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .map_err(|e| ConnectorError::Validation(format!("Malformed timestamp {}: {}", raw, e)))
}

/// Render a timestamp the way the connector emits it in responses and tokens:
/// whole seconds carry no fraction, otherwise microseconds (or nanoseconds
/// when the value is finer than a microsecond).
pub fn format_iso(ts: &NaiveDateTime) -> String {
    let nanos = ts.nanosecond() % 1_000_000_000;
    if nanos == 0 {
        ts.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else if nanos % 1_000 == 0 {
        ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    } else {
        ts.format("%Y-%m-%dT%H:%M:%S%.9f").to_string()
    }
}

/// Decode a timestamp cell returned by the Snowflake SQL API.
///
/// TIMESTAMP_NTZ comes back as `"<epoch seconds>.<fraction>"`, TIMESTAMP_TZ
/// appends a space and the offset in minutes. ISO strings are accepted too.
pub fn parse_cell(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.contains('-') && !raw.starts_with('-') {
        return parse_iso(raw).ok();
    }

    let epoch = raw.split_whitespace().next()?;
    let (secs, fraction) = match epoch.split_once('.') {
        Some((secs, fraction)) => (secs, fraction),
        None => (epoch, ""),
    };
    let mut secs: i64 = secs.parse().ok()?;

    let mut nanos = if fraction.is_empty() {
        0
    } else {
        let digits: String = fraction.chars().take(9).collect();
        let padded = format!("{:0<9}", digits);
        padded.parse::<u32>().ok()?
    };

    // "-1.5" is one and a half seconds before the epoch, not -1 + 0.5.
    if epoch.starts_with('-') && nanos > 0 {
        secs -= 1;
        nanos = 1_000_000_000 - nanos;
    }

    DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}
