//! Provider timestamp normalization.
//!
//! Providers send epoch seconds, epoch milliseconds (as numbers or numeric
//! strings) or RFC 3339 strings. Every ingress and display path goes through
//! this module so a given value always means the same instant.

use {
    chrono::{DateTime, SecondsFormat, Utc},
    serde_json::Value,
};

/// Numeric values below this are epoch seconds, at or above it milliseconds.
pub const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Interpret an epoch number using the seconds/milliseconds threshold.
pub fn from_epoch(t: i64) -> Option<DateTime<Utc>> {
    if t < MILLIS_THRESHOLD {
        DateTime::from_timestamp(t, 0)
    } else {
        DateTime::from_timestamp_millis(t)
    }
}

/// Parse a provider timestamp string: numeric epoch or RFC 3339.
pub fn parse_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(t) = raw.parse::<i64>() {
        return from_epoch(t);
    }
    if let Ok(t) = raw.parse::<f64>() {
        return from_float(t);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a timestamp out of a JSON value (number or string).
pub fn parse_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(t) => from_epoch(t),
            None => n.as_f64().and_then(from_float),
        },
        Value::String(s) => parse_str(s),
        _ => None,
    }
}

fn from_float(t: f64) -> Option<DateTime<Utc>> {
    if !t.is_finite() {
        return None;
    }
    // Fractional seconds keep their precision; fractional millis are dropped.
    if t < MILLIS_THRESHOLD as f64 {
        DateTime::from_timestamp_micros((t * 1_000_000.0) as i64)
    } else {
        DateTime::from_timestamp_millis(t as i64)
    }
}

/// Lossless storage encoding.
pub fn to_micros(at: &DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// Short human-readable rendering used by terminal views.
pub fn format_display(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

/// RFC 3339 rendering with millisecond precision.
pub fn format_rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
