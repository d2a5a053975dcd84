//! Duration and timestamp parsing helpers

use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Header timestamp layouts that carry no offset, tried after RFC 1123.
const NAIVE_LAYOUTS: &[&str] = &[
    // RFC 850
    "%A, %d-%b-%y %H:%M:%S GMT",
    // ANSI C asctime
    "%a %b %e %H:%M:%S %Y",
];

/// Error returned by [`parse_duration`]
#[derive(Debug, Error)]
pub enum DurationError {
    #[error(transparent)]
    Format(#[from] humantime::DurationError),

    #[error("invalid duration '{0}'")]
    Invalid(String),
}

/// Nanoseconds per unit for Go-style fractional durations
const GO_UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60_000_000_000),
    ("h", 3_600_000_000_000),
];

/// Parses a duration string such as `300ms`, `2m`, `1h30m` or `1.5h`.
///
/// A bare `0` is accepted as zero. Values with a decimal point follow Go's
/// `time.ParseDuration` units (`ns`, `us`, `ms`, `s`, `m`, `h`).
pub fn parse_duration(value: &str) -> Result<Duration, DurationError> {
    let value = value.trim();
    if value == "0" {
        return Ok(Duration::ZERO);
    }
    if value.contains('.') {
        return parse_fractional(value);
    }
    Ok(humantime::parse_duration(value)?)
}

fn parse_fractional(value: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid(value.to_string());
    let mut rest = value;
    let mut nanos: u128 = 0;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = GO_UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(invalid)?;

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut part = whole.checked_mul(scale).ok_or_else(invalid)?;
        if !fraction.is_empty() {
            if !fraction.bytes().all(|b| b.is_ascii_digit()) || fraction.len() > 30 {
                return Err(invalid());
            }
            let digits: u128 = fraction.parse().map_err(|_| invalid())?;
            part += digits * scale / 10u128.pow(fraction.len() as u32);
        }
        nanos = nanos.checked_add(part).ok_or_else(invalid)?;
        rest = tail;
    }

    let secs = u64::try_from(nanos / 1_000_000_000).map_err(|_| invalid())?;
    Ok(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}

/// Parses an HTTP-style timestamp, trying RFC 1123, RFC 850, ANSI C and
/// RFC 3339 in that order.
///
/// Returns `None` when no layout matches; a missing modification time is
/// never an error.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc2822(value) {
        return Some(ts.with_timezone(&Utc));
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, layout) {
            return Some(ts.and_utc());
        }
    }

    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
