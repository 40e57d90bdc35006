//! Authorship timestamp parsing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Naive formats, read as UTC.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Formats carrying an explicit offset.
const OFFSET_FORMATS: [&str; 3] = [
    // Twitter/X API v1.1: `Wed Oct 10 20:19:24 +0000 2018`
    "%a %b %d %H:%M:%S %z %Y",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%z",
];

/// Above this an epoch number is taken to be in milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.unsigned_abs() >= EPOCH_MILLIS_THRESHOLD.unsigned_abs() {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

/// Truncates a float epoch, rejecting values an `i64` cannot hold.
fn float_to_epoch(value: f64) -> Option<i64> {
    if value.is_finite() && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

fn parse_str(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ts| ts.and_utc());
    }
    if text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse::<i64>().ok().and_then(from_epoch);
    }
    None
}

/// Parses a timestamp in any of the accepted source formats.
pub fn parse(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_str(text),
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(float_to_epoch))
            .and_then(from_epoch),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expected(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_iso_variants() {
        let ts = expected(2024, 5, 1, 12, 30, 0);
        assert_eq!(parse(&json!("2024-05-01T12:30:00Z")), Some(ts));
        assert_eq!(parse(&json!("2024-05-01T14:30:00+02:00")), Some(ts));
        assert_eq!(parse(&json!("2024-05-01T12:30:00")), Some(ts));
        assert_eq!(parse(&json!("2024-05-01 12:30:00")), Some(ts));
        assert_eq!(parse(&json!("2024-05-01T12:30:00+0000")), Some(ts));
        assert_eq!(
            parse(&json!("2024-05-01")),
            Some(expected(2024, 5, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_twitter_format() {
        assert_eq!(
            parse(&json!("Wed Oct 10 20:19:24 +0000 2018")),
            Some(expected(2018, 10, 10, 20, 19, 24))
        );
    }

    #[test]
    fn test_epoch_seconds_and_millis() {
        let ts = expected(2023, 11, 14, 22, 13, 20);
        assert_eq!(parse(&json!(1_700_000_000)), Some(ts));
        assert_eq!(parse(&json!(1_700_000_000_000_i64)), Some(ts));
        assert_eq!(parse(&json!("1700000000")), Some(ts));
    }

    #[test]
    fn test_unparsable() {
        assert_eq!(parse(&json!("last tuesday")), None);
        assert_eq!(parse(&json!("")), None);
        assert_eq!(parse(&json!(null)), None);
        assert_eq!(parse(&json!({"date": "2024-01-01"})), None);
    }

    #[test]
    fn test_extreme_numbers_are_unparsable() {
        assert_eq!(parse(&json!(i64::MIN)), None);
        assert_eq!(parse(&json!(i64::MAX)), None);
        assert_eq!(parse(&json!(u64::MAX)), None);
        assert_eq!(parse(&json!(-1e30)), None);
        assert_eq!(parse(&json!(1e300)), None);
        assert_eq!(parse(&json!("99999999999999999999")), None);
    }

    #[test]
    fn test_float_epoch_is_truncated() {
        assert_eq!(
            parse(&json!(1_700_000_000.75)),
            Some(expected(2023, 11, 14, 22, 13, 20))
        );
    }
}
