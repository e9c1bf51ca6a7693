//! Human-readable durations for config values like "500ms", "5s" or "1m".

use crate::error::{Error, Result};
use std::time::Duration;

/// Parse a duration string. A bare number is taken as seconds.
///
/// ```
/// use pressbox::config::parse_duration_string;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration_string("500ms"), Some(Duration::from_millis(500)));
/// assert_eq!(parse_duration_string("5s"), Some(Duration::from_secs(5)));
/// assert_eq!(parse_duration_string("1m"), Some(Duration::from_secs(60)));
/// assert_eq!(parse_duration_string("30"), Some(Duration::from_secs(30)));
/// ```
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, unit): (&str, fn(u64) -> Option<Duration>) = if let Some(n) = s.strip_suffix("ms") {
        (n, |ms| Some(Duration::from_millis(ms)))
    } else if let Some(n) = s.strip_suffix('s') {
        (n, |secs| Some(Duration::from_secs(secs)))
    } else if let Some(n) = s.strip_suffix('m') {
        (n, |m| m.checked_mul(60).map(Duration::from_secs))
    } else {
        (s, |secs| Some(Duration::from_secs(secs)))
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok().and_then(unit)
}

/// Like [`parse_duration_string`], but reports which setting was malformed.
pub fn parse_setting(key: &str, value: &str) -> Result<Duration> {
    parse_duration_string(value).ok_or_else(|| {
        Error::Config(format!(
            "'{}' has invalid duration '{}' (expected e.g. \"500ms\", \"5s\", \"1m\")",
            key, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_duration_string("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration_string("12s"), Some(Duration::from_secs(12)));
        assert_eq!(parse_duration_string("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration_string(" 7 "), Some(Duration::from_secs(7)));
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "ms", "abc", "5x", "-5s", "1.5s"] {
            assert_eq!(parse_duration_string(bad), None, "{bad:?} should not parse");
        }
    }

    #[test]
    fn overflowing_minutes_are_rejected() {
        assert_eq!(parse_duration_string(&format!("{}m", u64::MAX)), None);
        assert_eq!(parse_duration_string("307445734561825861m"), None);
        assert_eq!(
            parse_duration_string("307445734561825860s"),
            Some(Duration::from_secs(307_445_734_561_825_860))
        );
    }

    #[test]
    fn parse_setting_names_the_key() {
        let err = parse_setting("database.connect_retry.max_backoff", "soon").unwrap_err();
        assert!(err.to_string().contains("max_backoff"));
    }
}
