//! # Duration Validation
//!
//! Parses Go-style duration strings used by `syncInterval` and `cacheTTL`.
//!
//! Accepted: a sequence of decimal numbers, each with an optional fraction and
//! a unit suffix (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`, `d`), such as `300ms`,
//! `1.5h` or `2h45m`. A bare `0` is also accepted.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_FORMAT: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:\d+(?:\.\d*)?|\.\d+)(?:ns|us|µs|ms|s|m|h|d))+$")
});

static DURATION_COMPONENT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?P<number>\d+(?:\.\d*)?|\.\d+)(?P<unit>ns|us|µs|ms|s|m|h|d)"));

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("duration string cannot be empty")]
    Empty,
    #[error("invalid duration '{0}': expected e.g. '30s', '1h30m', '500ms'")]
    Format(String),
    #[error("duration '{0}' overflows")]
    Overflow(String),
    #[error("duration pattern failed to compile: {0}")]
    Pattern(String),
}

fn unit_nanos(unit: &str) -> f64 {
    match unit {
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60.0 * 1e9,
        "h" => 3600.0 * 1e9,
        // "d" is the only remaining unit the pattern admits
        _ => 86_400.0 * 1e9,
    }
}

/// Parse a Go-style duration string into `std::time::Duration`
pub fn parse_go_duration(input: &str) -> Result<Duration, DurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let format = DURATION_FORMAT
        .as_ref()
        .map_err(|e| DurationError::Pattern(e.to_string()))?;
    let component = DURATION_COMPONENT
        .as_ref()
        .map_err(|e| DurationError::Pattern(e.to_string()))?;

    if !format.is_match(trimmed) {
        return Err(DurationError::Format(trimmed.to_string()));
    }

    let mut total_nanos: f64 = 0.0;
    for caps in component.captures_iter(trimmed) {
        let number: f64 = caps["number"]
            .parse()
            .map_err(|_| DurationError::Format(trimmed.to_string()))?;
        total_nanos += number * unit_nanos(&caps["unit"]);
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(DurationError::Overflow(trimmed.to_string()));
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "bounded and non-negative by the checks above"
    )]
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Parse an optional duration, treating absent or empty strings as `None`
pub fn parse_optional_duration(input: Option<&str>) -> Result<Option<Duration>, DurationError> {
    match input.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_go_duration(s).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_units() {
        assert_eq!(parse_go_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_go_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_go_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_go_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_go_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_go_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_compound_and_fractional() {
        assert_eq!(parse_go_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_go_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(
            parse_go_duration("1m0.5s").unwrap(),
            Duration::from_millis(60_500)
        );
    }

    #[test]
    fn test_invalid() {
        assert_eq!(parse_go_duration(""), Err(DurationError::Empty));
        assert!(matches!(parse_go_duration("10"), Err(DurationError::Format(_))));
        assert!(matches!(parse_go_duration("abc"), Err(DurationError::Format(_))));
        assert!(matches!(parse_go_duration("-5s"), Err(DurationError::Format(_))));
        assert!(matches!(parse_go_duration("5x"), Err(DurationError::Format(_))));
    }

    #[test]
    fn test_optional() {
        assert_eq!(parse_optional_duration(None).unwrap(), None);
        assert_eq!(parse_optional_duration(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_optional_duration(Some("30s")).unwrap(),
            Some(Duration::from_secs(30))
        );
    }
}
