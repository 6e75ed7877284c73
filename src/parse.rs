//! Parse-with-policy helpers for raw configuration strings and identifiers.
//!
//! Two policies: [`parse_with_fallback`] substitutes a default and never fails,
//! [`parse_or_fail`] raises a [`ValidationError`] carrying the parse failure.

use super::errors::ValidationError;
use std::str::FromStr;
use tracing::debug;

/// Returns the parsed value, or `fallback` when `raw` is absent, blank,
/// unparseable, or rejected by `is_valid`.
pub fn parse_with_fallback<T, P>(raw: Option<&str>, fallback: T, is_valid: P) -> T
where
    T: FromStr,
    P: FnOnce(&T) -> bool,
{
    let Some(trimmed) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return fallback;
    };
    match trimmed.parse::<T>() {
        Ok(parsed) if is_valid(&parsed) => parsed,
        _ => {
            debug!(raw = trimmed, "value rejected, using fallback");
            fallback
        }
    }
}

/// Converts `raw` with `to_value`, failing on absent or blank input and
/// wrapping any conversion error as the source of the [`ValidationError`].
pub fn parse_or_fail<T, E, F>(raw: Option<&str>, field: &str, to_value: F) -> Result<T, ValidationError>
where
    F: FnOnce(&str) -> Result<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    let trimmed = require_non_blank(raw, field)?;
    to_value(trimmed).map_err(|e| ValidationError::with_source(format!("{field} is invalid"), e))
}

/// Retry budget: any non-negative integer, else `fallback`.
pub fn parse_retry_budget_or_default(raw: Option<&str>, fallback: i32) -> i32 {
    parse_with_fallback(raw, fallback, |budget: &i32| *budget >= 0)
}

/// Parses a millisecond timeout and returns whole seconds.
pub fn parse_timeout_seconds(raw: Option<&str>) -> Result<u32, ValidationError> {
    let millis = parse_or_fail(raw, "timeoutMillis", str::parse::<i64>)?;
    if millis < 0 {
        return Err(ValidationError::new("timeoutMillis must be >= 0"));
    }
    u32::try_from(millis / 1000)
        .map_err(|e| ValidationError::with_source("timeoutMillis is invalid", e))
}

/// Trims and upper-cases an identifier.
pub fn normalize_identifier(raw: Option<&str>) -> Result<String, ValidationError> {
    require_non_blank(raw, "identifier").map(str::to_uppercase)
}

/// Returns the first option that is present and non-blank, trimmed and
/// lower-cased. Options after the match are never normalized.
///
/// An outer `None` is a missing slot rather than an absent value; any missing
/// slot rejects the whole sequence before the search starts.
pub fn first_reachable<S>(options: &[Option<Option<S>>]) -> Result<Option<String>, ValidationError>
where
    S: AsRef<str>,
{
    if options.iter().any(Option::is_none) {
        return Err(ValidationError::new("options must not contain missing entries"));
    }
    Ok(options
        .iter()
        .flatten()
        .flatten()
        .map(|value| value.as_ref().trim())
        .find(|trimmed| !trimmed.is_empty())
        .map(str::to_lowercase))
}

pub(crate) fn require_non_blank<'a>(raw: Option<&'a str>, field: &str) -> Result<&'a str, ValidationError> {
    match raw.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed),
        _ => Err(ValidationError::new(format!("{field} must be non-blank"))),
    }
}
