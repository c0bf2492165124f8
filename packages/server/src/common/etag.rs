//! Entity-tag encoding for optimistic concurrency.
//!
//! The wire etag is the decimal string form of a row's `version`. Writers quote it
//! (`"42"`); the server accepts quoted or unquoted input and always compares numerically.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("etag '{0}' is not a valid version number")]
pub struct EtagParseError(String);

/// Renders a version as a quoted wire etag, e.g. `42 -> "42"`.
pub fn encode(version: i64) -> String {
    format!("\"{}\"", version)
}

/// Parses a wire etag (quoted or bare) into its numeric version.
pub fn parse(raw: &str) -> Result<i64, EtagParseError> {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);

    unquoted
        .parse::<i64>()
        .map_err(|_| EtagParseError(raw.to_string()))
}

/// True when the wire etag matches the entity's current version.
pub fn matches(raw: &str, current_version: i64) -> bool {
    parse(raw).map(|v| v == current_version).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_quotes() {
        assert_eq!(encode(42), "\"42\"");
    }

    #[test]
    fn parses_quoted() {
        assert_eq!(parse("\"42\"").unwrap(), 42);
    }

    #[test]
    fn parses_unquoted() {
        assert_eq!(parse("42").unwrap(), 42);
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(parse("\"abc\"").is_err());
    }

    #[test]
    fn matches_compares_numerically_regardless_of_quoting() {
        assert!(matches("\"7\"", 7));
        assert!(matches("7", 7));
        assert!(!matches("7", 8));
    }
}
