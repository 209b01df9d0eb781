//! Error classification over combined CLI output.
//!
//! Failures of the hosted CLI mostly surface as text: API errors, resets,
//! rate limits. Classification is an ordered pattern table - most specific
//! patterns first, first match wins - so adding a kind means adding a row,
//! not touching control flow. Classification is a pure function of the
//! text: the same input always yields the same kind.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// One value of the fixed failure taxonomy assigned to an iteration's
/// output. Spawn failures are a separate class surfaced as `error` events,
/// not derived from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The API returned no messages at all. Retried on its own, more
    /// generous policy.
    NoMessages,
    /// Connection-level failure (reset, EAGAIN, failed fetch).
    ConnectionReset,
    /// Request or socket timeout.
    Timeout,
    /// Rate limited or service overloaded.
    RateLimit,
    /// Upstream 5xx.
    ServerError,
    /// Generic fallback: the output mentions an error we cannot place.
    Unknown,
}

impl ErrorKind {
    /// Human-readable description for status displays and logs.
    pub fn describe(self) -> &'static str {
        match self {
            ErrorKind::NoMessages => "No messages returned from API",
            ErrorKind::ConnectionReset => "Connection was reset",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::RateLimit => "Rate limit exceeded",
            ErrorKind::ServerError => "Server error (5xx)",
            ErrorKind::Unknown => "Unknown error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    /// Snake_case name, agreeing with the serde spelling.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NoMessages => "no_messages",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Ordered classification table: most specific first, first match wins.
static PATTERNS: LazyLock<Vec<(ErrorKind, Regex)>> = LazyLock::new(|| {
    [
        (ErrorKind::NoMessages, r"(?i)No messages returned"),
        (ErrorKind::ConnectionReset, r"(?i)ECONNRESET|EAGAIN|fetch failed"),
        (ErrorKind::Timeout, r"(?i)ETIMEDOUT|socket hang up"),
        (ErrorKind::RateLimit, r"(?i)rate limit|overloaded"),
        (ErrorKind::ServerError, r"(?i)Error: 5[0-9][0-9]|HTTP.*5[0-9][0-9]"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("valid pattern")))
    .collect()
});

/// Generic fallback indicator.
///
/// Known false-positive source: assistant prose that merely mentions the
/// word "error" classifies as `Unknown`. Behavior kept for compatibility;
/// callers gate classification on a failed exit before trusting it.
static GENERIC_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("valid pattern"));

/// Classifies combined stdout+stderr text. Returns `None` when the output
/// carries no recognizable error.
pub fn classify(text: &str) -> Option<ErrorKind> {
    for (kind, pattern) in PATTERNS.iter() {
        if pattern.is_match(text) {
            return Some(*kind);
        }
    }
    if GENERIC_ERROR.is_match(text) {
        return Some(ErrorKind::Unknown);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_each_kind() {
        assert_eq!(
            classify("No messages returned from API"),
            Some(ErrorKind::NoMessages)
        );
        assert_eq!(classify("read ECONNRESET"), Some(ErrorKind::ConnectionReset));
        assert_eq!(classify("fetch failed"), Some(ErrorKind::ConnectionReset));
        assert_eq!(classify("connect ETIMEDOUT"), Some(ErrorKind::Timeout));
        assert_eq!(classify("socket hang up"), Some(ErrorKind::Timeout));
        assert_eq!(classify("You have hit a rate limit"), Some(ErrorKind::RateLimit));
        assert_eq!(classify("API is overloaded"), Some(ErrorKind::RateLimit));
        assert_eq!(classify("Error: 529"), Some(ErrorKind::ServerError));
        assert_eq!(classify("HTTP status 503"), Some(ErrorKind::ServerError));
    }

    #[test]
    fn test_clean_output_classifies_as_none() {
        assert_eq!(classify("plain success output"), None);
        assert_eq!(classify(""), None);
        assert_eq!(classify("All 12 tests passed"), None);
    }

    #[test]
    fn test_generic_fallback_is_unknown() {
        assert_eq!(classify("something went wrong: Error"), Some(ErrorKind::Unknown));
        // Case-insensitive, and yes, prose mentioning errors matches too
        assert_eq!(
            classify("I fixed the error handling in module X"),
            Some(ErrorKind::Unknown)
        );
    }

    #[test]
    fn test_specific_patterns_win_over_fallback() {
        // "Error" appears, but the 5xx pattern is checked first
        assert_eq!(classify("Error: 500 upstream"), Some(ErrorKind::ServerError));
        // no_messages outranks everything
        assert_eq!(
            classify("Error: No messages returned, rate limit hit"),
            Some(ErrorKind::NoMessages)
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let text = "ECONNRESET while talking to api";
        assert_eq!(classify(text), classify(text));
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("RATE LIMIT exceeded"), Some(ErrorKind::RateLimit));
        assert_eq!(classify("no messages returned"), Some(ErrorKind::NoMessages));
    }

    #[test]
    fn test_display_matches_serde_names() {
        assert_eq!(ErrorKind::NoMessages.to_string(), "no_messages");
        assert_eq!(
            serde_json::to_value(ErrorKind::NoMessages).unwrap(),
            "no_messages"
        );
        assert_eq!(ErrorKind::ServerError.to_string(), "server_error");
    }

    #[test]
    fn test_describe() {
        assert_eq!(ErrorKind::RateLimit.describe(), "Rate limit exceeded");
        assert_eq!(ErrorKind::Unknown.describe(), "Unknown error");
    }
}
