//! Completion and blocked signal detection.
//!
//! Independent of error classification: an iteration's output is scanned
//! for textual signals that the story finished or cannot proceed. The two
//! pattern sets can both match the same output; [`OutputSignal::detect`]
//! resolves that ambiguity in favor of blocked, because marking a blocked
//! story complete silently drops it from the backlog, while the reverse
//! only asks a human to look.

use regex::Regex;
use std::sync::LazyLock;

static COMPLETION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)COMPLETE",
        r"(?i)all\s+criteria\s+(are\s+)?checked",
        r"(?i)story\s+(is\s+)?complete",
        r"(?i)passes.*true",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("valid pattern"))
    .collect()
});

static BLOCKED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)BLOCKED",
        r"(?i)cannot\s+proceed",
        r"(?i)blocked\s+by",
        r"(?i)manual\s+intervention",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("valid pattern"))
    .collect()
});

static COMPLETE_PROMISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<promise>COMPLETE</promise>").expect("valid pattern"));

static ALL_BLOCKED_PROMISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<promise>ALL_BLOCKED</promise>").expect("valid pattern"));

/// True if any completion pattern matches.
pub fn has_completion_signal(output: &str) -> bool {
    COMPLETION_PATTERNS.iter().any(|p| p.is_match(output))
}

/// True if any blocked pattern matches.
pub fn has_blocked_signal(output: &str) -> bool {
    BLOCKED_PATTERNS.iter().any(|p| p.is_match(output))
}

/// Explicit `<promise>COMPLETE</promise>` tag emitted by the assistant.
pub fn has_complete_promise(output: &str) -> bool {
    COMPLETE_PROMISE.is_match(output)
}

/// Explicit `<promise>ALL_BLOCKED</promise>` tag emitted by the assistant.
pub fn has_all_blocked_promise(output: &str) -> bool {
    ALL_BLOCKED_PROMISE.is_match(output)
}

/// Resolved outcome signal for one iteration's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSignal {
    /// Blocked signal present (wins any tie with completion).
    Blocked,
    /// Completion signal present, no blocked signal.
    Completed,
    /// Neither pattern set matched.
    None,
}

impl OutputSignal {
    /// Scans output for both signal sets and applies the tie-break:
    /// blocked over completed.
    pub fn detect(output: &str) -> Self {
        if has_blocked_signal(output) {
            OutputSignal::Blocked
        } else if has_completion_signal(output) {
            OutputSignal::Completed
        } else {
            OutputSignal::None
        }
    }
}
