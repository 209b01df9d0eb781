//! Structured PTY events.
//!
//! Events are the unit of communication between the PTY pipeline and its
//! consumers (UI state updates, log writers). Each event is immutable,
//! timestamped at creation, and delivered once to every subscriber. The
//! field invariants are enforced by the constructors:
//! - `exit` events always carry `exit_code`
//! - `data` events always carry `ansi`
//! - `error` events carry neither

use serde::Serialize;

/// The kind of a PTY event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PtyEventKind {
    /// Output chunk from the child process.
    Data,
    /// Child process exited.
    Exit,
    /// Spawn or I/O failure. Occurs instead of, not in addition to, a
    /// normal exit for that invocation.
    Error,
}

/// A timestamped event from the PTY pipeline.
///
/// Events are created by `EventEmitter` and are not persisted here; log
/// and status-file writes are a subscriber's concern.
#[derive(Debug, Clone, Serialize)]
pub struct PtyEvent {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: PtyEventKind,
    /// ISO-8601 timestamp (UTC, millisecond precision).
    pub timestamp: String,
    /// Output text for `data`, trailing output for `exit` (if any), or the
    /// error message for `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Whether `data` contains ANSI styling. Present only on `data` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansi: Option<bool>,
    /// Process exit code. Present only on `exit` events. Codes above 128
    /// conventionally encode "terminated by signal N" as 128+N; the value
    /// is reported exactly as the OS surfaced it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl PtyEvent {
    /// Builds a `data` event.
    pub(crate) fn data(timestamp: String, text: String, ansi: bool) -> Self {
        Self {
            kind: PtyEventKind::Data,
            timestamp,
            data: Some(text),
            ansi: Some(ansi),
            exit_code: None,
        }
    }

    /// Builds an `exit` event. `final_text` is any trailing output flushed
    /// at process end.
    pub(crate) fn exit(timestamp: String, code: i32, final_text: Option<String>) -> Self {
        Self {
            kind: PtyEventKind::Exit,
            timestamp,
            data: final_text,
            ansi: None,
            exit_code: Some(code),
        }
    }

    /// Builds an `error` event.
    pub(crate) fn error(timestamp: String, message: String) -> Self {
        Self {
            kind: PtyEventKind::Error,
            timestamp,
            data: Some(message),
            ansi: None,
            exit_code: None,
        }
    }
}
