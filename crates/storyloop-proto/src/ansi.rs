//! ANSI escape sequence classification.
//!
//! Two entry points with deliberately different coverage:
//! - [`strip_ansi`] removes everything a terminal would swallow: SGR color
//!   and style codes, cursor movement and clear sequences, OSC sequences
//!   (hyperlinks, titles) terminated by BEL or ST, and single-character
//!   escapes.
//! - [`has_ansi`] only recognizes SGR-style CSI sequences. It feeds the
//!   lightweight `ansi` flag on data events, where a cheap check is enough;
//!   it is intentionally narrower than `strip_ansi`.
//!
//! Both are pure functions with no state and are safe to call concurrently.

use regex::Regex;
use std::sync::LazyLock;

/// Matches SGR-style CSI sequences: `ESC [ <params> <letter>`.
static SGR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\x1b\\[[0-9;]*[a-zA-Z]").expect("valid regex"));

/// Strips ANSI escape sequences from text.
///
/// Uses `strip-ansi-escapes` for direct byte-level removal without terminal
/// emulation, so all printable content is preserved regardless of output
/// size - nothing is lost to simulated scrollback. Non-escape content,
/// including multi-byte Unicode, newlines, and tabs, passes through
/// unchanged.
pub fn strip_ansi(text: &str) -> String {
    let stripped = strip_ansi_escapes::strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).into_owned()
}

/// Returns true if the text contains at least one SGR-style escape sequence.
///
/// This does not recognize OSC or single-character escapes; it exists only to
/// flag data events that carry terminal styling.
pub fn has_ansi(text: &str) -> bool {
    SGR_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_basic_colors() {
        assert_eq!(strip_ansi("\x1b[31mred text\x1b[0m"), "red text");
        assert_eq!(strip_ansi("\x1b[41mred background\x1b[0m"), "red background");
    }

    #[test]
    fn test_strip_extended_colors() {
        // 256-color and RGB true-color forms
        assert_eq!(strip_ansi("\x1b[38;5;196mred\x1b[0m"), "red");
        assert_eq!(strip_ansi("\x1b[38;2;255;0;0mred\x1b[0m"), "red");
    }

    #[test]
    fn test_strip_styles() {
        assert_eq!(strip_ansi("\x1b[1mbold\x1b[0m"), "bold");
        assert_eq!(
            strip_ansi("\x1b[1;4;31mbold underline red\x1b[0m"),
            "bold underline red"
        );
    }

    #[test]
    fn test_strip_cursor_and_clear() {
        assert_eq!(strip_ansi("line1\x1b[Aline2"), "line1line2");
        assert_eq!(strip_ansi("\x1b[2Jcleared screen"), "cleared screen");
        assert_eq!(strip_ansi("\x1b[Kcleared line"), "cleared line");
    }

    #[test]
    fn test_strip_osc_sequences() {
        // OSC terminated by BEL
        assert_eq!(strip_ansi("\x1b]0;window title\x07text"), "text");
        // OSC terminated by ST (ESC \)
        assert_eq!(strip_ansi("\x1b]8;;https://example.com\x1b\\link"), "link");
    }

    #[test]
    fn test_strip_preserves_plain_content() {
        let plain = "hello\tworld\nsecond line";
        assert_eq!(strip_ansi(plain), plain);

        let unicode = "日本語 → emoji 🎉";
        assert_eq!(strip_ansi(unicode), unicode);
    }

    #[test]
    fn test_strip_empty_and_escape_only() {
        assert_eq!(strip_ansi(""), "");
        assert_eq!(strip_ansi("\x1b[31m\x1b[0m"), "");
    }

    #[test]
    fn test_strip_is_idempotent() {
        let inputs = [
            "\x1b[32mOK\x1b[0m",
            "plain",
            "\x1b[1;36m  Thinking...\x1b[0m\r\n\x1b[2K\x1b[1;32m  Done!\x1b[0m",
        ];
        for input in inputs {
            let once = strip_ansi(input);
            assert_eq!(strip_ansi(&once), once);
        }
    }

    #[test]
    fn test_has_ansi_detects_sgr() {
        assert!(has_ansi("\x1b[32mgreen\x1b[0m"));
        assert!(has_ansi("prefix \x1b[1m bold"));
    }

    #[test]
    fn test_has_ansi_plain_text() {
        assert!(!has_ansi("plain text"));
        assert!(!has_ansi(""));
        // A bare ESC with no CSI sequence does not count
        assert!(!has_ansi("\x1bnothing"));
    }
}
