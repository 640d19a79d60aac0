//! Status channel wire format.
//!
//! The engine process reports progress on stdout as single lines of the
//! form `STATUS_FLAG::<json>`. The prefix keeps status machine-readable
//! while everything else on stdout stays an ordinary diagnostic; the
//! supervisor splits the two by prefix alone.

use serde::{Deserialize, Serialize};

/// Line prefix marking a status event on the engine's stdout.
pub const STATUS_FLAG: &str = "STATUS_FLAG::";

/// Status text emitted when a workflow completes every step.
pub const STATUS_SUCCESS: &str = "Successfully Finished";

/// Status text emitted when a workflow fails for any reason.
pub const STATUS_FAILURE: &str = "Fatally Failed";

/// A progress report from a running engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Operator-facing status text.
    pub text: String,
    /// Whether the operator must act (touch hardware, investigate a
    /// failure) before the run can make progress.
    #[serde(default)]
    pub interactive: bool,
    /// Whether the run finished successfully. `completed` is accepted as
    /// a legacy spelling when parsing.
    #[serde(default, alias = "completed")]
    pub complete: bool,
}

impl StatusEvent {
    /// Status event for an in-progress step.
    #[must_use]
    pub fn step(text: impl Into<String>, interactive: bool) -> Self {
        Self {
            text: text.into(),
            interactive,
            complete: false,
        }
    }

    /// The terminal success event.
    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            text: STATUS_SUCCESS.to_string(),
            interactive: false,
            complete: true,
        }
    }

    /// The terminal failure event. Marked interactive so a status board
    /// flags the port for operator attention.
    #[must_use]
    pub fn failed() -> Self {
        Self {
            text: STATUS_FAILURE.to_string(),
            interactive: true,
            complete: false,
        }
    }

    /// Whether this is the terminal failure event.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.text == STATUS_FAILURE
    }

    /// Serialize to a status line, including the prefix (no newline).
    #[must_use]
    pub fn to_line(&self) -> String {
        // Serializing a struct of three plain fields cannot fail.
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"text":{:?},"interactive":false,"complete":false}}"#, self.text)
        });
        format!("{STATUS_FLAG}{json}")
    }

    /// Parse a line of engine stdout.
    ///
    /// Returns `None` for lines without the status prefix. A prefixed line
    /// whose payload is not valid JSON becomes a plain-text event rather
    /// than being dropped.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let payload = line
            .trim_end_matches(['\r', '\n'])
            .strip_prefix(STATUS_FLAG)?;
        match serde_json::from_str(payload) {
            Ok(event) => Some(event),
            Err(_) => Some(Self::step(payload, false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_round_trip() {
        let event = StatusEvent::step("Waiting for switch: prompt", true);
        let line = event.to_line();
        assert!(line.starts_with(STATUS_FLAG));
        assert_eq!(StatusEvent::parse_line(&line), Some(event));
    }

    #[test]
    fn test_parse_accepts_legacy_completed_field() {
        let line = r#"STATUS_FLAG::{"text":"done","interactive":false,"completed":true}"#;
        let event = StatusEvent::parse_line(line).unwrap();
        assert!(event.complete);
    }

    #[test]
    fn test_parse_ignores_unprefixed_lines() {
        assert_eq!(StatusEvent::parse_line("booting..."), None);
        assert_eq!(StatusEvent::parse_line(""), None);
    }

    #[test]
    fn test_parse_falls_back_to_plain_text() {
        let event = StatusEvent::parse_line("STATUS_FLAG::not json at all").unwrap();
        assert_eq!(event.text, "not json at all");
        assert!(!event.interactive);
        assert!(!event.complete);
    }

    #[test]
    fn test_parse_strips_trailing_newline() {
        let line = format!("{}\n", StatusEvent::succeeded().to_line());
        let event = StatusEvent::parse_line(&line).unwrap();
        assert_eq!(event, StatusEvent::succeeded());
    }

    #[test]
    fn test_terminal_events() {
        let ok = StatusEvent::succeeded();
        assert_eq!(ok.text, STATUS_SUCCESS);
        assert!(ok.complete);
        assert!(!ok.interactive);
        assert!(!ok.is_failure());

        let bad = StatusEvent::failed();
        assert_eq!(bad.text, STATUS_FAILURE);
        assert!(!bad.complete);
        assert!(bad.interactive);
        assert!(bad.is_failure());
    }
}
