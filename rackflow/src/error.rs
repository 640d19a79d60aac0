//! Error types for rackflow.

use std::io;
use thiserror::Error;

/// Result type for rackflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rackflow operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, pipes, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed or incomplete workflow definition. Fatal, never retried.
    #[error("Invalid workflow definition: {0}")]
    Definition(String),

    /// Serial device unavailable or busy.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Expected pattern not observed within the step budget.
    #[error("Timeout waiting for '{0}'")]
    ExpectTimeout(String),

    /// Narrow-window interrupt missed entirely.
    #[error("Timeout waiting for '{0}' after interrupt")]
    InterruptTimeout(String),

    /// Write failure mid-step.
    #[error("Transmission failed: {0}")]
    Transmission(String),

    /// Process orchestration failure (spawn error, unknown session).
    #[error("Process error: {0}")]
    Process(String),

    /// Operation aborted by the embedding application.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is one of the two per-step deadline kinds.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ExpectTimeout(_) | Self::InterruptTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(Error::ExpectTimeout("switch:".into()).is_timeout());
        assert!(Error::InterruptTimeout("loader>".into()).is_timeout());
        assert!(!Error::Definition("empty".into()).is_timeout());
    }

    #[test]
    fn test_display_carries_pattern() {
        let err = Error::ExpectTimeout("(y/n)".into());
        assert!(err.to_string().contains("(y/n)"));
    }
}
