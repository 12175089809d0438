//! Error types for the runner module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while running a test program.
///
/// These never leave [`TestRunner::run`](super::TestRunner::run); they are
/// folded into a failed report via [`RunnerError::record_message`].
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Test name would escape the tests directory.
    #[error("invalid test name: {0}")]
    InvalidTestName(String),

    /// No program for this test name.
    #[error("test program not found: {path}")]
    NotFound { path: PathBuf },

    /// The program exists but could not be started.
    #[error("failed to spawn test program: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O error while collecting output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Program exited unsuccessfully.
    #[error("test program exited with code {code:?}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// Program exited 0 but did not print a JSON object.
    #[error("invalid test output: {reason}")]
    InvalidOutput { reason: String },

    /// Program exceeded its wall clock.
    #[error("test timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

impl RunnerError {
    /// The `error` text stored with the failed record.
    pub fn record_message(&self) -> String {
        match self {
            Self::NonZeroExit { stderr, .. } => stderr.clone(),
            Self::InvalidOutput { .. } => "Invalid JSON output".to_string(),
            Self::Timeout { .. } => "TimeoutExpired".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the program ran past its time limit.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_messages() {
        assert_eq!(
            RunnerError::Timeout { timeout_ms: 120_000 }.record_message(),
            "TimeoutExpired"
        );
        assert_eq!(
            RunnerError::NonZeroExit {
                code: Some(1),
                stderr: "connection refused\n".to_string(),
            }
            .record_message(),
            "connection refused\n"
        );
        assert_eq!(
            RunnerError::NotFound {
                path: PathBuf::from("tests/test_dns.py"),
            }
            .record_message(),
            "test program not found: tests/test_dns.py"
        );
    }

    #[test]
    fn test_display_differs_from_record_message_for_timeout() {
        let err = RunnerError::Timeout { timeout_ms: 500 };
        assert_eq!(err.to_string(), "test timed out after 500 ms");
        assert!(err.is_timeout());
    }
}
