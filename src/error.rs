//! Error types for the door-lock bridge.

use std::time::Duration;

/// Top-level error type for channel, guard, and bus operations.
///
/// Logical outcomes of a reconciliation (mismatch, unlinked hardware, an
/// exhausted retry budget) are not errors; they are reported through
/// [`crate::reconciler::Resolution`].
#[derive(Debug, thiserror::Error)]
pub enum DoorlockError {
    /// The remote control channel stayed unreachable after bounded reconnection.
    #[error("device unreachable after {attempts} connection attempts")]
    Connection {
        /// Number of probes made before giving up.
        attempts: u32,
    },

    /// The device screen could not be woken or unlocked.
    #[error("screen precondition failed: {0}")]
    Precondition(String),

    /// A shell command on the device exited unsuccessfully.
    #[error("device command `{command}` failed: {detail}")]
    Command {
        /// The command line that was run.
        command: String,
        /// Exit status and captured stderr.
        detail: String,
    },

    /// A channel call exceeded its per-call timeout.
    #[error("device command `{command}` timed out after {}s", timeout.as_secs())]
    Timeout {
        /// The command line that was run.
        command: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A screenshot could not be decoded or sampled.
    #[error("screen capture error: {0}")]
    Capture(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Command/state bus error.
    #[error("bus error: {0}")]
    Bus(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DoorlockError {
    /// Returns `true` for failures of the channel itself, as opposed to
    /// configuration or bus problems.
    pub fn is_channel_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Precondition(_)
                | Self::Command { .. }
                | Self::Timeout { .. }
                | Self::Capture(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, DoorlockError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn display_connection() {
        let err = DoorlockError::Connection { attempts: 20 };
        assert_eq!(err.to_string(), "device unreachable after 20 connection attempts");
    }

    #[test]
    fn display_timeout_uses_seconds() {
        let err = DoorlockError::Timeout {
            command: "screencap -p".to_owned(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("timed out after 30s"));
    }

    #[test]
    fn channel_failures_are_classified() {
        assert!(DoorlockError::Precondition("locked".to_owned()).is_channel_failure());
        assert!(DoorlockError::Capture("bad png".to_owned()).is_channel_failure());
        assert!(!DoorlockError::Config("x".to_owned()).is_channel_failure());
        assert!(!DoorlockError::Bus("x".to_owned()).is_channel_failure());
    }
}
