//! # Error Types
//!
//! Custom error types for the MAVLink link core using `thiserror`.

use thiserror::Error;

use crate::ftp::protocol::FtpNak;
use crate::mavlink::messages::MavResult;

/// Main error type for the MAVLink link core
#[derive(Debug, Error)]
pub enum MavLinkError {
    /// Framing or payload errors
    #[error("MAVLink protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// No serial device could be opened
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// No correlated reply arrived before the deadline
    #[error("Timed out waiting for {operation}")]
    Timeout { operation: &'static str },

    /// The transport failed while the link was open
    #[error("Connection lost")]
    ConnectionLost,

    /// The link was closed locally
    #[error("Link is closed")]
    LinkClosed,

    /// The operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// A channel that allows one request at a time is in use
    #[error("Busy: {0}")]
    Busy(&'static str),

    /// The autopilot answered a command with something other than accepted
    #[error("Command {command} rejected: {result}")]
    CommandRejected { command: u16, result: MavResult },

    /// The autopilot answered an FTP request with a NAK
    #[error("FTP request failed: {0}")]
    Ftp(FtpNak),

    /// Calibration session errors
    #[error("Calibration error: {0}")]
    Calibration(String),
}

/// Result type alias for the MAVLink link core
pub type Result<T> = std::result::Result<T, MavLinkError>;

impl MavLinkError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MavLinkError::Timeout { .. }
                | MavLinkError::Busy(_)
                | MavLinkError::CommandRejected {
                    result: MavResult::TemporarilyRejected,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MavLinkError::Timeout { operation: "PARAM_VALUE" };
        assert_eq!(err.to_string(), "Timed out waiting for PARAM_VALUE");

        let err = MavLinkError::CommandRejected {
            command: 241,
            result: MavResult::TemporarilyRejected,
        };
        assert!(err.to_string().contains("241"));
        assert!(err.to_string().contains("temporarily rejected"));
    }

    #[test]
    fn test_retryable() {
        assert!(MavLinkError::Timeout { operation: "x" }.is_retryable());
        assert!(MavLinkError::Busy("ftp").is_retryable());
        assert!(!MavLinkError::ConnectionLost.is_retryable());
        assert!(!MavLinkError::CommandRejected {
            command: 400,
            result: MavResult::Denied
        }
        .is_retryable());
    }
}
