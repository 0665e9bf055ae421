//! Error types for board operations.
//!
//! This module defines the error type shared by the capability table, the
//! process runner and the hardware engines, covering unsupported operations,
//! failed utility invocations, malformed utility output and configuration
//! problems.

use crate::types::Mode;

/// Result type alias for board operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the board.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation is not implemented on this board.
    #[error("{operation} is not yet implemented")]
    Unsupported { operation: String },

    /// Pin index is not part of the capability table.
    #[error("Invalid pin: {0}")]
    InvalidPin(u8),

    /// Pin does not support the requested mode.
    #[error("Pin {pin} does not support mode {mode}")]
    ModeNotSupported { pin: u8, mode: Mode },

    /// External utility could not be started.
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// External utility exited unsuccessfully.
    #[error("`{command}` exited with status {}: {stderr}", display_status(.status))]
    ProcessFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Utility output could not be interpreted.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Serial channel has not been opened.
    #[error("Serial channel {0} is not open")]
    ChannelNotOpen(u8),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl Error {
    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new spawn error.
    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }

    /// Create a new process failure error.
    pub fn process_failed(
        command: impl Into<String>,
        status: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::ProcessFailed {
            command: command.into(),
            status,
            stderr: stderr.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error was raised by an unsupported operation.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_error() {
        let error = Error::unsupported("analogRead");
        assert!(error.is_unsupported());
        assert_eq!(error.to_string(), "analogRead is not yet implemented");
    }

    #[test]
    fn test_process_failed_error() {
        let error = Error::process_failed("fast-gpio set 1 1", Some(2), "no such pin");
        assert_eq!(
            error.to_string(),
            "`fast-gpio set 1 1` exited with status 2: no such pin"
        );

        let error = Error::process_failed("i2cget -y 0 0x20 0x0", None, "");
        assert!(error.to_string().contains("status signal"));
    }

    #[test]
    fn test_mode_not_supported_error() {
        let error = Error::ModeNotSupported {
            pin: 3,
            mode: Mode::Pwm,
        };
        assert_eq!(error.to_string(), "Pin 3 does not support mode PWM");
    }

    #[test]
    fn test_spawn_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error = Error::spawn("fast-gpio", io);
        assert!(std::error::Error::source(&error).is_some());
    }
}
