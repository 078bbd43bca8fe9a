//! # Error Handling
//!
//! Error types for the streaming client. Setup failures are returned from
//! `StreamingSession::start()`; steady-state failures travel as events because
//! audio and socket callbacks have no caller to propagate to.
//!
//! ## Error Categories:
//! - **StreamError**: What the embedding application sees
//! - **CaptureError**: Raised by capture backends and input devices
//! - **TransportError**: Raised by socket connectors
//!
//! All of them are `Clone + PartialEq` so they can be carried inside
//! [`StreamEvent`](crate::events::StreamEvent) values and compared in tests.

use std::time::Duration;
use thiserror::Error;

/// Session-level error taxonomy.
///
/// ## Recovery:
/// - **PermissionDenied**: Retry after the user changes device settings
/// - **ConfigError**: Fatal, no retry
/// - **ConnectionTimeout**: Caller may retry `start()`
/// - **DeviceUnavailable**: Fatal to `start()`, caller may retry later
/// - **ConnectionLost**: Reported asynchronously, reconnect policy takes over
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The user declined microphone access
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// Missing or invalid server URL, or an invalid configuration value
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The socket did not reach `Connected` within the bound
    #[error("Connection timed out after {}ms", .0.as_millis())]
    ConnectionTimeout(Duration),

    /// Microphone busy or hardware failure
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Socket dropped while a session was streaming
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Errors raised by capture backends and input devices.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Device went away mid-stream (unplugged, revoked, busy)
    #[error("Audio device disconnected: {0}")]
    Disconnected(String),
}

/// Errors raised while opening or driving a socket.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Socket error: {0}")]
    Socket(String),
}

/// Capture failures surface to the caller of `start()` with the same meaning.
impl From<CaptureError> for StreamError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied => StreamError::PermissionDenied,
            CaptureError::DeviceUnavailable(msg) | CaptureError::Disconnected(msg) => {
                StreamError::DeviceUnavailable(msg)
            }
        }
    }
}

/// Configuration loading problems (bad TOML, wrong types in env vars).
impl From<config::ConfigError> for StreamError {
    fn from(err: config::ConfigError) -> Self {
        StreamError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, StreamError>`.
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_conversion() {
        assert_eq!(
            StreamError::from(CaptureError::PermissionDenied),
            StreamError::PermissionDenied
        );
        assert_eq!(
            StreamError::from(CaptureError::Disconnected("unplugged".to_string())),
            StreamError::DeviceUnavailable("unplugged".to_string())
        );
    }

    #[test]
    fn test_error_display() {
        let err = StreamError::ConnectionTimeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "Connection timed out after 5000ms");

        let err = StreamError::ConfigError("server url is not set".to_string());
        assert!(err.to_string().contains("server url is not set"));
    }
}
