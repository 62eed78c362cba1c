//! Error types for livetrans.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LivetransError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Microphone unavailable: {message}")]
    CaptureUnavailable { message: String },

    // Playback errors
    #[error("Playback failed: {message}")]
    Playback { message: String },

    // Audio payload errors
    #[error("Audio payload could not be decoded: {message}")]
    Decode { message: String },

    // Transport errors
    #[error("Not connected")]
    NotConnected,

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Connection not established within {timeout_ms} ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Connection closed: {reason}")]
    TransportClosed { reason: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl LivetransError {
    /// Whether this error ends the session it occurred in.
    ///
    /// Per-message and per-item failures (protocol, decode, playback, a send
    /// attempted while not connected) are isolated and never end a session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            LivetransError::CaptureUnavailable { .. }
                | LivetransError::Connection { .. }
                | LivetransError::ConnectTimeout { .. }
                | LivetransError::TransportClosed { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LivetransError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = LivetransError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = LivetransError::ConfigInvalidValue {
            key: "session.chunk_interval_ms".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for session.chunk_interval_ms: must be positive"
        );
    }

    #[test]
    fn test_capture_unavailable_display() {
        let error = LivetransError::CaptureUnavailable {
            message: "permission denied".to_string(),
        };
        assert_eq!(error.to_string(), "Microphone unavailable: permission denied");
    }

    #[test]
    fn test_decode_display() {
        let error = LivetransError::Decode {
            message: "Odd number of digits".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Audio payload could not be decoded: Odd number of digits"
        );
    }

    #[test]
    fn test_not_connected_display() {
        assert_eq!(LivetransError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_connect_timeout_display() {
        let error = LivetransError::ConnectTimeout { timeout_ms: 1500 };
        assert_eq!(
            error.to_string(),
            "Connection not established within 1500 ms"
        );
    }

    #[test]
    fn test_transport_closed_display() {
        let error = LivetransError::TransportClosed {
            reason: "remote hung up".to_string(),
        };
        assert_eq!(error.to_string(), "Connection closed: remote hung up");
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(
            LivetransError::CaptureUnavailable {
                message: "denied".into()
            }
            .is_session_fatal()
        );
        assert!(
            LivetransError::TransportClosed {
                reason: "eof".into()
            }
            .is_session_fatal()
        );
        assert!(LivetransError::ConnectTimeout { timeout_ms: 10 }.is_session_fatal());

        assert!(!LivetransError::NotConnected.is_session_fatal());
        assert!(
            !LivetransError::Protocol {
                message: "bad json".into()
            }
            .is_session_fatal()
        );
        assert!(
            !LivetransError::Decode {
                message: "odd".into()
            }
            .is_session_fatal()
        );
        assert!(
            !LivetransError::Playback {
                message: "device busy".into()
            }
            .is_session_fatal()
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: LivetransError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_str = "invalid = toml = syntax";
        let toml_error = toml::from_str::<toml::Value>(toml_str).unwrap_err();
        let error: LivetransError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: LivetransError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<LivetransError>();
        assert_sync::<LivetransError>();
    }
}
