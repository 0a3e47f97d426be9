//! Typed error hierarchy for the session layer.
//!
//! Three top-level enums cover the three subsystems:
//! - `TransportError`: credentialed request/response failures
//! - `ChannelError`: realtime channel conditions
//! - `ConfigError`: configuration loading failures
//!
//! An expired access value (HTTP 401) is not an error variant: the transport
//! recovers from it internally and only escalates to `SessionExpired`.

use thiserror::Error;

/// Errors surfaced by [`crate::transport::CredentialedTransport::execute`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Refresh failed, was impossible, or the retried request was rejected
    /// again. The credential store has been cleared.
    #[error("Session expired: {reason}")]
    SessionExpired { reason: String },

    #[error("Network failure: {0}")]
    Network(String),

    /// The server rejected the request (4xx other than 401).
    #[error("Request rejected with status {status}")]
    Validation {
        status: u16,
        body: serde_json::Value,
    },

    #[error("Server error with status {status}")]
    Server {
        status: u16,
        body: serde_json::Value,
    },

    #[error("Failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Invalid request target '{target}': {message}")]
    InvalidTarget { target: String, message: String },
}

impl TransportError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, TransportError::SessionExpired { .. })
    }
}

/// Conditions raised by the realtime channel.
///
/// Connectivity failures are routed through the reconnect path and only show
/// up here as the `last_error` of a snapshot, never as a returned error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel is not connected")]
    NotConnected,

    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Failed to serialize outbound message: {0}")]
    Serialize(String),

    #[error("Invalid channel endpoint '{endpoint}': {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("Connection attempt failed: {0}")]
    Connect(String),

    #[error("Stream failure: {0}")]
    Stream(String),

    #[error("Channel task has shut down")]
    Shutdown,
}

/// Errors from loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file at {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_expired_is_detectable() {
        let err = TransportError::SessionExpired {
            reason: "refresh rejected".to_string(),
        };
        assert!(err.is_session_expired());
        assert!(err.to_string().contains("refresh rejected"));
        assert!(!TransportError::Network("reset".into()).is_session_expired());
    }

    #[test]
    fn validation_error_carries_status_and_body() {
        let err = TransportError::Validation {
            status: 422,
            body: serde_json::json!({"email": ["required"]}),
        };
        match &err {
            TransportError::Validation { status, body } => {
                assert_eq!(*status, 422);
                assert_eq!(body["email"][0], "required");
            }
            _ => panic!("Expected Validation"),
        }
        assert!(err.to_string().contains("422"));
    }

    #[test]
    fn config_read_error_carries_path() {
        use std::path::PathBuf;
        let path = PathBuf::from("/etc/dashlink.toml");
        let err = ConfigError::Read {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        match &err {
            ConfigError::Read { path: p, source } => {
                assert_eq!(p, &path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected Read"),
        }
    }

    #[test]
    fn channel_errors_compare_by_value() {
        let a = ChannelError::MalformedMessage {
            reason: "expected value".into(),
        };
        let b = ChannelError::MalformedMessage {
            reason: "expected value".into(),
        };
        assert_eq!(a, b);
        assert_ne!(a, ChannelError::NotConnected);
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&TransportError::Network("x".into()));
        assert_std_error(&ChannelError::NotConnected);
        assert_std_error(&ConfigError::InvalidValue {
            key: "channel.endpoint".into(),
            message: "empty".into(),
        });
    }
}
