//! Error types for a3s-realtime

use thiserror::Error;

/// Errors that can occur while delivering real-time events
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The connection cannot carry the framing a transport needs
    /// (e.g. a response writer without incremental flush)
    #[error("Transport capability error: {0}")]
    TransportCapability(String),

    /// Malformed or unrecognized control frame from a client
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Network read/write failure on one connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// An event or frame could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for real-time operations
pub type Result<T> = std::result::Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_error_from_serde() {
        let err: RealtimeError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, RealtimeError::Encoding(_)));
        assert!(err.to_string().starts_with("Encoding error"));
    }

    #[test]
    fn test_capability_error_display() {
        let err = RealtimeError::TransportCapability("streaming unsupported".into());
        assert_eq!(
            err.to_string(),
            "Transport capability error: streaming unsupported"
        );
    }
}
