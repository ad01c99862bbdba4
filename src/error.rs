//! Error types for ChatRelay
//!
//! This module defines the error types used throughout the relay,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for ChatRelay operations
///
/// Most of these never reach a client directly: the dispatcher converts
/// store, log, and agent failures into data before anything is delivered.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session or context store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Message log (database) errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Agent service errors
    #[error("Agent error: {0}")]
    Agent(String),

    /// Channel join or event delivery errors
    #[error("Delivery error: {0}")]
    Delivery(String),
}

/// Result type alias for ChatRelay operations
///
/// Uses `anyhow::Error` so callers can attach context while propagating.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = RelayError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_store_error_display() {
        let error = RelayError::Store("connection refused".to_string());
        assert_eq!(error.to_string(), "Store error: connection refused");
    }

    #[test]
    fn test_storage_error_display() {
        let error = RelayError::Storage("disk full".to_string());
        assert_eq!(error.to_string(), "Storage error: disk full");
    }

    #[test]
    fn test_delivery_error_display() {
        let error = RelayError::Delivery("channel closed".to_string());
        assert_eq!(error.to_string(), "Delivery error: channel closed");
    }

    #[test]
    fn test_domain_error_converts_into_anyhow() {
        let error: anyhow::Error = RelayError::Agent("no route".to_string()).into();
        assert!(matches!(
            error.downcast_ref::<RelayError>(),
            Some(RelayError::Agent(_))
        ));
        assert_eq!(error.to_string(), "Agent error: no route");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RelayError>();
    }
}
