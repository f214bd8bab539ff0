//! Error types for the Gatekeeper service.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GatekeeperError {
    fn from(err: config::ConfigError) -> Self {
        GatekeeperError::Config(err.to_string())
    }
}

/// Failure reported by a counter store.
///
/// Stores must fail loudly instead of reporting a zero count, so the
/// controller can tell "the store said no" apart from "the store is gone".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached (connection refused, dropped, I/O).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within the configured bound.
    #[error("store timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with something we could not interpret.
    #[error("store protocol error: {0}")]
    Protocol(String),

    /// Anything else, including failures of the in-process store.
    #[error("store internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether this failure means the backend is unreachable, as opposed to
    /// misbehaving.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Protocol(err.to_string())
        }
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(StoreError::Unavailable("refused".into()).is_unavailable());
        assert!(StoreError::Timeout(Duration::from_millis(10)).is_unavailable());
        assert!(!StoreError::Protocol("bad reply".into()).is_unavailable());
        assert!(!StoreError::Internal("poisoned".into()).is_unavailable());
    }

    #[test]
    fn test_redis_io_error_is_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StoreError::from(redis::RedisError::from(io));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_redis_type_error_is_protocol() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::TypeError, "not an integer"));
        assert!(matches!(StoreError::from(redis_err), StoreError::Protocol(_)));
    }

    #[test]
    fn test_store_error_wraps_into_gatekeeper_error() {
        let err: GatekeeperError = StoreError::Internal("boom".into()).into();
        assert_eq!(err.to_string(), "Counter store error: store internal error: boom");
    }
}
