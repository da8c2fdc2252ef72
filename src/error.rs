//! Error types for the ratewarden crate.

use std::fmt;

use thiserror::Error;

use crate::store::StoreError;

/// The store operation that failed while making a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Exists,
    Set,
    Get,
    Decr,
    Delete,
    Take,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOp::Exists => "check existence",
            StoreOp::Set => "set",
            StoreOp::Get => "get",
            StoreOp::Decr => "decr",
            StoreOp::Delete => "delete",
            StoreOp::Take => "take",
        };
        f.write_str(name)
    }
}

/// Main error type for ratewarden operations.
#[derive(Error, Debug)]
pub enum RatewardenError {
    /// The shared store could not complete an operation. The decision is unknown.
    #[error("limiter: failed to {op} {key}: {source}")]
    Store {
        op: StoreOp,
        key: String,
        #[source]
        source: StoreError,
    },

    /// The stored counter is not a non-negative integer.
    #[error("limiter: failed to convert value {key}: {value:?} is not a non-negative integer")]
    InvalidCounter { key: String, value: String },

    /// Identifiers must be non-empty.
    #[error("limiter: identifier must not be empty")]
    InvalidIdentifier,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RatewardenError {
    pub(crate) fn store(op: StoreOp, key: &str, source: StoreError) -> Self {
        RatewardenError::Store {
            op,
            key: key.to_string(),
            source,
        }
    }

    /// Whether the error came from talking to the store rather than from its contents.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, RatewardenError::Store { .. })
    }
}

/// Result type alias for ratewarden operations.
pub type Result<T> = std::result::Result<T, RatewardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_message_names_operation_and_key() {
        let err = RatewardenError::store(
            StoreOp::Exists,
            "user_10.0.0.1_signup",
            StoreError::Unavailable("connection refused".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "limiter: failed to check existence user_10.0.0.1_signup: store unavailable: connection refused"
        );
        assert!(err.is_store_failure());
    }

    #[test]
    fn test_invalid_counter_message() {
        let err = RatewardenError::InvalidCounter {
            key: "user_a_b".to_string(),
            value: "abc".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "limiter: failed to convert value user_a_b: \"abc\" is not a non-negative integer"
        );
        assert!(!err.is_store_failure());
    }
}
