//! Common error types for Vigil.

use thiserror::Error;

/// Result type alias using Vigil's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Vigil operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Real-time engine join/leave/release failed
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// A live store subscription dropped or could not be opened
    #[error("subscription failure: {0}")]
    SubscriptionFailure(String),

    /// Operation issued outside the states that allow it
    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Host package metadata could not be enumerated
    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(String),

    /// Document store read/write rejected
    #[error("store error: {0}")]
    Store(String),

    /// Caller supplied an unusable argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error (file, pipe, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Create a connection failure from any displayable type.
    pub fn connection(msg: impl std::fmt::Display) -> Self {
        Self::ConnectionFailure(msg.to_string())
    }

    /// Create a subscription failure from any displayable type.
    pub fn subscription(msg: impl std::fmt::Display) -> Self {
        Self::SubscriptionFailure(msg.to_string())
    }

    pub fn invalid_state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    /// Create a classification error from any displayable type.
    pub fn classification(msg: impl std::fmt::Display) -> Self {
        Self::ClassificationUnavailable(msg.to_string())
    }

    /// Create a store error from any displayable type.
    pub fn store(msg: impl std::fmt::Display) -> Self {
        Self::Store(msg.to_string())
    }

    /// Create an invalid input error from any displayable type.
    pub fn invalid_input(msg: impl std::fmt::Display) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
