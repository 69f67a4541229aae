//! Error types for conveyor.

use thiserror::Error;

/// Result type alias using conveyor's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for queue operations.
///
/// These are *infrastructure* errors: the store was unreachable, a payload
/// would not serialize, the configuration was unusable. A job handler that
/// runs and fails reports a [`crate::retry::HandlerError`] instead, which is
/// absorbed by the worker loop rather than propagated.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Queue does not exist (or could not be provisioned)
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
