//! Error types for marketchat.

use thiserror::Error;

/// Common error type for marketchat.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Permission denied error.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The streaming transport failed or was closed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer sent a frame that violates the chat protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A read or write deadline elapsed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The hub dispatcher is no longer running.
    #[error("chat hub is not running")]
    HubStopped,
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::Database(e.to_string())
    }
}

/// Result type alias for marketchat operations.
pub type Result<T> = std::result::Result<T, ChatError>;
