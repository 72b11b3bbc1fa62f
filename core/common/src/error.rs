//! Common error types for GeoSync.

use thiserror::Error;

/// Top-level error type for GeoSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network or transport operation failed.
    #[error("Network error: {0}")]
    Network(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Background scheduler is not running.
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
