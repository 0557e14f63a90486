//! Error types for the sightline core library.

use thiserror::Error;

/// Top-level error type for all sightline operations.
#[derive(Error, Debug)]
pub enum SightlineError {
    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A requested export format is not supported.
    #[error("Unsupported export format: {0} (expected \"json\" or \"csv\")")]
    UnsupportedFormat(String),

    /// No statistics are recorded for the given entity.
    #[error("Entity not found: {0}")]
    EntityNotFound(crate::EntityId),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SightlineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<csv::Error> for SightlineError {
    fn from(e: csv::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, SightlineError>;
