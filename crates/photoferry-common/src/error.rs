//! Error types shared across photoferry crates

use thiserror::Error;

/// Result type alias for photoferry operations
pub type Result<T> = std::result::Result<T, FerryError>;

/// Main error type for configuration, serialization and local I/O failures
#[derive(Error, Debug)]
pub enum FerryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Source watcher error: {0}")]
    Watcher(String),
}

impl FerryError {
    pub fn config(message: impl Into<String>) -> Self {
        FerryError::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        FerryError::Validation(message.into())
    }
}
