//! Error types for the intake pipeline

use std::path::PathBuf;

use thiserror::Error;

use crate::types::JobStatus;

/// Result type alias for intake operations
pub type Result<T> = std::result::Result<T, Error>;

/// Intake pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job state machine violation
    #[error("Invalid job transition for '{path}': {from} -> {to}")]
    InvalidTransition {
        path: PathBuf,
        from: JobStatus,
        to: JobStatus,
    },

    /// External processor could not be run or reported failure
    #[error("Processor error: {0}")]
    Processor(String),

    /// External processor exceeded its deadline
    #[error("Processor timeout after {secs}s")]
    Timeout { secs: u64 },

    /// State file could not be written
    #[error("Failed to persist state to '{path}': {message}")]
    Persist { path: PathBuf, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a processor error
    pub fn processor(message: impl Into<String>) -> Self {
        Self::Processor(message.into())
    }

    /// Create a persistence error
    pub fn persist(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Persist {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
