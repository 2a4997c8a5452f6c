//! Error types for the vector engine

use crate::config::ConfigError;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error types that can occur in engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid k: {k} (must be a positive integer)")]
    InvalidK { k: usize },

    #[error("Record not found: {id}")]
    NotFound { id: String },

    #[error("Invalid metadata for key '{key}': {reason}")]
    InvalidMetadata { key: String, reason: String },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error("Invalid id: {reason}")]
    InvalidId { reason: String },

    #[error("Index rebuild failed: {0}")]
    RebuildFailed(String),

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Whether this error came from validating caller input, as opposed to
    /// an engine-side fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::DimensionMismatch { .. }
                | EngineError::InvalidK { .. }
                | EngineError::InvalidMetadata { .. }
                | EngineError::InvalidVector { .. }
                | EngineError::InvalidId { .. }
        )
    }
}
