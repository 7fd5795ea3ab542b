//! Error types for recall-core.

use thiserror::Error;

/// Result type alias using recall-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during indexing, storage and retrieval.
#[derive(Error, Debug)]
pub enum Error {
    /// Embedding length differs from the index's fixed dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding is empty or contains non-finite values
    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    /// Operation on an absent id where a miss must be reported
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted state parsed but is internally inconsistent
    #[error("Invalid persisted state: {0}")]
    InvalidState(String),

    /// Embedding or lexical backend failure
    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    /// Timeout during a provider call
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Whether this error came from malformed or inconsistent persisted input.
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization(_) | Self::InvalidState(_))
    }
}
