//! Custom error types for doc-history
//!
//! This module defines the error hierarchy for the change-capture pipeline
//! using thiserror for ergonomic error definitions.

use thiserror::Error;

/// The main error type for doc-history operations
#[derive(Error, Debug)]
pub enum HistoryError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Validation errors for audit records and documents
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Storage errors raised by a document store or history backend
    #[error("Storage error: {0}")]
    Storage(String),

    /// Fetching the state around a mutation failed
    #[error("Capture failed on '{collection}': {message}")]
    Capture { collection: String, message: String },

    /// A diff comparator rejected a field
    #[error("Diff failed on field '{field}': {message}")]
    Diff { field: String, message: String },

    /// A metadata derivation rule failed
    #[error("Derivation of '{field}' failed: {message}")]
    Derivation { field: String, message: String },

    /// Writing audit records failed
    #[error("Failed to persist history to '{collection}': {message}")]
    Persist { collection: String, message: String },
}

impl HistoryError {
    /// Wrap a store error raised while capturing state around a mutation
    pub fn capture(collection: impl Into<String>, err: HistoryError) -> Self {
        match err {
            Self::Capture { .. } => err,
            other => Self::Capture {
                collection: collection.into(),
                message: other.to_string(),
            },
        }
    }

    /// Wrap a backend error raised while writing audit records
    ///
    /// Validation errors pass through untouched so callers can tell a bad
    /// record apart from an unreachable store.
    pub fn persist(collection: impl Into<String>, err: HistoryError) -> Self {
        match err {
            Self::Validation(_) | Self::Persist { .. } => err,
            other => Self::Persist {
                collection: collection.into(),
                message: other.to_string(),
            },
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this error came from the capture stage
    pub fn is_capture(&self) -> bool {
        matches!(self, Self::Capture { .. })
    }

    /// Check if this error came from writing audit records
    pub fn is_persist(&self) -> bool {
        matches!(self, Self::Persist { .. })
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for HistoryError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for doc-history operations
pub type HistoryResult<T> = Result<T, HistoryError>;
