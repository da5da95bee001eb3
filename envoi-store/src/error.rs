//! Error types for the envoi-store crate.

use std::io;

use thiserror::Error;

use crate::SessionId;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (file read/write/rename/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Session not found in the store.
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    /// Session already exists in the store.
    #[error("Session already exists: {0}")]
    AlreadyExists(SessionId),

    /// Store directory validation failed.
    #[error("Store validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A checkpoint would violate the session's invariants.
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// Ledger reset requested without the confirmation phrase.
    #[error("Ledger reset was not confirmed")]
    ResetNotConfirmed,

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("RON encode error: {0}")]
    Encode(#[from] ron::Error),

    #[error("RON decode error: {0}")]
    Decode(#[from] ron::error::SpannedError),
}

/// Store path validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Store path cannot contain '..' components: {0}")]
    ParentComponent(String),

    #[error("Store path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Store path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: String, path: String },

    #[error("Store path is not a directory: {0}")]
    NotDirectory(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<ron::Error> for StoreError {
    fn from(e: ron::Error) -> Self {
        Self::Serialization(SerializationError::Encode(e))
    }
}

impl From<ron::error::SpannedError> for StoreError {
    fn from(e: ron::error::SpannedError) -> Self {
        Self::Serialization(SerializationError::Decode(e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
