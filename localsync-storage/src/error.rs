//! Error types for the storage layer.

use localsync_model::ModelError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Schema or model error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// A conditional write found the row but the condition did not hold.
    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    /// More than one row matched a unique key.
    #[error("non-unique result: {0}")]
    NonUniqueResult(String),

    /// A row or table references a parent that does not exist.
    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    /// The operation is not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The storage layer itself is unusable.
    #[error("internal storage error: {0}")]
    Internal(String),

    /// A persisted row could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Wraps a SQLite error, singling out foreign key violations.
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(e, message) = &err {
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
                return Self::ForeignKey(message.clone().unwrap_or_else(|| e.to_string()));
            }
        }
        Self::Database(err)
    }
}
