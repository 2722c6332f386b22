//! Error types for the sync layer.

use crate::remote::RemoteError;
use localsync_model::ModelError;
use localsync_storage::StorageError;
use localsync_types::MutationEvent;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A conditional write or delete found the row but the condition failed.
    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    /// More than one local row matched a unique key.
    #[error("non-unique result: {0}")]
    NonUniqueResult(String),

    /// The operation is not valid for the model or in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A record references a parent that is not stored locally.
    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    /// Local storage failed or is unusable.
    #[error("internal error: {0}")]
    Internal(String),

    /// The remote rejected a request.
    #[error("api error: {message}")]
    Api {
        message: String,
        event: Option<Box<MutationEvent>>,
    },

    /// The remote channel failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cascade delete removed rows locally but could not queue every delete.
    #[error("cascade delete queued {submitted} of {total} deletes: {message}")]
    CascadeIncomplete {
        submitted: usize,
        total: usize,
        message: String,
    },

    /// The operation was cancelled by a stop request.
    #[error("operation cancelled")]
    Cancelled,

    /// Channel closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl SyncError {
    /// A backend rejection of `event`.
    pub fn api(message: impl Into<String>, event: &MutationEvent) -> Self {
        Self::Api {
            message: message.into(),
            event: Some(Box::new(event.clone())),
        }
    }

    /// The outbox entry a rejection refers to.
    pub fn failed_event(&self) -> Option<&MutationEvent> {
        match self {
            Self::Api { event, .. } => event.as_deref(),
            _ => None,
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidCondition(m) => Self::InvalidCondition(m),
            StorageError::NonUniqueResult(m) => Self::NonUniqueResult(m),
            StorageError::InvalidOperation(m) => Self::InvalidOperation(m),
            StorageError::ForeignKey(m) => Self::ForeignKey(m),
            StorageError::Model(e) => Self::from(e),
            StorageError::Serialization(e) => Self::Serialization(e),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ModelError> for SyncError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Serialization(e) => Self::Serialization(e),
            other => Self::InvalidOperation(other.to_string()),
        }
    }
}

impl From<localsync_types::Error> for SyncError {
    fn from(err: localsync_types::Error) -> Self {
        match err {
            localsync_types::Error::Serialization(e) => Self::Serialization(e),
            other => Self::Unknown(other.to_string()),
        }
    }
}
