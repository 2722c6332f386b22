//! Core sync record types for localsync.
//!
//! This crate defines the model-agnostic records that flow between the local
//! store, the outbox and the remote backend:
//! - Outbox entry keys (UUID v7)
//! - Epoch-millisecond timestamps
//! - Mutation events, per-record sync metadata and per-model sync metadata
//!
//! Model schemas and model instances live in `localsync-model`.

mod ids;
mod mutation;
mod timestamp;

pub use ids::MutationEventId;
pub use mutation::{
    ModelSyncMetadata, MutationEvent, MutationSync, MutationSyncMetadata, MutationType,
};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("not a mutation event id: {0}")]
    InvalidMutationEventId(String),

    #[error("invalid mutation type: {0}")]
    InvalidMutationType(String),
}
