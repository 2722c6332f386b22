//! Sync engine for localsync.
//!
//! Keeps a local SQLite store in step with a remote backend. Applications
//! read and write through the [`StorageEngine`]; the [`RemoteSyncEngine`]
//! pulls remote state in and pushes local changes out.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Storage engine**: the application-facing store. Writes to
//!   sync-enabled models also persist a mutation event.
//! - **Outbox**: durable FIFO of local mutations, one in flight at a time.
//! - **Initial sync**: pages each model's remote state in, parents before
//!   children, as a full or delta sync.
//! - **Reconciliation**: one serial queue per model applying remote records
//!   through a small state machine and the version rule.
//! - **Cascade delete**: deletes a record and everything referencing it,
//!   queueing child deletes before parent deletes.
//! - **Remote sync engine**: the lifecycle state machine tying these
//!   together.
//!
//! ## Sync process
//!
//! 1. **Pause**: subscriptions open buffered and the outbox holds back.
//! 2. **Initial sync**: every model's remote records are reconciled.
//! 3. **Activate**: buffered live records flow to reconciliation.
//! 4. **Drain**: the outbox submits queued local mutations.
//!
//! # Example
//!
//! ```no_run
//! use localsync_model::{ModelField, ModelSchema, SchemaCatalog};
//! use localsync_storage::SqliteStorageAdapter;
//! use localsync_sync::mock::{MockRemoteApi, MockSubscriptionProvider};
//! use localsync_sync::{RemoteSyncEngine, StorageEngine, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = SchemaCatalog::new(vec![
//!     ModelSchema::new("Post").field(ModelField::string("id")).field(ModelField::string("title")),
//! ])?;
//! let adapter = SqliteStorageAdapter::open_in_memory(Arc::new(catalog))?;
//! let storage = Arc::new(StorageEngine::open(adapter, SyncConfig::default())?);
//!
//! let engine = Arc::new(RemoteSyncEngine::new(
//!     Arc::clone(&storage),
//!     Arc::new(MockRemoteApi::new()),
//!     Arc::new(MockSubscriptionProvider::new()),
//! ));
//! engine.start().await;
//! # Ok(())
//! # }
//! ```

pub mod cascade_delete;
mod config;
pub mod conflict;
mod error;
mod event;
pub mod initial_sync;
pub mod outbox;
pub mod reconcile;
pub mod reconciliation_queue;
pub mod remote;
mod remote_engine;
mod storage_engine;

pub use cascade_delete::{CascadeDeleteInput, CascadeDeleteOperation, DeletedGroup, DeletedRow};
pub use config::{RetryConfig, SyncConfig, DEFAULT_SYNC_INTERVAL};
pub use conflict::{
    resolve_conflict, ApplyRemoteHandler, ConflictAction, ConflictData, ConflictHandler,
    ConflictResolution,
};
pub use error::{SyncError, SyncResult};
pub use event::{DropReason, EventHub, ModelSynced, SyncEvent};
pub use initial_sync::{get_last_sync_time, InitialSyncOrchestrator, ModelSyncReport};
pub use outbox::{MutationOutbox, OutboxState, Persisted};
pub use reconcile::{
    disposition, transition, Disposition, ReconcileAction, ReconcileAndLocalSave,
    ReconcileOutcome, ReconcileState,
};
pub use reconciliation_queue::{OutcomeReceiver, ReconciliationQueue};
pub use remote::{
    mock, ConnectionState, PaginatedList, RemoteApi, RemoteError, RetryAdvice, RetryPolicy,
    SubscriptionEvent, SubscriptionProvider, SyncQueryRequest,
};
pub use remote_engine::{EngineState, RemoteSyncEngine};
pub use storage_engine::StorageEngine;
