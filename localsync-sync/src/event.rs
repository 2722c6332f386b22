//! Events emitted by the storage and sync engines.
//!
//! Every component publishes on one broadcast channel. Subscribers only see
//! events sent after they subscribed; there is no replay.

use crate::remote::ConnectionState;
use crate::remote_engine::EngineState;
use localsync_model::AnyModel;
use localsync_types::{MutationEvent, MutationSync, MutationSyncMetadata, MutationType};
use tokio::sync::broadcast;
use tracing::trace;

/// Why a remote record was not applied locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The local copy is at the same or a newer version.
    Stale,
    /// A local change to the record is waiting in the outbox.
    PendingMutation,
}

/// Summary of one model's initial sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSynced {
    pub model_name: String,
    pub is_full_sync: bool,
    pub is_delta_sync: bool,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// An event published to observers.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A local write or delete, or a remote record applied locally.
    MutationEvent(MutationEvent),
    ModelSyncStarted {
        model_name: String,
    },
    ModelSyncFinished {
        model_name: String,
        error: Option<String>,
    },
    ModelSynced(ModelSynced),
    /// Every model finished its initial sync.
    SyncQueriesReady,
    /// The engine reached steady state.
    Ready,
    ReconciliationApplied {
        model_name: String,
        model_id: String,
        mutation_type: MutationType,
        version: i64,
        /// The remote record with its sync metadata.
        record: MutationSync<AnyModel>,
    },
    ReconciliationDropped {
        model_name: String,
        model_id: String,
        reason: DropReason,
        record: MutationSync<AnyModel>,
    },
    /// A remote record could not be reconciled.
    ReconciliationFailed {
        model_name: String,
        message: String,
    },
    OutboxStatus {
        is_empty: bool,
    },
    OutboxMutationEnqueued(MutationEvent),
    OutboxMutationProcessed {
        event: MutationEvent,
        sync_metadata: MutationSyncMetadata,
    },
    /// The backend refused a mutation whose condition did not hold.
    ConditionalSaveFailed(MutationEvent),
    /// The backend rejected a mutation; it was removed from the outbox.
    MutationFailed {
        event: MutationEvent,
        message: String,
    },
    Connection {
        model_name: String,
        state: ConnectionState,
    },
    Lifecycle(EngineState),
}

/// Cloneable publisher for [`SyncEvent`]s.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }
}
