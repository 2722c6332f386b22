//! Reconciliation of one remote record against the local store.
//!
//! Each record walks a small state machine:
//!
//! ```text
//! waiting -> deserializing -> querying -> reconciling -> saving -> notifying -> finished
//!                                              \__________(drop)__/
//! ```
//!
//! with `in_error` reachable from every state and absorbing. [`transition`]
//! is pure; [`ReconcileAndLocalSave`] performs the I/O each state calls for
//! and feeds the result back in as an action.

use crate::error::{SyncError, SyncResult};
use crate::event::{DropReason, EventHub, SyncEvent};
use localsync_model::AnyModel;
use localsync_storage::SqliteStorageAdapter;
use localsync_types::{MutationEvent, MutationSync, MutationSyncMetadata, MutationType};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether a remote record replaces local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Apply,
    Drop(DropReason),
}

/// The version rule.
///
/// A record with a pending local mutation is dropped. Otherwise a record with
/// no local metadata is applied; one with metadata is applied only if its
/// version is newer, or equal while it deletes a record that is live locally.
pub fn disposition(
    remote: &MutationSyncMetadata,
    local: Option<&MutationSyncMetadata>,
    has_pending_mutation: bool,
) -> Disposition {
    if has_pending_mutation {
        return Disposition::Drop(DropReason::PendingMutation);
    }
    match local {
        None => Disposition::Apply,
        Some(local) if remote.version > local.version => Disposition::Apply,
        Some(local) if remote.version == local.version && remote.deleted && !local.deleted => {
            Disposition::Apply
        }
        Some(_) => Disposition::Drop(DropReason::Stale),
    }
}

/// Final result for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        model_name: String,
        model_id: String,
        mutation_type: MutationType,
        version: i64,
    },
    Dropped {
        model_name: String,
        model_id: String,
        reason: DropReason,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileState {
    Waiting,
    Deserializing(MutationSync<Value>),
    Querying(MutationSync<AnyModel>),
    Reconciling {
        remote: MutationSync<AnyModel>,
        local: Option<MutationSyncMetadata>,
        has_pending_mutation: bool,
    },
    Saving(MutationSync<AnyModel>),
    Notifying {
        outcome: ReconcileOutcome,
        remote: MutationSync<AnyModel>,
    },
    Finished(ReconcileOutcome),
    InError(String),
}

impl ReconcileState {
    fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Deserializing(_) => "deserializing",
            Self::Querying(_) => "querying",
            Self::Reconciling { .. } => "reconciling",
            Self::Saving(_) => "saving",
            Self::Notifying { .. } => "notifying",
            Self::Finished(_) => "finished",
            Self::InError(_) => "in_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    Started(MutationSync<Value>),
    Deserialized(MutationSync<AnyModel>),
    Queried {
        local: Option<MutationSyncMetadata>,
        has_pending_mutation: bool,
    },
    Reconciled(Disposition),
    Saved(MutationType),
    Notified,
    Errored(String),
}

impl ReconcileAction {
    fn name(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::Deserialized(_) => "deserialized",
            Self::Queried { .. } => "queried",
            Self::Reconciled(_) => "reconciled",
            Self::Saved(_) => "saved",
            Self::Notified => "notified",
            Self::Errored(_) => "errored",
        }
    }
}

/// Applies an action to a state. Actions that do not fit the state lead to
/// `InError`.
pub fn transition(state: ReconcileState, action: ReconcileAction) -> ReconcileState {
    use ReconcileAction as A;
    use ReconcileState as S;

    match (state, action) {
        (S::InError(message), _) => S::InError(message),
        (_, A::Errored(message)) => S::InError(message),
        (S::Waiting, A::Started(item)) => S::Deserializing(item),
        (S::Deserializing(_), A::Deserialized(remote)) => S::Querying(remote),
        (
            S::Querying(remote),
            A::Queried {
                local,
                has_pending_mutation,
            },
        ) => S::Reconciling {
            remote,
            local,
            has_pending_mutation,
        },
        (S::Reconciling { remote, .. }, A::Reconciled(Disposition::Apply)) => S::Saving(remote),
        (S::Reconciling { remote, .. }, A::Reconciled(Disposition::Drop(reason))) => S::Notifying {
            outcome: ReconcileOutcome::Dropped {
                model_name: remote.sync_metadata.model_name.clone(),
                model_id: remote.sync_metadata.model_id.clone(),
                reason,
            },
            remote,
        },
        (S::Saving(remote), A::Saved(mutation_type)) => S::Notifying {
            outcome: ReconcileOutcome::Applied {
                model_name: remote.sync_metadata.model_name.clone(),
                model_id: remote.sync_metadata.model_id.clone(),
                mutation_type,
                version: remote.sync_metadata.version,
            },
            remote,
        },
        (S::Notifying { outcome, .. }, A::Notified) => S::Finished(outcome),
        (state, action) => S::InError(format!(
            "unexpected action {} in state {}",
            action.name(),
            state.name()
        )),
    }
}

/// Drives [`transition`] for one record at a time against the local store.
pub struct ReconcileAndLocalSave {
    adapter: Arc<SqliteStorageAdapter>,
    events: EventHub,
}

impl ReconcileAndLocalSave {
    pub fn new(adapter: Arc<SqliteStorageAdapter>, events: EventHub) -> Self {
        Self { adapter, events }
    }

    /// Reconciles one remote record. A failure affects this record only and
    /// is also published as `ReconciliationFailed`.
    pub fn run(&self, item: MutationSync<Value>) -> SyncResult<ReconcileOutcome> {
        let model_name = item.sync_metadata.model_name.clone();
        let mut failure: Option<SyncError> = None;
        let mut state = transition(ReconcileState::Waiting, ReconcileAction::Started(item));

        loop {
            let step = match &state {
                ReconcileState::Waiting => Err(SyncError::Internal("reconcile never started".into())),
                ReconcileState::Deserializing(item) => self.deserialize(item),
                ReconcileState::Querying(remote) => self.query(remote),
                ReconcileState::Reconciling {
                    remote,
                    local,
                    has_pending_mutation,
                } => Ok(ReconcileAction::Reconciled(disposition(
                    &remote.sync_metadata,
                    local.as_ref(),
                    *has_pending_mutation,
                ))),
                ReconcileState::Saving(remote) => self.save(remote),
                ReconcileState::Notifying { outcome, remote } => {
                    self.notify(outcome, remote);
                    Ok(ReconcileAction::Notified)
                }
                ReconcileState::Finished(outcome) => return Ok(outcome.clone()),
                ReconcileState::InError(message) => {
                    warn!("reconcile {model_name}: {message}");
                    self.events.emit(SyncEvent::ReconciliationFailed {
                        model_name,
                        message: message.clone(),
                    });
                    return Err(failure.unwrap_or_else(|| SyncError::Internal(message.clone())));
                }
            };
            let action = match step {
                Ok(action) => action,
                Err(e) => {
                    let action = ReconcileAction::Errored(e.to_string());
                    failure = Some(e);
                    action
                }
            };
            state = transition(state, action);
        }
    }

    fn deserialize(&self, item: &MutationSync<Value>) -> SyncResult<ReconcileAction> {
        let metadata = &item.sync_metadata;
        let schema = self.adapter.catalog().schema(&metadata.model_name)?;
        let model = AnyModel::new(metadata.model_name.clone(), item.model.clone())?;
        if !metadata.deleted {
            model.validate(schema)?;
        }
        let id = model.identifier(schema)?;
        if id != metadata.model_id {
            return Err(SyncError::InvalidOperation(format!(
                "{} payload has identifier {id} but metadata names {}",
                metadata.model_name, metadata.model_id
            )));
        }
        Ok(ReconcileAction::Deserialized(MutationSync::new(model, metadata.clone())))
    }

    fn query(&self, remote: &MutationSync<AnyModel>) -> SyncResult<ReconcileAction> {
        let name = &remote.sync_metadata.model_name;
        let id = &remote.sync_metadata.model_id;
        let (local, has_pending_mutation) = self.adapter.session(|s| {
            s.query_by_id(name, id)?;
            let local = s.query_mutation_sync_metadata(name, id)?;
            let pending = !s.pending_mutation_events(name, id)?.is_empty();
            Ok((local, pending))
        })?;
        Ok(ReconcileAction::Queried {
            local,
            has_pending_mutation,
        })
    }

    fn save(&self, remote: &MutationSync<AnyModel>) -> SyncResult<ReconcileAction> {
        let metadata = &remote.sync_metadata;
        let mutation_type = self.adapter.transaction(|s| {
            let mutation_type = if metadata.deleted {
                s.delete(&metadata.model_name, &metadata.model_id, None)?;
                MutationType::Delete
            } else {
                s.save(&remote.model, None)?.1
            };
            s.save_mutation_sync_metadata(metadata)?;
            Ok(mutation_type)
        })?;

        let local = MutationEvent::new(
            metadata.model_id.clone(),
            metadata.model_name.clone(),
            remote.model.to_json_string()?,
            mutation_type,
        )
        .with_version(Some(metadata.version));
        self.events.emit(SyncEvent::MutationEvent(local));
        Ok(ReconcileAction::Saved(mutation_type))
    }

    /// Publishes the outcome together with the decoded remote record.
    fn notify(&self, outcome: &ReconcileOutcome, remote: &MutationSync<AnyModel>) {
        let record = remote.clone();
        match outcome.clone() {
            ReconcileOutcome::Applied {
                model_name,
                model_id,
                mutation_type,
                version,
            } => {
                debug!("reconcile: applied {mutation_type} {model_name} {model_id} v{version}");
                self.events.emit(SyncEvent::ReconciliationApplied {
                    model_name,
                    model_id,
                    mutation_type,
                    version,
                    record,
                });
            }
            ReconcileOutcome::Dropped {
                model_name,
                model_id,
                reason,
            } => {
                debug!("reconcile: dropped {model_name} {model_id} ({reason:?})");
                self.events.emit(SyncEvent::ReconciliationDropped {
                    model_name,
                    model_id,
                    reason,
                    record,
                });
            }
        }
    }
}
