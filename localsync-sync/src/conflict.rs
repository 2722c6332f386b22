//! Resolution of mutations the backend rejected as conflicting.

use crate::error::SyncResult;
use async_trait::async_trait;
use localsync_model::AnyModel;
use localsync_types::{MutationEvent, MutationSync, MutationType};

/// The two sides of an update conflict.
#[derive(Debug, Clone)]
pub struct ConflictData {
    /// The local payload that was rejected.
    pub local: AnyModel,
    /// The backend's current record.
    pub remote: AnyModel,
}

/// How the application wants an update conflict settled.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Keep the backend's record and overwrite the local copy.
    ApplyRemote,
    /// Send the local payload again against the backend's version.
    RetryLocal,
    /// Save and send this model against the backend's version.
    Retry(AnyModel),
}

/// Application hook for update conflicts.
#[async_trait]
pub trait ConflictHandler: Send + Sync {
    async fn resolve(&self, conflict: ConflictData) -> ConflictResolution;
}

/// Always keeps the backend's record.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApplyRemoteHandler;

#[async_trait]
impl ConflictHandler for ApplyRemoteHandler {
    async fn resolve(&self, _conflict: ConflictData) -> ConflictResolution {
        ConflictResolution::ApplyRemote
    }
}

/// Local effect of an unhandled conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    /// Nothing to change locally.
    None,
    /// Overwrite the local row with the backend's record and metadata.
    SaveRemote(MutationSync<AnyModel>),
    /// Remove the local row; the backend holds a tombstone.
    DeleteLocal(MutationSync<AnyModel>),
    /// Save `model` locally and queue an update against `version`.
    Resubmit { model: AnyModel, version: i64 },
}

/// Decides the local effect of a conflict reported for `event`.
///
/// A rejected delete restores the backend's record unless it is deleted there
/// too. A rejected create or update follows the backend's tombstone, and
/// otherwise defers to `handler`.
pub async fn resolve_conflict(
    event: &MutationEvent,
    remote: MutationSync<AnyModel>,
    handler: &dyn ConflictHandler,
) -> SyncResult<ConflictAction> {
    let remote_deleted = remote.sync_metadata.deleted;
    match event.mutation_type {
        MutationType::Delete if remote_deleted => Ok(ConflictAction::None),
        MutationType::Delete => Ok(ConflictAction::SaveRemote(remote)),
        MutationType::Create | MutationType::Update if remote_deleted => {
            Ok(ConflictAction::DeleteLocal(remote))
        }
        MutationType::Create | MutationType::Update => {
            let local = AnyModel::new(event.model_name.clone(), event.payload()?)?;
            let version = remote.sync_metadata.version;
            let conflict = ConflictData {
                local: local.clone(),
                remote: remote.model.clone(),
            };
            Ok(match handler.resolve(conflict).await {
                ConflictResolution::ApplyRemote => ConflictAction::SaveRemote(remote),
                ConflictResolution::RetryLocal => ConflictAction::Resubmit {
                    model: local,
                    version,
                },
                ConflictResolution::Retry(model) => ConflictAction::Resubmit { model, version },
            })
        }
    }
}
