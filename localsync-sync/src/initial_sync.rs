//! Initial sync: pulling each model's remote state into the local store.
//!
//! Models run in dependency levels. All models of a level sync concurrently,
//! and a level starts only when every model of the previous one finished, so
//! parents are present locally before their children arrive. A model's
//! failure is reported and does not stop the others.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::event::{EventHub, ModelSynced, SyncEvent};
use crate::reconcile::ReconcileOutcome;
use crate::reconciliation_queue::ReconciliationQueue;
use crate::remote::{RemoteApi, SyncQueryRequest};
use futures::future::join_all;
use localsync_model::ModelSchema;
use localsync_storage::{SqliteStorageAdapter, StorageResult};
use localsync_types::{ModelSyncMetadata, MutationType, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Chooses the delta-sync cursor for a model, or `None` for a full sync.
///
/// A full sync runs when the model never synced, when its sync expression
/// changed since the last sync, or when the last sync is older than
/// `sync_interval`.
pub fn get_last_sync_time(
    metadata: Option<&ModelSyncMetadata>,
    fingerprint: Option<&str>,
    sync_interval: Duration,
    now: Timestamp,
) -> Option<Timestamp> {
    let metadata = metadata?;
    if metadata.sync_predicate.as_deref() != fingerprint {
        return None;
    }
    let last_sync = metadata.last_sync?;
    if now.since(last_sync) > sync_interval {
        return None;
    }
    Some(last_sync)
}

/// Result of one model's initial sync.
#[derive(Debug)]
pub struct ModelSyncReport {
    pub model_name: String,
    pub result: SyncResult<ModelSynced>,
}

pub struct InitialSyncOrchestrator {
    adapter: Arc<SqliteStorageAdapter>,
    api: Arc<dyn RemoteApi>,
    events: EventHub,
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
}

impl InitialSyncOrchestrator {
    pub fn new(
        adapter: Arc<SqliteStorageAdapter>,
        api: Arc<dyn RemoteApi>,
        events: EventHub,
        config: SyncConfig,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            adapter,
            api,
            events,
            config,
            cancelled,
        }
    }

    /// Syncs every sync-enabled model, then emits `SyncQueriesReady`.
    pub async fn sync(&self, queue: &ReconciliationQueue) -> Vec<ModelSyncReport> {
        let catalog = Arc::clone(self.adapter.catalog());
        let levels = catalog.dependency_levels(catalog.syncable());
        let mut reports = Vec::new();

        for level in levels {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }
            let runs = level.iter().map(|schema| self.sync_model_reported(schema, queue));
            reports.extend(join_all(runs).await);
        }

        if !self.cancelled.load(Ordering::SeqCst) {
            self.events.emit(SyncEvent::SyncQueriesReady);
            info!("initial sync finished for {} models", reports.len());
        }
        reports
    }

    async fn sync_model_reported(
        &self,
        schema: &ModelSchema,
        queue: &ReconciliationQueue,
    ) -> ModelSyncReport {
        self.events.emit(SyncEvent::ModelSyncStarted {
            model_name: schema.name.clone(),
        });
        let result = self.sync_model(schema, queue).await;
        let error = match &result {
            Ok(synced) => {
                self.events.emit(SyncEvent::ModelSynced(synced.clone()));
                None
            }
            Err(e) => {
                warn!("initial sync of {} failed: {e}", schema.name);
                Some(e.to_string())
            }
        };
        self.events.emit(SyncEvent::ModelSyncFinished {
            model_name: schema.name.clone(),
            error,
        });
        ModelSyncReport {
            model_name: schema.name.clone(),
            result,
        }
    }

    /// Pages through the model's remote records, offering each page to the
    /// reconciliation queue, then stores the new sync cursor.
    pub async fn sync_model(
        &self,
        schema: &ModelSchema,
        queue: &ReconciliationQueue,
    ) -> SyncResult<ModelSynced> {
        let model_name = schema.name.as_str();
        let filter = self.config.sync_expressions.get(model_name).cloned();
        let fingerprint = filter.as_ref().map(|f| f.fingerprint()).transpose()?;
        let name = model_name.to_string();
        let metadata = self
            .storage(move |adapter| adapter.query_model_sync_metadata(&name))
            .await?;
        let last_sync = get_last_sync_time(
            metadata.as_ref(),
            fingerprint.as_deref(),
            self.config.sync_interval,
            Timestamp::now(),
        );
        debug!(
            "initial sync of {model_name}: {}",
            last_sync.map_or_else(|| "full".to_string(), |t| format!("delta since {t}"))
        );

        let mut next_token = None;
        let mut received = 0usize;
        let mut started_at = None;
        let mut outcomes = Vec::new();
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled);
            }
            let limit = self
                .config
                .sync_page_size
                .min(self.config.sync_max_records.saturating_sub(received))
                .max(1);
            let page = self
                .api
                .sync_query(SyncQueryRequest {
                    model_name: model_name.to_string(),
                    limit,
                    next_token: next_token.take(),
                    last_sync,
                    filter: filter.clone(),
                })
                .await?;
            debug!("initial sync of {model_name}: page of {} records", page.items.len());

            received += page.items.len();
            started_at = Some(page.started_at);
            outcomes.extend(queue.offer(page.items)?);
            next_token = page.next_token;
            if next_token.is_none() || received >= self.config.sync_max_records {
                break;
            }
        }

        let mut synced = ModelSynced {
            model_name: model_name.to_string(),
            is_full_sync: last_sync.is_none(),
            is_delta_sync: last_sync.is_some(),
            added: 0,
            updated: 0,
            deleted: 0,
        };
        for outcome in outcomes {
            match outcome.await {
                Ok(Ok(ReconcileOutcome::Applied { mutation_type, .. })) => match mutation_type {
                    MutationType::Create => synced.added += 1,
                    MutationType::Update => synced.updated += 1,
                    MutationType::Delete => synced.deleted += 1,
                },
                Ok(Ok(ReconcileOutcome::Dropped { .. })) | Ok(Err(_)) => {}
                Err(_) => return Err(SyncError::Cancelled),
            }
        }

        let cursor = ModelSyncMetadata {
            model_name: model_name.to_string(),
            last_sync: started_at,
            sync_predicate: fingerprint,
        };
        self.storage(move |adapter| adapter.save_model_sync_metadata(&cursor))
            .await?;
        info!(
            "initial sync of {model_name}: {} added, {} updated, {} deleted",
            synced.added, synced.updated, synced.deleted
        );
        Ok(synced)
    }

    /// Runs a storage call on the blocking pool.
    async fn storage<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&SqliteStorageAdapter) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let adapter = Arc::clone(&self.adapter);
        match tokio::task::spawn_blocking(move || f(&adapter)).await {
            Ok(result) => Ok(result?),
            Err(e) => {
                warn!("spawn_blocking panicked during initial sync: {e}");
                Err(SyncError::Internal(e.to_string()))
            }
        }
    }
}
