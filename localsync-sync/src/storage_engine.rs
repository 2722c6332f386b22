//! Application-facing store.
//!
//! Every write goes through here. Writes to sync-enabled models persist a
//! mutation event in the same transaction as the row, so the outbox never
//! misses or invents a change. Every write is also published locally.

use crate::cascade_delete::{CascadeDeleteInput, CascadeDeleteOperation};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::event::{EventHub, SyncEvent};
use crate::outbox::{self, MutationOutbox, Persisted};
use crate::remote_engine::RemoteSyncEngine;
use localsync_model::{AnyModel, Model, ModelSchema, Pagination, QueryPredicate, SortDescriptor};
use localsync_storage::{SqliteStorageAdapter, StorageResult, StorageSession};
use localsync_types::{MutationEvent, MutationType};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct StorageEngine {
    adapter: Arc<SqliteStorageAdapter>,
    outbox: Arc<MutationOutbox>,
    events: EventHub,
    config: SyncConfig,
    sync_engine: Mutex<Option<Weak<RemoteSyncEngine>>>,
}

impl StorageEngine {
    /// Creates any missing tables and wraps the adapter.
    pub fn open(adapter: SqliteStorageAdapter, config: SyncConfig) -> SyncResult<Self> {
        adapter.set_up_all()?;
        let adapter = Arc::new(adapter);
        let events = EventHub::new(config.event_capacity);
        let outbox = Arc::new(MutationOutbox::new(Arc::clone(&adapter), events.clone()));
        info!("storage engine opened with {} models", adapter.catalog().len());
        Ok(Self {
            adapter,
            outbox,
            events,
            config,
            sync_engine: Mutex::new(None),
        })
    }

    /// Subscribes to the event stream. Earlier events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn outbox(&self) -> &Arc<MutationOutbox> {
        &self.outbox
    }

    /// The underlying store.
    pub fn adapter(&self) -> &Arc<SqliteStorageAdapter> {
        &self.adapter
    }

    pub(crate) fn events(&self) -> &EventHub {
        &self.events
    }

    pub(crate) fn register_sync_engine(&self, engine: Weak<RemoteSyncEngine>) {
        *self
            .sync_engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(engine);
    }

    fn schema(&self, model_name: &str) -> SyncResult<Arc<ModelSchema>> {
        Ok(Arc::clone(self.adapter.catalog().schema(model_name)?))
    }

    /// Saves a model. For a sync-enabled model, queues a create if the row
    /// is new and an update otherwise, carrying the last known version.
    pub fn save(
        &self,
        model: &AnyModel,
        condition: Option<&QueryPredicate>,
    ) -> SyncResult<AnyModel> {
        let schema = self.schema(&model.model_name)?;
        let (saved, event, persisted) = self.adapter.transaction(|s| {
            let (saved, mutation_type) = s.save(model, condition)?;
            let id = saved.identifier(&schema)?;
            let event = Self::local_event(s, &schema, id, &saved, mutation_type, condition)?;
            let persisted = Self::persist_if_syncable(s, &schema, &event)?;
            Ok((saved, event, persisted))
        })?;
        self.publish(event, persisted);
        Ok(saved)
    }

    /// Saves a typed model.
    pub fn save_model<M: Model>(&self, model: &M) -> SyncResult<M> {
        let saved = self.save(&AnyModel::from_model(model)?, None)?;
        Ok(saved.into_model()?)
    }

    /// Deletes one row, queuing a delete for a sync-enabled model.
    ///
    /// Rows referencing this one are removed by the database without events
    /// of their own; use [`cascade_delete`](Self::cascade_delete) for models
    /// with dependents.
    pub fn delete(
        &self,
        model_name: &str,
        id: &str,
        condition: Option<&QueryPredicate>,
    ) -> SyncResult<Option<AnyModel>> {
        let schema = self.schema(model_name)?;
        let deleted = self.adapter.transaction(|s| {
            let Some(deleted) = s.delete(model_name, id, condition)? else {
                return Ok(None);
            };
            let event = Self::local_event(
                s,
                &schema,
                id.to_string(),
                &deleted,
                MutationType::Delete,
                condition,
            )?;
            let persisted = Self::persist_if_syncable(s, &schema, &event)?;
            Ok(Some((deleted, event, persisted)))
        })?;

        match deleted {
            Some((deleted, event, persisted)) => {
                self.publish(event, persisted);
                Ok(Some(deleted))
            }
            None => {
                debug!("delete: {model_name} {id} not found");
                Ok(None)
            }
        }
    }

    /// Deletes roots and all rows that reference them. See
    /// [`CascadeDeleteOperation`].
    pub fn cascade_delete(&self, input: CascadeDeleteInput) -> SyncResult<Vec<AnyModel>> {
        CascadeDeleteOperation::new(
            &self.adapter,
            &self.outbox,
            &self.events,
            self.config.max_predicates_per_query,
        )
        .execute(&input)
    }

    pub fn query(
        &self,
        model_name: &str,
        predicate: Option<&QueryPredicate>,
        sort: &[SortDescriptor],
        pagination: Option<Pagination>,
    ) -> SyncResult<Vec<AnyModel>> {
        Ok(self.adapter.query(model_name, predicate, sort, pagination)?)
    }

    pub fn query_models<M: Model>(&self, predicate: Option<&QueryPredicate>) -> SyncResult<Vec<M>> {
        Ok(self.adapter.query_models(predicate)?)
    }

    pub fn query_by_id(&self, model_name: &str, id: &str) -> SyncResult<Option<AnyModel>> {
        Ok(self.adapter.query_by_id(model_name, id)?)
    }

    /// Stops any running sync and deletes every local row, queued mutations
    /// and sync metadata included.
    pub async fn clear(&self) -> SyncResult<()> {
        let engine = self
            .sync_engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(engine) = engine {
            engine.stop().await;
        }
        self.outbox.stop().await;
        self.adapter.clear()?;
        self.events.emit(SyncEvent::OutboxStatus { is_empty: true });
        Ok(())
    }

    fn local_event(
        s: &StorageSession<'_>,
        schema: &ModelSchema,
        id: String,
        model: &AnyModel,
        mutation_type: MutationType,
        condition: Option<&QueryPredicate>,
    ) -> StorageResult<MutationEvent> {
        let version = s
            .query_mutation_sync_metadata(&schema.name, &id)?
            .map(|m| m.version);
        let condition = condition
            .filter(|c| **c != QueryPredicate::All)
            .map(QueryPredicate::fingerprint)
            .transpose()?;
        Ok(MutationEvent::new(
            id,
            schema.name.clone(),
            model.to_json_string()?,
            mutation_type,
        )
        .with_version(version)
        .with_condition(condition))
    }

    fn persist_if_syncable(
        s: &StorageSession<'_>,
        schema: &ModelSchema,
        event: &MutationEvent,
    ) -> StorageResult<Option<Persisted>> {
        if !schema.sync_enabled {
            return Ok(None);
        }
        outbox::persist(s, event.clone()).map(Some)
    }

    fn publish(&self, event: MutationEvent, persisted: Option<Persisted>) {
        self.events.emit(SyncEvent::MutationEvent(event));
        if let Some(persisted) = persisted {
            self.outbox.notify(&persisted);
        }
    }
}
