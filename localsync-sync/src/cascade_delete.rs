//! Deleting a record together with everything that references it.
//!
//! The operation runs in three phases:
//!
//! 1. In one transaction, find the roots and discover their dependents
//!    breadth-first through the catalog's dependency graph.
//! 2. In the same transaction, delete every discovered row, leaves first.
//! 3. After commit, queue one delete event per sync-enabled row in reverse
//!    discovery order, so the backend sees children deleted before parents.
//!
//! Local deletes are not rolled back when phase 3 fails part way; the caller
//! gets [`SyncError::CascadeIncomplete`] and the outbox holds what was queued.

use crate::error::{SyncError, SyncResult};
use crate::event::{EventHub, SyncEvent};
use crate::outbox::MutationOutbox;
use localsync_model::{field, AnyModel, QueryPredicate};
use localsync_storage::{SqliteStorageAdapter, StorageError, StorageResult, StorageSession};
use localsync_types::{MutationEvent, MutationType};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

/// What to delete.
#[derive(Debug, Clone)]
pub enum CascadeDeleteInput {
    /// One instance. A found instance failing `condition` aborts the delete.
    ById {
        model_name: String,
        id: String,
        condition: Option<QueryPredicate>,
    },
    /// Every instance matching the predicate.
    ByFilter {
        model_name: String,
        predicate: QueryPredicate,
    },
}

impl CascadeDeleteInput {
    pub fn by_id(model_name: &str, id: &str) -> Self {
        Self::ById {
            model_name: model_name.to_string(),
            id: id.to_string(),
            condition: None,
        }
    }

    pub fn by_filter(model_name: &str, predicate: QueryPredicate) -> Self {
        Self::ByFilter {
            model_name: model_name.to_string(),
            predicate,
        }
    }

    /// Adds a condition to a by-id delete. Filters ignore it.
    pub fn with_condition(mut self, predicate: QueryPredicate) -> Self {
        if let Self::ById { condition, .. } = &mut self {
            *condition = Some(predicate);
        }
        self
    }

    fn model_name(&self) -> &str {
        match self {
            Self::ById { model_name, .. } | Self::ByFilter { model_name, .. } => model_name,
        }
    }
}

/// A deleted row and the version the backend last reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedRow {
    pub model_id: String,
    pub model: AnyModel,
    pub version: Option<i64>,
}

/// Deleted rows of one model found at one step of the discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedGroup {
    pub model_name: String,
    pub rows: Vec<DeletedRow>,
}

pub struct CascadeDeleteOperation<'a> {
    adapter: &'a SqliteStorageAdapter,
    outbox: &'a MutationOutbox,
    events: &'a EventHub,
    max_predicates_per_query: usize,
}

impl<'a> CascadeDeleteOperation<'a> {
    pub fn new(
        adapter: &'a SqliteStorageAdapter,
        outbox: &'a MutationOutbox,
        events: &'a EventHub,
        max_predicates_per_query: usize,
    ) -> Self {
        Self {
            adapter,
            outbox,
            events,
            max_predicates_per_query: max_predicates_per_query.max(1),
        }
    }

    /// Runs all three phases and returns every deleted row, roots first.
    pub fn execute(&self, input: &CascadeDeleteInput) -> SyncResult<Vec<AnyModel>> {
        let groups = self.query_and_delete_transaction(input)?;
        let deleted: usize = groups.iter().map(|g| g.rows.len()).sum();
        info!("cascade delete from {}: {deleted} rows", input.model_name());
        self.sync_deletions(&groups)?;
        Ok(groups
            .into_iter()
            .flat_map(|g| g.rows.into_iter().map(|r| r.model))
            .collect())
    }

    /// Phases 1 and 2. Returns the groups in discovery order.
    pub fn query_and_delete_transaction(
        &self,
        input: &CascadeDeleteInput,
    ) -> SyncResult<Vec<DeletedGroup>> {
        let groups = self.adapter.transaction(|s| {
            let roots = self.query_roots(s, input)?;
            if roots.rows.is_empty() {
                return Ok(Vec::new());
            }
            let groups = self.discover(s, roots)?;
            for group in groups.iter().rev() {
                for row in &group.rows {
                    s.delete(&group.model_name, &row.model_id, None)?;
                }
            }
            Ok(groups)
        })?;
        Ok(groups)
    }

    fn query_roots(
        &self,
        s: &StorageSession<'_>,
        input: &CascadeDeleteInput,
    ) -> StorageResult<DeletedGroup> {
        let model_name = input.model_name().to_string();
        let schema = s.catalog().schema(&model_name)?;
        let models = match input {
            CascadeDeleteInput::ById { id, condition, .. } => {
                let Some(root) = s.query_by_id(&model_name, id)? else {
                    debug!("cascade delete: {model_name} {id} not found");
                    return Ok(DeletedGroup {
                        model_name,
                        rows: Vec::new(),
                    });
                };
                if let Some(condition) = condition {
                    if !s.exists(&model_name, id, Some(condition))? {
                        return Err(StorageError::InvalidCondition(format!(
                            "{model_name} {id} does not satisfy the delete condition"
                        )));
                    }
                }
                vec![root]
            }
            CascadeDeleteInput::ByFilter { predicate, .. } => {
                s.query(&model_name, Some(predicate), &[], None)?
            }
        };

        let rows = models
            .into_iter()
            .map(|model| {
                let model_id = model.identifier(schema)?;
                Self::row(s, model, model_id)
            })
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(DeletedGroup { model_name, rows })
    }

    /// Breadth-first walk from the roots. Each row appears once even when
    /// reachable through several foreign keys.
    fn discover(
        &self,
        s: &StorageSession<'_>,
        roots: DeletedGroup,
    ) -> StorageResult<Vec<DeletedGroup>> {
        let catalog = s.catalog();
        let mut seen: HashSet<(String, String)> = roots
            .rows
            .iter()
            .map(|r| (roots.model_name.clone(), r.model_id.clone()))
            .collect();
        let mut frontier = VecDeque::from([roots]);
        let mut groups = Vec::new();

        while let Some(group) = frontier.pop_front() {
            let parent_ids: Vec<&str> = group.rows.iter().map(|r| r.model_id.as_str()).collect();
            for dependent in catalog.dependents_of(&group.model_name) {
                let schema = catalog.schema(&dependent.model_name)?;
                let mut rows = Vec::new();
                for chunk in parent_ids.chunks(self.max_predicates_per_query) {
                    let predicate = QueryPredicate::or_all(
                        chunk
                            .iter()
                            .map(|id| field(&dependent.foreign_key).eq(*id))
                            .collect(),
                    );
                    for model in s.query(&dependent.model_name, Some(&predicate), &[], None)? {
                        let model_id = model.identifier(schema)?;
                        if seen.insert((dependent.model_name.clone(), model_id.clone())) {
                            rows.push(Self::row(s, model, model_id)?);
                        }
                    }
                }
                if !rows.is_empty() {
                    debug!(
                        "cascade delete: {} dependent {} rows via {}",
                        rows.len(),
                        dependent.model_name,
                        dependent.foreign_key
                    );
                    frontier.push_back(DeletedGroup {
                        model_name: dependent.model_name.clone(),
                        rows,
                    });
                }
            }
            groups.push(group);
        }
        Ok(groups)
    }

    fn row(s: &StorageSession<'_>, model: AnyModel, model_id: String) -> StorageResult<DeletedRow> {
        let version = s
            .query_mutation_sync_metadata(&model.model_name, &model_id)?
            .map(|m| m.version);
        Ok(DeletedRow {
            model_id,
            model,
            version,
        })
    }

    /// Phase 3. Publishes every deletion and queues deletes for sync-enabled
    /// models, children first.
    pub fn sync_deletions(&self, groups: &[DeletedGroup]) -> SyncResult<()> {
        let catalog = self.adapter.catalog();
        let mut total = 0;
        let mut submitted = 0;
        let mut first_error = None;

        for group in groups.iter().rev() {
            let sync_enabled = catalog
                .get(&group.model_name)
                .is_some_and(|schema| schema.sync_enabled);
            for row in &group.rows {
                let event = MutationEvent::new(
                    row.model_id.clone(),
                    group.model_name.clone(),
                    row.model.to_json_string()?,
                    MutationType::Delete,
                )
                .with_version(row.version);
                self.events.emit(SyncEvent::MutationEvent(event.clone()));
                if !sync_enabled {
                    continue;
                }

                total += 1;
                match self.outbox.enqueue(event) {
                    Ok(_) => submitted += 1,
                    Err(e) => {
                        warn!(
                            "cascade delete: cannot queue delete of {} {}: {e}",
                            group.model_name, row.model_id
                        );
                        first_error.get_or_insert_with(|| e.to_string());
                    }
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(message) => Err(SyncError::CascadeIncomplete {
                submitted,
                total,
                message,
            }),
        }
    }
}
