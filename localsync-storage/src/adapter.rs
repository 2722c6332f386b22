//! SQLite-backed local store.
//!
//! One connection serves every component, serialized behind a mutex. Model
//! tables are generated from the schema catalog; three engine-owned tables
//! hold the mutation outbox, per-record sync metadata and per-model sync
//! cursors.
//!
//! All operations live on [`StorageSession`], which borrows the connection.
//! [`SqliteStorageAdapter::session`] runs a closure against a plain session
//! and [`SqliteStorageAdapter::transaction`] against a session inside one
//! SQLite transaction that commits only if the closure succeeds.

use crate::error::{StorageError, StorageResult};
use crate::translator::{self, SelectedColumn, SqlValue, Statement};
use localsync_model::{
    AnyModel, FieldType, Model, ModelSchema, Pagination, QueryPredicate, SchemaCatalog,
    SortDescriptor, COMPOSITE_KEY_COLUMN,
};
use localsync_types::{
    ModelSyncMetadata, MutationEvent, MutationEventId, MutationSync, MutationSyncMetadata,
    MutationType, Timestamp,
};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const ENGINE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS mutation_event (
        id TEXT PRIMARY KEY NOT NULL,
        model_id TEXT NOT NULL,
        model_name TEXT NOT NULL,
        json TEXT NOT NULL,
        mutation_type TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        version INTEGER,
        in_process INTEGER NOT NULL DEFAULT 0,
        condition TEXT
    );

    CREATE INDEX IF NOT EXISTS mutation_event_by_model
        ON mutation_event (model_name, model_id);

    CREATE TABLE IF NOT EXISTS mutation_sync_metadata (
        model_name TEXT NOT NULL,
        model_id TEXT NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        last_changed_at INTEGER NOT NULL,
        version INTEGER NOT NULL,
        PRIMARY KEY (model_name, model_id)
    );

    CREATE TABLE IF NOT EXISTS model_sync_metadata (
        model_name TEXT PRIMARY KEY NOT NULL,
        last_sync INTEGER,
        sync_predicate TEXT
    );
";

const MUTATION_EVENT_COLUMNS: &str =
    "id, model_id, model_name, json, mutation_type, created_at, version, in_process, condition";

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Sql::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Sql::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Sql::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Local store backed by a single SQLite connection.
pub struct SqliteStorageAdapter {
    conn: Mutex<Connection>,
    catalog: Arc<SchemaCatalog>,
}

impl SqliteStorageAdapter {
    /// Opens (or creates) a store at the given path.
    ///
    /// Engine tables are created immediately; model tables are created by
    /// [`set_up`](Self::set_up).
    pub fn new(path: impl AsRef<Path>, catalog: Arc<SchemaCatalog>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, catalog)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(catalog: Arc<SchemaCatalog>) -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, catalog)
    }

    fn with_connection(conn: Connection, catalog: Arc<SchemaCatalog>) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(ENGINE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            catalog,
        })
    }

    /// The catalog this store was created for.
    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("connection lock poisoned: {e}")))
    }

    /// Runs `f` against a session on the shared connection.
    pub fn session<T>(
        &self,
        f: impl FnOnce(&StorageSession<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let conn = self.lock()?;
        f(&StorageSession::new(&conn, &self.catalog))
    }

    /// Runs `f` inside one transaction; any error rolls everything back.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&StorageSession<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let result = f(&StorageSession::new(&tx, &self.catalog))?;
        tx.commit()?;
        Ok(result)
    }

    /// Creates tables for every schema in the catalog.
    pub fn set_up_all(&self) -> StorageResult<()> {
        self.set_up(self.catalog.sorted())
    }

    /// Creates tables for the given schemas, in the order given.
    ///
    /// Every parent referenced by a schema must already have a table, so the
    /// schemas must be in dependency order.
    pub fn set_up(&self, schemas: &[Arc<ModelSchema>]) -> StorageResult<()> {
        self.session(|s| {
            for schema in schemas {
                for parent in self.catalog.parents_of(&schema.name) {
                    if !s.table_exists(parent)? {
                        return Err(StorageError::ForeignKey(format!(
                            "foreign key from {} references {parent}, which has no table yet",
                            schema.name
                        )));
                    }
                }
                let ddl = translator::create_table(schema, &self.catalog)?;
                s.conn.execute_batch(&ddl)?;
                debug!("created table {}", schema.name);
            }
            Ok(())
        })
    }

    // ── Convenience wrappers ─────────────────────────────────────

    /// Upserts a model. See [`StorageSession::save`].
    pub fn save(
        &self,
        model: &AnyModel,
        condition: Option<&QueryPredicate>,
    ) -> StorageResult<(AnyModel, MutationType)> {
        self.session(|s| s.save(model, condition))
    }

    /// Upserts a typed model.
    pub fn save_model<M: Model>(&self, model: &M) -> StorageResult<M> {
        let (saved, _) = self.save(&AnyModel::from_model(model)?, None)?;
        Ok(saved.into_model()?)
    }

    /// Deletes one row. See [`StorageSession::delete`].
    pub fn delete(
        &self,
        model_name: &str,
        id: &str,
        condition: Option<&QueryPredicate>,
    ) -> StorageResult<Option<AnyModel>> {
        self.session(|s| s.delete(model_name, id, condition))
    }

    /// Queries rows. See [`StorageSession::query`].
    pub fn query(
        &self,
        model_name: &str,
        predicate: Option<&QueryPredicate>,
        sort: &[SortDescriptor],
        pagination: Option<Pagination>,
    ) -> StorageResult<Vec<AnyModel>> {
        self.session(|s| s.query(model_name, predicate, sort, pagination))
    }

    /// Queries typed models.
    pub fn query_models<M: Model>(
        &self,
        predicate: Option<&QueryPredicate>,
    ) -> StorageResult<Vec<M>> {
        self.query(M::model_name(), predicate, &[], None)?
            .into_iter()
            .map(|m| m.into_model().map_err(StorageError::from))
            .collect()
    }

    /// Looks up one row by identifier.
    pub fn query_by_id(&self, model_name: &str, id: &str) -> StorageResult<Option<AnyModel>> {
        self.session(|s| s.query_by_id(model_name, id))
    }

    pub fn query_mutation_sync(
        &self,
        models: &[AnyModel],
    ) -> StorageResult<Vec<MutationSync<AnyModel>>> {
        self.session(|s| s.query_mutation_sync(models))
    }

    pub fn query_model_sync_metadata(
        &self,
        model_name: &str,
    ) -> StorageResult<Option<ModelSyncMetadata>> {
        self.session(|s| s.query_model_sync_metadata(model_name))
    }

    pub fn save_model_sync_metadata(&self, metadata: &ModelSyncMetadata) -> StorageResult<()> {
        self.session(|s| s.save_model_sync_metadata(metadata))
    }

    pub fn query_mutation_sync_metadata(
        &self,
        model_name: &str,
        model_id: &str,
    ) -> StorageResult<Option<MutationSyncMetadata>> {
        self.session(|s| s.query_mutation_sync_metadata(model_name, model_id))
    }

    pub fn save_mutation_sync_metadata(&self, metadata: &MutationSyncMetadata) -> StorageResult<()> {
        self.session(|s| s.save_mutation_sync_metadata(metadata))
    }

    /// All persisted mutation events in submission order.
    pub fn mutation_events(&self) -> StorageResult<Vec<MutationEvent>> {
        self.session(|s| s.mutation_events())
    }

    /// Pending mutation events for one model instance.
    pub fn pending_mutation_events(
        &self,
        model_name: &str,
        model_id: &str,
    ) -> StorageResult<Vec<MutationEvent>> {
        self.session(|s| s.pending_mutation_events(model_name, model_id))
    }

    /// Deletes every row of every table.
    pub fn clear(&self) -> StorageResult<()> {
        self.transaction(|s| s.clear())?;
        info!("cleared local store");
        Ok(())
    }
}

/// Store operations over a borrowed connection.
pub struct StorageSession<'c> {
    conn: &'c Connection,
    catalog: &'c SchemaCatalog,
}

impl<'c> StorageSession<'c> {
    fn new(conn: &'c Connection, catalog: &'c SchemaCatalog) -> Self {
        Self { conn, catalog }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        self.catalog
    }

    fn execute(&self, statement: &Statement) -> StorageResult<usize> {
        self.conn
            .execute(&statement.sql, params_from_iter(statement.arguments.iter()))
            .map_err(StorageError::from_sqlite)
    }

    fn table_exists(&self, name: &str) -> StorageResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn select_models(&self, schema: &ModelSchema, statement: &Statement) -> StorageResult<Vec<AnyModel>> {
        let columns = translator::selected_columns(schema, self.catalog)?;
        let mut stmt = self.conn.prepare(&statement.sql)?;
        let rows = stmt.query_map(params_from_iter(statement.arguments.iter()), |row| {
            decode_row(row, &columns)
        })?;

        let mut models = Vec::new();
        for row in rows {
            models.push(AnyModel {
                model_name: schema.name.clone(),
                instance: row?,
            });
        }
        Ok(models)
    }

    /// Inserts the model, or updates it if a row with its identifier exists.
    ///
    /// With a condition, the existing row must satisfy it or the call fails
    /// with `InvalidCondition`; a condition on a row that does not exist
    /// fails the same way.
    pub fn save(
        &self,
        model: &AnyModel,
        condition: Option<&QueryPredicate>,
    ) -> StorageResult<(AnyModel, MutationType)> {
        let schema = self.catalog.schema(&model.model_name)?;
        model.validate(schema)?;
        let id = model.identifier(schema)?;
        let condition = condition.filter(|c| **c != QueryPredicate::All);

        if self.exists(&schema.name, &id, None)? {
            if let Some(predicate) = condition {
                if !self.exists(&schema.name, &id, Some(predicate))? {
                    return Err(StorageError::InvalidCondition(format!(
                        "{} {id} does not satisfy the save condition",
                        schema.name
                    )));
                }
            }
            self.execute(&translator::update(schema, model, condition)?)?;
            debug!("updated {} {id}", schema.name);
            Ok((model.clone(), MutationType::Update))
        } else {
            if condition.is_some() {
                return Err(StorageError::InvalidCondition(format!(
                    "cannot apply a condition to {} {id}, which does not exist",
                    schema.name
                )));
            }
            self.execute(&translator::insert(schema, model)?)?;
            debug!("inserted {} {id}", schema.name);
            Ok((model.clone(), MutationType::Create))
        }
    }

    /// Deletes one row by identifier.
    ///
    /// Returns `Ok(None)` if no such row exists. A row that exists but fails
    /// the condition is left untouched and yields `InvalidCondition`.
    pub fn delete(
        &self,
        model_name: &str,
        id: &str,
        condition: Option<&QueryPredicate>,
    ) -> StorageResult<Option<AnyModel>> {
        let schema = self.catalog.schema(model_name)?;
        let Some(existing) = self.query_by_id(model_name, id)? else {
            return Ok(None);
        };
        if let Some(predicate) = condition {
            if !self.exists(model_name, id, Some(predicate))? {
                return Err(StorageError::InvalidCondition(format!(
                    "{model_name} {id} does not satisfy the delete condition"
                )));
            }
        }
        self.execute(&translator::delete(schema, id, condition)?)?;
        debug!("deleted {model_name} {id}");
        Ok(Some(existing))
    }

    /// Whether a row with the identifier exists and satisfies the condition.
    pub fn exists(
        &self,
        model_name: &str,
        id: &str,
        condition: Option<&QueryPredicate>,
    ) -> StorageResult<bool> {
        let schema = self.catalog.schema(model_name)?;
        let statement = translator::count_matching(schema, id, condition)?;
        let count: i64 = self.conn.query_row(
            &statement.sql,
            params_from_iter(statement.arguments.iter()),
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Queries rows, populating each `belongs-to` association from the
    /// immediate parent table.
    pub fn query(
        &self,
        model_name: &str,
        predicate: Option<&QueryPredicate>,
        sort: &[SortDescriptor],
        pagination: Option<Pagination>,
    ) -> StorageResult<Vec<AnyModel>> {
        let schema = self.catalog.schema(model_name)?;
        let statement = translator::select(schema, self.catalog, predicate, sort, pagination)?;
        self.select_models(schema, &statement)
    }

    /// Looks up one row by identifier. More than one match is `NonUniqueResult`.
    pub fn query_by_id(&self, model_name: &str, id: &str) -> StorageResult<Option<AnyModel>> {
        let schema = self.catalog.schema(model_name)?;
        let statement = translator::select_by_id(schema, self.catalog, id)?;
        let mut models = self.select_models(schema, &statement)?;
        match models.len() {
            0 => Ok(None),
            1 => Ok(models.pop()),
            n => Err(StorageError::NonUniqueResult(format!(
                "{n} rows of {model_name} share identifier {id}"
            ))),
        }
    }

    // ── Sync metadata ────────────────────────────────────────────

    /// Pairs each model with its sync metadata; models without metadata are
    /// left out.
    pub fn query_mutation_sync(
        &self,
        models: &[AnyModel],
    ) -> StorageResult<Vec<MutationSync<AnyModel>>> {
        let mut result = Vec::with_capacity(models.len());
        for model in models {
            let schema = self.catalog.schema(&model.model_name)?;
            let id = model.identifier(schema)?;
            if let Some(metadata) = self.query_mutation_sync_metadata(&model.model_name, &id)? {
                result.push(MutationSync::new(model.clone(), metadata));
            }
        }
        Ok(result)
    }

    pub fn query_mutation_sync_metadata(
        &self,
        model_name: &str,
        model_id: &str,
    ) -> StorageResult<Option<MutationSyncMetadata>> {
        let metadata = self
            .conn
            .query_row(
                "SELECT deleted, last_changed_at, version FROM mutation_sync_metadata
                 WHERE model_name = ?1 AND model_id = ?2",
                params![model_name, model_id],
                |row| {
                    Ok(MutationSyncMetadata {
                        model_name: model_name.to_string(),
                        model_id: model_id.to_string(),
                        deleted: row.get::<_, i64>(0)? != 0,
                        last_changed_at: Timestamp::from_millis(row.get(1)?),
                        version: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(metadata)
    }

    pub fn save_mutation_sync_metadata(&self, metadata: &MutationSyncMetadata) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO mutation_sync_metadata (model_name, model_id, deleted, last_changed_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(model_name, model_id) DO UPDATE SET
                deleted = excluded.deleted,
                last_changed_at = excluded.last_changed_at,
                version = excluded.version",
            params![
                metadata.model_name,
                metadata.model_id,
                metadata.deleted,
                metadata.last_changed_at.as_millis(),
                metadata.version,
            ],
        )?;
        Ok(())
    }

    pub fn query_model_sync_metadata(
        &self,
        model_name: &str,
    ) -> StorageResult<Option<ModelSyncMetadata>> {
        let metadata = self
            .conn
            .query_row(
                "SELECT last_sync, sync_predicate FROM model_sync_metadata WHERE model_name = ?1",
                params![model_name],
                |row| {
                    Ok(ModelSyncMetadata {
                        model_name: model_name.to_string(),
                        last_sync: row.get::<_, Option<i64>>(0)?.map(Timestamp::from_millis),
                        sync_predicate: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(metadata)
    }

    pub fn save_model_sync_metadata(&self, metadata: &ModelSyncMetadata) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO model_sync_metadata (model_name, last_sync, sync_predicate)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(model_name) DO UPDATE SET
                last_sync = excluded.last_sync,
                sync_predicate = excluded.sync_predicate",
            params![
                metadata.model_name,
                metadata.last_sync.map(|t| t.as_millis()),
                metadata.sync_predicate,
            ],
        )?;
        Ok(())
    }

    // ── Mutation outbox ──────────────────────────────────────────

    pub fn insert_mutation_event(&self, event: &MutationEvent) -> StorageResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO mutation_event ({MUTATION_EVENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                event.id.to_string(),
                event.model_id,
                event.model_name,
                event.json,
                event.mutation_type.as_str(),
                event.created_at.as_millis(),
                event.version,
                event.in_process,
                event.condition,
            ],
        )?;
        Ok(())
    }

    /// Rewrites the mutable columns of a persisted event.
    pub fn update_mutation_event(&self, event: &MutationEvent) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE mutation_event
             SET json = ?2, mutation_type = ?3, version = ?4, in_process = ?5, condition = ?6
             WHERE id = ?1",
            params![
                event.id.to_string(),
                event.json,
                event.mutation_type.as_str(),
                event.version,
                event.in_process,
                event.condition,
            ],
        )?;
        Ok(())
    }

    pub fn delete_mutation_event(&self, id: &MutationEventId) -> StorageResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM mutation_event WHERE id = ?1", params![id.to_string()])?;
        Ok(removed > 0)
    }

    fn select_mutation_events(
        &self,
        filter: &str,
        args: &[&dyn ToSql],
        limit: Option<usize>,
    ) -> StorageResult<Vec<MutationEvent>> {
        let mut sql = format!(
            "SELECT {MUTATION_EVENT_COLUMNS} FROM mutation_event {filter} ORDER BY created_at, rowid"
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, model_id, model_name, json, mutation_type, created_at, version, in_process, condition) =
                row?;
            events.push(MutationEvent {
                id: MutationEventId::parse(&id)
                    .map_err(|e| StorageError::InvalidData(format!("mutation event id {id}: {e}")))?,
                model_id,
                model_name,
                json,
                mutation_type: mutation_type
                    .parse()
                    .map_err(|e| StorageError::InvalidData(format!("{e}")))?,
                created_at: Timestamp::from_millis(created_at),
                version,
                in_process,
                condition,
            });
        }
        Ok(events)
    }

    /// All persisted events, oldest first.
    pub fn mutation_events(&self) -> StorageResult<Vec<MutationEvent>> {
        self.select_mutation_events("", &[], None)
    }

    pub fn mutation_event_count(&self) -> StorageResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM mutation_event", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Persisted events for one model instance, oldest first.
    pub fn pending_mutation_events(
        &self,
        model_name: &str,
        model_id: &str,
    ) -> StorageResult<Vec<MutationEvent>> {
        self.select_mutation_events(
            "WHERE model_name = ?1 AND model_id = ?2",
            &[&model_name, &model_id],
            None,
        )
    }

    /// The oldest persisted event.
    pub fn next_mutation_event(&self) -> StorageResult<Option<MutationEvent>> {
        Ok(self.select_mutation_events("", &[], Some(1))?.pop())
    }

    pub fn set_in_process(&self, id: &MutationEventId, in_process: bool) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE mutation_event SET in_process = ?2 WHERE id = ?1",
            params![id.to_string(), in_process],
        )?;
        Ok(())
    }

    /// Clears the in-flight flag left behind by an interrupted run.
    pub fn clear_in_process(&self) -> StorageResult<usize> {
        Ok(self
            .conn
            .execute("UPDATE mutation_event SET in_process = 0 WHERE in_process = 1", [])?)
    }

    /// Deletes every row, children before parents.
    pub fn clear(&self) -> StorageResult<()> {
        for schema in self.catalog.sorted().iter().rev() {
            self.conn
                .execute(&format!("DELETE FROM \"{}\"", schema.name), [])?;
        }
        self.conn.execute_batch(
            "DELETE FROM mutation_event;
             DELETE FROM mutation_sync_metadata;
             DELETE FROM model_sync_metadata;",
        )?;
        Ok(())
    }
}

fn decode_row(row: &Row<'_>, columns: &[SelectedColumn]) -> rusqlite::Result<Map<String, Value>> {
    let mut instance = Map::new();
    let mut associations: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();

    for (i, column) in columns.iter().enumerate() {
        if column.name == COMPOSITE_KEY_COLUMN {
            continue;
        }
        let value = decode_value(row.get_ref(i)?, column.field_type);
        match column.association.as_deref() {
            Some(alias) => {
                associations
                    .entry(alias)
                    .or_default()
                    .insert(column.name.clone(), value);
            }
            None => {
                instance.insert(column.name.clone(), value);
            }
        }
    }

    for (alias, parent) in associations {
        let value = if parent.values().all(Value::is_null) {
            Value::Null
        } else {
            Value::Object(parent)
        };
        instance.insert(alias.to_string(), value);
    }
    Ok(instance)
}

fn decode_value(value: ValueRef<'_>, field_type: FieldType) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => match field_type {
            FieldType::Bool => Value::Bool(i != 0),
            FieldType::Double => serde_json::Number::from_f64(i as f64).map_or(Value::Null, Value::Number),
            _ => Value::from(i),
        },
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if field_type == FieldType::Json {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            } else {
                Value::String(text)
            }
        }
        ValueRef::Blob(_) => Value::Null,
    }
}
