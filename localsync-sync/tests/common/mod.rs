//! Shared test helpers for sync tests.

#![allow(dead_code)]

use localsync_model::{AnyModel, ModelField, ModelSchema, SchemaCatalog};
use localsync_storage::SqliteStorageAdapter;
use localsync_sync::{PaginatedList, RetryConfig, StorageEngine, SyncConfig, SyncEvent};
use localsync_types::{MutationSync, MutationSyncMetadata, Timestamp};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(5);

/// Routes engine logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Blog <- Post <- Comment, plus a local-only Draft.
pub fn make_catalog() -> Arc<SchemaCatalog> {
    let blog = ModelSchema::new("Blog")
        .field(ModelField::string("id"))
        .field(ModelField::string("name"));
    let post = ModelSchema::new("Post")
        .field(ModelField::string("id"))
        .field(ModelField::string("title"))
        .field(ModelField::int("rating").optional())
        .field(ModelField::belongs_to("blogId", "blog", "Blog"));
    let comment = ModelSchema::new("Comment")
        .field(ModelField::string("id"))
        .field(ModelField::string("content"))
        .field(ModelField::belongs_to("postId", "post", "Post"));
    let draft = ModelSchema::new("Draft")
        .field(ModelField::string("id"))
        .field(ModelField::string("text"))
        .local_only();
    Arc::new(SchemaCatalog::new(vec![comment, draft, post, blog]).unwrap())
}

/// Retries quickly so tests do not wait on backoff.
pub fn make_config() -> SyncConfig {
    SyncConfig::default().with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
            .with_jitter(false),
    )
}

pub fn make_storage_with(config: SyncConfig) -> Arc<StorageEngine> {
    let adapter = SqliteStorageAdapter::open_in_memory(make_catalog()).unwrap();
    Arc::new(StorageEngine::open(adapter, config).unwrap())
}

pub fn make_storage() -> Arc<StorageEngine> {
    make_storage_with(make_config())
}

pub fn make_adapter() -> Arc<SqliteStorageAdapter> {
    let adapter = SqliteStorageAdapter::open_in_memory(make_catalog()).unwrap();
    adapter.set_up_all().unwrap();
    Arc::new(adapter)
}

pub fn make_blog(id: &str) -> AnyModel {
    AnyModel::new("Blog", json!({"id": id, "name": format!("blog {id}")})).unwrap()
}

pub fn make_post(id: &str, blog_id: &str, title: &str) -> AnyModel {
    AnyModel::new("Post", json!({"id": id, "title": title, "blogId": blog_id})).unwrap()
}

pub fn make_comment(id: &str, post_id: &str) -> AnyModel {
    AnyModel::new("Comment", json!({"id": id, "content": "nice", "postId": post_id})).unwrap()
}

pub fn make_draft(id: &str) -> AnyModel {
    AnyModel::new("Draft", json!({"id": id, "text": "later"})).unwrap()
}

/// A remote record as delivered by a sync query or subscription.
pub fn make_remote(model_name: &str, model: Value, version: i64) -> MutationSync<Value> {
    let id = model["id"].as_str().unwrap_or_default().to_string();
    MutationSync::new(
        model,
        MutationSyncMetadata::new(model_name, id, version, Timestamp::now()),
    )
}

/// A remote tombstone.
pub fn make_tombstone(model_name: &str, model: Value, version: i64) -> MutationSync<Value> {
    let mut item = make_remote(model_name, model, version);
    item.sync_metadata.deleted = true;
    item
}

/// A decoded remote record, as returned for a mutation.
pub fn make_response(model: &AnyModel, version: i64) -> MutationSync<AnyModel> {
    let id = model.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    MutationSync::new(
        model.clone(),
        MutationSyncMetadata::new(model.model_name.clone(), id, version, Timestamp::now()),
    )
}

pub fn make_page(items: Vec<MutationSync<Value>>, next_token: Option<&str>) -> PaginatedList {
    PaginatedList {
        items,
        next_token: next_token.map(str::to_string),
        started_at: Timestamp::now(),
    }
}

/// Waits for the first event matching `matches`, skipping others.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<SyncEvent>,
    matches: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Polls `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}
