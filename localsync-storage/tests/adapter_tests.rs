use localsync_model::{
    field, AnyModel, Model, ModelField, ModelSchema, Pagination, SchemaCatalog, SortDescriptor,
};
use localsync_storage::{SqliteStorageAdapter, StorageError};
use localsync_types::{
    ModelSyncMetadata, MutationEvent, MutationSyncMetadata, MutationType, Timestamp,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

fn make_catalog() -> Arc<SchemaCatalog> {
    let post = ModelSchema::new("Post")
        .field(ModelField::string("id"))
        .field(ModelField::string("title"))
        .field(ModelField::bool("draft").optional())
        .field(ModelField::double("rating").optional());
    let comment = ModelSchema::new("Comment")
        .field(ModelField::string("id"))
        .field(ModelField::string("content"))
        .field(ModelField::belongs_to("postId", "post", "Post"));
    let membership = ModelSchema::new("Membership")
        .field(ModelField::string("userId"))
        .field(ModelField::string("groupId"))
        .field(ModelField::string("role"))
        .primary_key(["userId", "groupId"]);
    Arc::new(SchemaCatalog::new(vec![comment, post, membership]).unwrap())
}

fn make_adapter() -> SqliteStorageAdapter {
    let adapter = SqliteStorageAdapter::open_in_memory(make_catalog()).unwrap();
    adapter.set_up_all().unwrap();
    adapter
}

fn make_post(id: &str, title: &str) -> AnyModel {
    AnyModel::new("Post", json!({"id": id, "title": title, "draft": false})).unwrap()
}

fn make_comment(id: &str, post_id: &str) -> AnyModel {
    AnyModel::new("Comment", json!({"id": id, "content": "hello", "postId": post_id})).unwrap()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Post {
    id: String,
    title: String,
    draft: Option<bool>,
    rating: Option<f64>,
}

impl Model for Post {
    fn model_name() -> &'static str {
        "Post"
    }
}

// ── Setup ────────────────────────────────────────────────────────

#[test]
fn set_up_is_idempotent_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let adapter = SqliteStorageAdapter::new(&path, make_catalog()).unwrap();
        adapter.set_up_all().unwrap();
        adapter.save(&make_post("p1", "first"), None).unwrap();
    }

    let adapter = SqliteStorageAdapter::new(&path, make_catalog()).unwrap();
    adapter.set_up_all().unwrap();
    adapter.set_up_all().unwrap();
    let post = adapter.query_by_id("Post", "p1").unwrap().unwrap();
    assert_eq!(post.get("title"), Some(&json!("first")));
}

#[test]
fn set_up_out_of_order_fails() {
    let catalog = make_catalog();
    let adapter = SqliteStorageAdapter::open_in_memory(catalog.clone()).unwrap();
    let comment = catalog.get("Comment").unwrap().clone();

    let err = adapter.set_up(&[comment]).unwrap_err();
    assert!(matches!(&err, StorageError::ForeignKey(m) if m.contains("Post")), "{err}");
    assert!(err.to_string().starts_with("foreign key violation:"));
}

#[test]
fn set_up_in_dependency_order_succeeds() {
    let catalog = make_catalog();
    let adapter = SqliteStorageAdapter::open_in_memory(catalog.clone()).unwrap();
    adapter
        .set_up(&[
            catalog.get("Post").unwrap().clone(),
            catalog.get("Comment").unwrap().clone(),
        ])
        .unwrap();
    adapter.save(&make_post("p1", "t"), None).unwrap();
    adapter.save(&make_comment("c1", "p1"), None).unwrap();
}

// ── Save ─────────────────────────────────────────────────────────

#[test]
fn save_inserts_then_updates() {
    let adapter = make_adapter();

    let (_, first) = adapter.save(&make_post("p1", "one"), None).unwrap();
    let (_, second) = adapter.save(&make_post("p1", "two"), None).unwrap();

    assert_eq!(first, MutationType::Create);
    assert_eq!(second, MutationType::Update);
    let posts = adapter.query("Post", None, &[], None).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].get("title"), Some(&json!("two")));
}

#[test]
fn save_with_failing_condition_leaves_row() {
    let adapter = make_adapter();
    adapter.save(&make_post("p1", "one"), None).unwrap();

    let condition = field("title").eq("other");
    let err = adapter.save(&make_post("p1", "two"), Some(&condition)).unwrap_err();

    assert!(matches!(err, StorageError::InvalidCondition(_)));
    let post = adapter.query_by_id("Post", "p1").unwrap().unwrap();
    assert_eq!(post.get("title"), Some(&json!("one")));
}

#[test]
fn save_with_passing_condition_updates() {
    let adapter = make_adapter();
    adapter.save(&make_post("p1", "one"), None).unwrap();

    let condition = field("title").eq("one");
    adapter.save(&make_post("p1", "two"), Some(&condition)).unwrap();

    let post = adapter.query_by_id("Post", "p1").unwrap().unwrap();
    assert_eq!(post.get("title"), Some(&json!("two")));
}

#[test]
fn save_condition_on_missing_row_fails() {
    let adapter = make_adapter();
    let condition = field("title").eq("one");
    let err = adapter.save(&make_post("p1", "one"), Some(&condition)).unwrap_err();
    assert!(matches!(err, StorageError::InvalidCondition(_)));
    assert!(adapter.query_by_id("Post", "p1").unwrap().is_none());
}

#[test]
fn save_rejects_missing_required_field() {
    let adapter = make_adapter();
    let model = AnyModel::new("Post", json!({"id": "p1"})).unwrap();
    let err = adapter.save(&model, None).unwrap_err();
    assert!(matches!(err, StorageError::Model(_)));
}

#[test]
fn save_child_without_parent_violates_foreign_key() {
    let adapter = make_adapter();
    let err = adapter.save(&make_comment("c1", "missing"), None).unwrap_err();
    assert!(matches!(err, StorageError::ForeignKey(_)), "{err}");
    assert!(adapter.query_by_id("Comment", "c1").unwrap().is_none());
}

#[test]
fn typed_save_and_query() {
    let adapter = make_adapter();
    let post = Post {
        id: "p1".into(),
        title: "typed".into(),
        draft: Some(true),
        rating: Some(4.5),
    };

    let saved = adapter.save_model(&post).unwrap();
    let loaded: Vec<Post> = adapter.query_models(None).unwrap();

    assert_eq!(saved, post);
    assert_eq!(loaded, vec![post]);
}

// ── Delete ───────────────────────────────────────────────────────

#[test]
fn delete_missing_row_returns_none() {
    let adapter = make_adapter();
    assert!(adapter.delete("Post", "nope", None).unwrap().is_none());
}

#[test]
fn delete_returns_removed_model() {
    let adapter = make_adapter();
    adapter.save(&make_post("p1", "one"), None).unwrap();

    let removed = adapter.delete("Post", "p1", None).unwrap().unwrap();

    assert_eq!(removed.get("id"), Some(&json!("p1")));
    assert!(adapter.query_by_id("Post", "p1").unwrap().is_none());
}

#[test]
fn delete_with_failing_condition_keeps_row() {
    let adapter = make_adapter();
    adapter.save(&make_post("p1", "one"), None).unwrap();

    let condition = field("title").eq("two");
    let err = adapter.delete("Post", "p1", Some(&condition)).unwrap_err();

    assert!(matches!(err, StorageError::InvalidCondition(_)));
    assert!(adapter.query_by_id("Post", "p1").unwrap().is_some());
}

#[test]
fn delete_parent_cascades_to_children() {
    let adapter = make_adapter();
    adapter.save(&make_post("p1", "one"), None).unwrap();
    adapter.save(&make_comment("c1", "p1"), None).unwrap();
    adapter.save(&make_comment("c2", "p1"), None).unwrap();

    adapter.delete("Post", "p1", None).unwrap();

    assert!(adapter.query("Comment", None, &[], None).unwrap().is_empty());
}

// ── Query ────────────────────────────────────────────────────────

#[test]
fn query_populates_parent_association() {
    let adapter = make_adapter();
    adapter.save(&make_post("p1", "parent"), None).unwrap();
    adapter.save(&make_comment("c1", "p1"), None).unwrap();

    let comment = adapter.query_by_id("Comment", "c1").unwrap().unwrap();

    assert_eq!(comment.get("postId"), Some(&json!("p1")));
    let post = comment.get("post").unwrap();
    assert_eq!(post["id"], json!("p1"));
    assert_eq!(post["title"], json!("parent"));
    assert_eq!(post["draft"], json!(false));
}

#[test]
fn query_filters_sorts_and_pages() {
    let adapter = make_adapter();
    for (id, rating) in [("a", 1.0), ("b", 3.0), ("c", 2.0), ("d", 5.0)] {
        let model =
            AnyModel::new("Post", json!({"id": id, "title": id, "rating": rating})).unwrap();
        adapter.save(&model, None).unwrap();
    }

    let predicate = field("rating").ge(2);
    let page = adapter
        .query(
            "Post",
            Some(&predicate),
            &[SortDescriptor::descending("rating")],
            Some(Pagination::page(0, 2)),
        )
        .unwrap();
    let ids: Vec<_> = page.iter().map(|m| m.get("id").unwrap().clone()).collect();
    assert_eq!(ids, vec![json!("d"), json!("b")]);

    let next = adapter
        .query(
            "Post",
            Some(&predicate),
            &[SortDescriptor::descending("rating")],
            Some(Pagination::page(1, 2)),
        )
        .unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].get("id"), Some(&json!("c")));
}

#[test]
fn query_unknown_model_fails() {
    let adapter = make_adapter();
    let err = adapter.query("Nope", None, &[], None).unwrap_err();
    assert!(matches!(err, StorageError::Model(_)));
}

#[test]
fn composite_key_round_trip() {
    let adapter = make_adapter();
    let membership = AnyModel::new(
        "Membership",
        json!({"userId": "u1", "groupId": "g1", "role": "member"}),
    )
    .unwrap();
    adapter.save(&membership, None).unwrap();

    let updated = AnyModel::new(
        "Membership",
        json!({"userId": "u1", "groupId": "g1", "role": "admin"}),
    )
    .unwrap();
    let (_, kind) = adapter.save(&updated, None).unwrap();

    assert_eq!(kind, MutationType::Update);
    let loaded = adapter.query_by_id("Membership", "u1#g1").unwrap().unwrap();
    assert_eq!(loaded.get("role"), Some(&json!("admin")));
    assert!(loaded.get("@@primaryKey").is_none());
}

// ── Sync metadata ────────────────────────────────────────────────

#[test]
fn query_mutation_sync_omits_models_without_metadata() {
    let adapter = make_adapter();
    let p1 = make_post("p1", "one");
    let p2 = make_post("p2", "two");
    adapter.save(&p1, None).unwrap();
    adapter.save(&p2, None).unwrap();
    adapter
        .save_mutation_sync_metadata(&MutationSyncMetadata::new(
            "Post",
            "p2",
            3,
            Timestamp::from_millis(100),
        ))
        .unwrap();

    let synced = adapter.query_mutation_sync(&[p1, p2]).unwrap();

    assert_eq!(synced.len(), 1);
    assert_eq!(synced[0].sync_metadata.model_id, "p2");
    assert_eq!(synced[0].sync_metadata.version, 3);
}

#[test]
fn mutation_sync_metadata_upserts() {
    let adapter = make_adapter();
    adapter
        .save_mutation_sync_metadata(&MutationSyncMetadata::new("Post", "p1", 1, Timestamp::from_millis(1)))
        .unwrap();
    adapter
        .save_mutation_sync_metadata(
            &MutationSyncMetadata::new("Post", "p1", 2, Timestamp::from_millis(2)).tombstone(),
        )
        .unwrap();

    let metadata = adapter.query_mutation_sync_metadata("Post", "p1").unwrap().unwrap();
    assert_eq!(metadata.version, 2);
    assert!(metadata.deleted);
    assert_eq!(metadata.last_changed_at, Timestamp::from_millis(2));
}

#[test]
fn model_sync_metadata_absent_then_saved() {
    let adapter = make_adapter();
    assert!(adapter.query_model_sync_metadata("Post").unwrap().is_none());

    let metadata = ModelSyncMetadata {
        last_sync: Some(Timestamp::from_millis(500)),
        sync_predicate: Some("{\"type\":\"all\"}".into()),
        ..ModelSyncMetadata::new("Post")
    };
    adapter.save_model_sync_metadata(&metadata).unwrap();

    assert_eq!(adapter.query_model_sync_metadata("Post").unwrap(), Some(metadata));
}

// ── Outbox ───────────────────────────────────────────────────────

fn make_event(id: &str, mutation_type: MutationType) -> MutationEvent {
    MutationEvent::new(id, "Post", json!({"id": id, "title": "t"}).to_string(), mutation_type)
}

#[test]
fn mutation_events_keep_submission_order() {
    let adapter = make_adapter();
    let first = make_event("p1", MutationType::Create);
    let second = make_event("p2", MutationType::Create);
    let third = make_event("p1", MutationType::Update);

    adapter
        .transaction(|s| {
            s.insert_mutation_event(&first)?;
            s.insert_mutation_event(&second)?;
            s.insert_mutation_event(&third)
        })
        .unwrap();

    let ids: Vec<_> = adapter.mutation_events().unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first.id, second.id, third.id]);

    let pending = adapter.pending_mutation_events("Post", "p1").unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[1].mutation_type, MutationType::Update);
}

#[test]
fn mutation_event_update_and_delete() {
    let adapter = make_adapter();
    let mut event = make_event("p1", MutationType::Create);
    adapter.session(|s| s.insert_mutation_event(&event)).unwrap();

    event.json = json!({"id": "p1", "title": "changed"}).to_string();
    event.version = Some(4);
    adapter.session(|s| s.update_mutation_event(&event)).unwrap();

    let stored = adapter.session(|s| s.next_mutation_event()).unwrap().unwrap();
    assert_eq!(stored.json, event.json);
    assert_eq!(stored.version, Some(4));

    assert!(adapter.session(|s| s.delete_mutation_event(&event.id)).unwrap());
    assert!(!adapter.session(|s| s.delete_mutation_event(&event.id)).unwrap());
    assert!(adapter.mutation_events().unwrap().is_empty());
}

#[test]
fn clear_in_process_resets_flags() {
    let adapter = make_adapter();
    let event = make_event("p1", MutationType::Create);
    adapter
        .session(|s| {
            s.insert_mutation_event(&event)?;
            s.set_in_process(&event.id, true)
        })
        .unwrap();
    assert!(adapter.mutation_events().unwrap()[0].in_process);

    let reset = adapter.session(|s| s.clear_in_process()).unwrap();

    assert_eq!(reset, 1);
    assert!(!adapter.mutation_events().unwrap()[0].in_process);
}

// ── Transactions ─────────────────────────────────────────────────

#[test]
fn transaction_rolls_back_on_error() {
    let adapter = make_adapter();

    let result = adapter.transaction(|s| {
        s.save(&make_post("p1", "one"), None)?;
        s.insert_mutation_event(&make_event("p1", MutationType::Create))?;
        s.save(&make_comment("c1", "missing"), None)
    });

    assert!(result.is_err());
    assert!(adapter.query_by_id("Post", "p1").unwrap().is_none());
    assert!(adapter.mutation_events().unwrap().is_empty());
}

#[test]
fn clear_removes_everything() {
    let adapter = make_adapter();
    adapter.save(&make_post("p1", "one"), None).unwrap();
    adapter.save(&make_comment("c1", "p1"), None).unwrap();
    adapter
        .session(|s| s.insert_mutation_event(&make_event("p1", MutationType::Create)))
        .unwrap();
    adapter
        .save_model_sync_metadata(&ModelSyncMetadata::new("Post"))
        .unwrap();

    adapter.clear().unwrap();

    assert!(adapter.query("Post", None, &[], None).unwrap().is_empty());
    assert!(adapter.query("Comment", None, &[], None).unwrap().is_empty());
    assert!(adapter.mutation_events().unwrap().is_empty());
    assert!(adapter.query_model_sync_metadata("Post").unwrap().is_none());
}
