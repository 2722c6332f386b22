use localsync_types::{
    Error, ModelSyncMetadata, MutationEvent, MutationEventId, MutationSyncMetadata, MutationType,
    Timestamp,
};
use std::str::FromStr;

// ── MutationEventId ──────────────────────────────────────────────

#[test]
fn generated_event_ids_are_distinct() {
    let a = MutationEventId::generate();
    let b = MutationEventId::generate();
    assert_ne!(a, b);
}

#[test]
fn event_id_reads_back_from_stored_text() {
    let id = MutationEventId::generate();
    let stored = id.to_string();
    assert_eq!(stored.len(), 36);
    assert_eq!(MutationEventId::parse(&stored).unwrap(), id);
}

#[test]
fn event_id_rejects_garbage_and_other_uuid_versions() {
    assert!(MutationEventId::parse("garbage").is_err());
    let v4 = "f47ac10b-58cc-4372-a567-0e02b2c3d479";
    assert!(matches!(
        MutationEventId::parse(v4),
        Err(Error::InvalidMutationEventId(_))
    ));
}

// ── MutationType ─────────────────────────────────────────────────

#[test]
fn mutation_type_string_forms() {
    for ty in [MutationType::Create, MutationType::Update, MutationType::Delete] {
        assert_eq!(MutationType::from_str(ty.as_str()).unwrap(), ty);
        assert_eq!(ty.to_string(), ty.as_str());
    }
    assert!(MutationType::from_str("upsert").is_err());
}

#[test]
fn mutation_type_serializes_lowercase() {
    let json = serde_json::to_string(&MutationType::Delete).unwrap();
    assert_eq!(json, "\"delete\"");
}

// ── MutationEvent ────────────────────────────────────────────────

#[test]
fn mutation_event_new_defaults() {
    let before = Timestamp::now();
    let event = MutationEvent::new("p1", "Post", r#"{"id":"p1"}"#, MutationType::Create);

    assert_eq!(event.model_id, "p1");
    assert_eq!(event.model_name, "Post");
    assert_eq!(event.version, None);
    assert!(!event.in_process);
    assert!(event.condition.is_none());
    assert!(event.created_at >= before);
}

#[test]
fn mutation_event_builders_and_payload() {
    let event = MutationEvent::new("p1", "Post", r#"{"id":"p1","title":"t"}"#, MutationType::Update)
        .with_version(Some(3))
        .with_condition(Some("{}".into()));

    assert_eq!(event.version, Some(3));
    assert_eq!(event.condition.as_deref(), Some("{}"));
    assert_eq!(event.payload().unwrap()["title"], "t");
}

#[test]
fn mutation_event_bad_payload_is_error() {
    let event = MutationEvent::new("p1", "Post", "{not json", MutationType::Create);
    assert!(event.payload().is_err());
}

// ── Sync metadata ────────────────────────────────────────────────

#[test]
fn sync_metadata_uses_wire_field_names() {
    let meta = MutationSyncMetadata::new("Post", "p1", 2, Timestamp::from_millis(10)).tombstone();
    let json = serde_json::to_value(&meta).unwrap();

    assert_eq!(json["_version"], 2);
    assert_eq!(json["_deleted"], true);
    assert_eq!(json["_lastChangedAt"], 10);
    assert_eq!(json["modelId"], "p1");
}

#[test]
fn sync_metadata_deleted_defaults_false() {
    let json = r#"{"modelName":"Post","modelId":"p1","_lastChangedAt":5,"_version":1}"#;
    let meta: MutationSyncMetadata = serde_json::from_str(json).unwrap();
    assert!(!meta.deleted);
}

#[test]
fn model_sync_metadata_new_is_unsynced() {
    let meta = ModelSyncMetadata::new("Post");
    assert!(meta.last_sync.is_none());
    assert!(meta.sync_predicate.is_none());
}
