use localsync_model::{field, AnyModel, Model, ModelField, ModelSchema, QueryPredicate};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn post_schema() -> ModelSchema {
    ModelSchema::new("Post")
        .field(ModelField::string("id"))
        .field(ModelField::string("title"))
        .field(ModelField::int("likes").optional())
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Post {
    id: String,
    title: String,
}

impl Model for Post {
    fn model_name() -> &'static str {
        "Post"
    }
}

// ── AnyModel ─────────────────────────────────────────────────────

#[test]
fn any_model_requires_object() {
    assert!(AnyModel::new("Post", json!([1, 2])).is_err());
    assert!(AnyModel::from_json("Post", "{broken").is_err());
}

#[test]
fn identifier_simple_and_composite() {
    let model = AnyModel::new("Post", json!({"id": "p1", "title": "t"})).unwrap();
    assert_eq!(model.identifier(&post_schema()).unwrap(), "p1");

    let membership = ModelSchema::new("Membership")
        .field(ModelField::string("userId"))
        .field(ModelField::int("groupId"))
        .primary_key(["userId", "groupId"]);
    let model = AnyModel::new("Membership", json!({"userId": "u1", "groupId": 7})).unwrap();
    assert_eq!(model.identifier(&membership).unwrap(), "u1#7");
}

#[test]
fn identifier_missing_key_is_error() {
    let model = AnyModel::new("Post", json!({"title": "t"})).unwrap();
    assert!(model.identifier(&post_schema()).is_err());
}

#[test]
fn validate_checks_required_and_types() {
    let schema = post_schema();
    let ok = AnyModel::new("Post", json!({"id": "p1", "title": "t"})).unwrap();
    assert!(ok.validate(&schema).is_ok());

    let missing = AnyModel::new("Post", json!({"id": "p1"})).unwrap();
    assert!(missing.validate(&schema).is_err());

    let wrong_type = AnyModel::new("Post", json!({"id": "p1", "title": "t", "likes": "many"})).unwrap();
    assert!(wrong_type.validate(&schema).is_err());

    let wrong_model = AnyModel::new("Comment", json!({"id": "p1", "title": "t"})).unwrap();
    assert!(wrong_model.validate(&schema).is_err());
}

#[test]
fn typed_model_conversion() {
    let post = Post {
        id: "p1".into(),
        title: "hello".into(),
    };
    let any = AnyModel::from_model(&post).unwrap();
    assert_eq!(any.model_name, "Post");
    assert_eq!(any.get("title"), Some(&json!("hello")));
    assert_eq!(any.into_model::<Post>().unwrap(), post);

    let other = AnyModel::new("Comment", json!({"id": "c1", "title": "x"})).unwrap();
    assert!(other.into_model::<Post>().is_err());
}

// ── QueryPredicate ───────────────────────────────────────────────

fn instance(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

#[test]
fn and_or_append_to_existing_groups() {
    let p = field("a").eq(1).and(field("b").eq(2)).and(field("c").eq(3));
    match p {
        QueryPredicate::Group { predicates, .. } => assert_eq!(predicates.len(), 3),
        other => panic!("expected group, got {other:?}"),
    }

    let mixed = field("a").eq(1).and(field("b").eq(2)).or(field("c").eq(3));
    match mixed {
        QueryPredicate::Group { predicates, .. } => assert_eq!(predicates.len(), 2),
        other => panic!("expected group, got {other:?}"),
    }
}

#[test]
fn evaluate_comparisons() {
    let row = instance(json!({"title": "Hello world", "rating": 4.5, "draft": false, "updatedAt": null}));

    assert!(field("title").begins_with("Hello").evaluate(&row));
    assert!(field("title").contains("o w").evaluate(&row));
    assert!(field("rating").gt(4).evaluate(&row));
    assert!(field("rating").between(4, 5).evaluate(&row));
    assert!(!field("rating").lt(4.5).evaluate(&row));
    assert!(field("rating").le(4.5).evaluate(&row));
    assert!(field("draft").eq(false).evaluate(&row));
    assert!(field("updatedAt").is_null().evaluate(&row));
    assert!(field("missing").is_null().evaluate(&row));
    assert!(field("title").is_not_null().evaluate(&row));
    assert!(!field("updatedAt").gt(0).evaluate(&row));
}

#[test]
fn evaluate_groups() {
    let row = instance(json!({"a": 1, "b": 2}));
    assert!(field("a").eq(1).and(field("b").eq(2)).evaluate(&row));
    assert!(field("a").eq(9).or(field("b").eq(2)).evaluate(&row));
    assert!(QueryPredicate::not(field("a").eq(9)).evaluate(&row));
    assert!(QueryPredicate::All.evaluate(&row));
}

#[test]
fn validate_rejects_unknown_field() {
    let schema = post_schema();
    assert!(field("title").eq("x").validate(&schema).is_ok());
    let nested = field("title").eq("x").or(field("body").eq("y"));
    assert!(nested.validate(&schema).is_err());
}

#[test]
fn fingerprint_is_stable_and_order_sensitive() {
    let a = field("a").eq(1).and(field("b").eq(2));
    let b = field("a").eq(1).and(field("b").eq(2));
    let c = field("b").eq(2).and(field("a").eq(1));

    assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());

    let parsed: QueryPredicate = serde_json::from_str(&a.fingerprint().unwrap()).unwrap();
    assert_eq!(parsed, a);
}
