use localsync_model::{
    field, ModelField, ModelSchema, Pagination, QueryPredicate, SchemaCatalog, SortDescriptor,
    AnyModel,
};
use localsync_storage::translator::{self, SqlValue};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn post() -> ModelSchema {
    ModelSchema::new("Post")
        .field(ModelField::string("id"))
        .field(ModelField::string("title"))
        .field(ModelField::string("content"))
        .field(ModelField::bool("draft").optional())
        .field(ModelField::double("rating").optional())
        .field(ModelField::enumeration("status").optional())
        .field(ModelField::datetime("updatedAt").optional())
}

fn comment() -> ModelSchema {
    ModelSchema::new("Comment")
        .field(ModelField::string("id"))
        .field(ModelField::string("content"))
        .field(ModelField::belongs_to("postId", "post", "Post"))
}

fn catalog() -> SchemaCatalog {
    let account = ModelSchema::new("UserAccount").field(ModelField::string("id"));
    let profile = ModelSchema::new("UserProfile")
        .field(ModelField::string("id"))
        .field(ModelField::belongs_to("accountId", "account", "UserAccount").unique());
    let membership = ModelSchema::new("Membership")
        .field(ModelField::string("groupId"))
        .field(ModelField::string("userId"))
        .field(ModelField::string("role"))
        .primary_key(["userId", "groupId"]);
    SchemaCatalog::new(vec![post(), comment(), account, profile, membership]).unwrap()
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

// ── Create table ─────────────────────────────────────────────────

#[test]
fn create_table_plain_model() {
    let catalog = catalog();
    let sql = translator::create_table(catalog.get("Post").unwrap(), &catalog).unwrap();
    let expected = r#"create table if not exists "Post" (
  "id" text primary key not null,
  "content" text not null,
  "draft" integer,
  "rating" real,
  "status" text,
  "title" text not null,
  "updatedAt" text
);"#;
    assert_eq!(sql, expected);
}

#[test]
fn create_table_with_foreign_key() {
    let catalog = catalog();
    let sql = translator::create_table(catalog.get("Comment").unwrap(), &catalog).unwrap();
    let expected = r#"create table if not exists "Comment" (
  "id" text primary key not null,
  "content" text not null,
  "postId" text not null,
  foreign key("postId") references "Post"("id")
    on delete cascade
);"#;
    assert_eq!(sql, expected);
}

#[test]
fn create_table_one_to_one_is_unique() {
    let catalog = catalog();
    let sql = translator::create_table(catalog.get("UserProfile").unwrap(), &catalog).unwrap();
    let expected = r#"create table if not exists "UserProfile" (
  "id" text primary key not null,
  "accountId" text not null unique,
  foreign key("accountId") references "UserAccount"("id")
    on delete cascade
);"#;
    assert_eq!(sql, expected);
}

#[test]
fn create_table_composite_key() {
    let catalog = catalog();
    let sql = translator::create_table(catalog.get("Membership").unwrap(), &catalog).unwrap();
    let expected = r#"create table if not exists "Membership" (
  "@@primaryKey" text primary key not null,
  "userId" text not null,
  "groupId" text not null,
  "role" text not null
);"#;
    assert_eq!(sql, expected);
}

// ── Insert / update / delete ─────────────────────────────────────

#[test]
fn insert_binds_in_column_order() {
    let model = AnyModel::new("Comment", json!({"postId": "p1", "id": "c1", "content": "hi"})).unwrap();
    let statement = translator::insert(&comment(), &model).unwrap();

    assert_eq!(
        statement.sql,
        "insert into \"Comment\" (\"id\", \"content\", \"postId\")\nvalues (?, ?, ?)"
    );
    assert_eq!(statement.arguments, vec![text("c1"), text("hi"), text("p1")]);
}

#[test]
fn insert_composite_key_binds_identifier_first() {
    let catalog = catalog();
    let model = AnyModel::new(
        "Membership",
        json!({"userId": "u1", "groupId": "g1", "role": "admin"}),
    )
    .unwrap();
    let statement = translator::insert(catalog.get("Membership").unwrap(), &model).unwrap();

    assert_eq!(
        statement.arguments,
        vec![text("u1#g1"), text("u1"), text("g1"), text("admin")]
    );
}

#[test]
fn insert_converts_booleans_and_nulls() {
    let model = AnyModel::new(
        "Post",
        json!({"id": "p1", "title": "t", "content": "c", "draft": true, "rating": 4}),
    )
    .unwrap();
    let statement = translator::insert(&post(), &model).unwrap();

    assert_eq!(
        statement.arguments,
        vec![
            text("p1"),
            text("c"),
            SqlValue::Integer(1),
            SqlValue::Real(4.0),
            SqlValue::Null,
            text("t"),
            SqlValue::Null,
        ]
    );
}

#[test]
fn update_with_condition() {
    let model = AnyModel::new("Post", json!({"id": "p1", "title": "t", "content": "new"})).unwrap();
    let condition = field("content").eq("old");
    let statement = translator::update(&post(), &model, Some(&condition)).unwrap();

    let expected = r#"update "Post"
set
  "content" = ?,
  "draft" = ?,
  "rating" = ?,
  "status" = ?,
  "title" = ?,
  "updatedAt" = ?
where "id" = ?
  and "content" = ?"#;
    assert_eq!(statement.sql, expected);
    assert_eq!(statement.arguments.len(), 8);
    assert_eq!(statement.arguments[6], text("p1"));
    assert_eq!(statement.arguments[7], text("old"));
}

#[test]
fn delete_by_identifier() {
    let statement = translator::delete(&post(), "p1", None).unwrap();
    assert_eq!(
        statement.sql,
        "delete from \"Post\" as \"root\"\nwhere 1 = 1\n  and \"root\".\"id\" = ?"
    );
    assert_eq!(statement.arguments, vec![text("p1")]);
}

#[test]
fn delete_with_condition_is_namespaced() {
    let condition = field("title").eq("x");
    let statement = translator::delete(&post(), "p1", Some(&condition)).unwrap();
    assert!(statement.sql.ends_with("  and \"root\".\"title\" = ?"));
    assert_eq!(statement.arguments, vec![text("p1"), text("x")]);
}

// ── Select ───────────────────────────────────────────────────────

#[test]
fn select_with_predicate_sort_and_page() {
    let catalog = catalog();
    let predicate = field("draft").eq(false);
    let statement = translator::select(
        catalog.get("Post").unwrap(),
        &catalog,
        Some(&predicate),
        &[SortDescriptor::descending("rating")],
        Some(Pagination::page(2, 20)),
    )
    .unwrap();

    let expected = r#"select
  "root"."id" as "id", "root"."content" as "content", "root"."draft" as "draft",
  "root"."rating" as "rating", "root"."status" as "status", "root"."title" as "title",
  "root"."updatedAt" as "updatedAt"
from "Post" as "root"
where 1 = 1
  and "root"."draft" = ?
order by "root"."rating" desc
limit 20 offset 40"#;
    assert_eq!(statement.sql, expected);
    assert_eq!(statement.arguments, vec![SqlValue::Integer(0)]);
}

#[test]
fn select_joins_immediate_parent() {
    let catalog = catalog();
    let statement =
        translator::select(catalog.get("Comment").unwrap(), &catalog, None, &[], None).unwrap();

    let expected = r#"select
  "root"."id" as "id", "root"."content" as "content", "root"."postId" as "postId",
  "post"."id" as "post.id", "post"."content" as "post.content", "post"."draft" as "post.draft",
  "post"."rating" as "post.rating", "post"."status" as "post.status", "post"."title" as "post.title",
  "post"."updatedAt" as "post.updatedAt"
from "Comment" as "root"
inner join "Post" as "post"
  on "post"."id" = "root"."postId""#;
    assert_eq!(statement.sql, expected);
    assert!(statement.arguments.is_empty());
}

#[test]
fn select_rejects_unknown_sort_field() {
    let catalog = catalog();
    let result = translator::select(
        catalog.get("Post").unwrap(),
        &catalog,
        None,
        &[SortDescriptor::ascending("nope")],
        None,
    );
    assert!(result.is_err());
}

// ── Conditions ───────────────────────────────────────────────────

#[test]
fn condition_all_operators_in_construction_order() {
    let predicate = field("id")
        .is_not_null()
        .and(field("draft").eq(true))
        .and(field("rating").gt(4))
        .and(field("rating").between(1, 5))
        .and(field("status").ne("DRAFT"))
        .and(field("updatedAt").is_null())
        .and(field("content").begins_with("a").or(field("title").contains("b")));

    let clause = translator::condition_clause(&post(), &predicate, None).unwrap();
    let expected = r#"  and "id" is not null
  and "draft" = ?
  and "rating" > ?
  and "rating" between ? and ?
  and "status" <> ?
  and "updatedAt" is null
  and (
    "content" like ?
    or "title" like ?
  )"#;
    assert_eq!(clause.sql, expected);
    assert_eq!(
        clause.arguments,
        vec![
            SqlValue::Integer(1),
            SqlValue::Integer(4),
            SqlValue::Integer(1),
            SqlValue::Integer(5),
            text("DRAFT"),
            text("a%"),
            text("%b%"),
        ]
    );
}

#[test]
fn condition_with_namespace() {
    let predicate = field("id").is_not_null();
    let clause = translator::condition_clause(&post(), &predicate, Some("root")).unwrap();
    assert_eq!(clause.sql, "  and \"root\".\"id\" is not null");
    assert!(clause.arguments.is_empty());
}

#[test]
fn condition_nested_groups_and_not() {
    let predicate = QueryPredicate::not(
        field("title").eq("a").or(field("rating").ge(2).and(field("rating").le(3))),
    );
    let clause = translator::condition_clause(&post(), &predicate, None).unwrap();
    let expected = r#"  and not (
    (
      "title" = ?
      or (
        "rating" >= ?
        and "rating" <= ?
      )
    )
  )"#;
    assert_eq!(clause.sql, expected);
    assert_eq!(clause.arguments.len(), 3);
}

#[test]
fn condition_all_is_empty() {
    let clause = translator::condition_clause(&post(), &QueryPredicate::All, None).unwrap();
    assert!(clause.sql.is_empty());
}

#[test]
fn condition_unknown_field_fails_fast() {
    let predicate = field("title").eq("x").and(field("body").eq("y"));
    assert!(translator::condition_clause(&post(), &predicate, None).is_err());
}

// ── Properties ───────────────────────────────────────────────────

fn leaf() -> impl Strategy<Value = QueryPredicate> {
    let fields = prop::sample::select(vec!["title", "content", "rating", "draft"]);
    (fields, 0u8..9, any::<i32>(), "[a-z]{0,8}").prop_map(|(name, op, n, s)| match op {
        0 => field(name).eq(n),
        1 => field(name).ne(s.as_str()),
        2 => field(name).gt(n),
        3 => field(name).le(n),
        4 => field(name).between(i64::from(n), i64::from(n) + 1),
        5 => field(name).begins_with(&s),
        6 => field(name).contains(&s),
        7 => field(name).is_null(),
        _ => field(name).is_not_null(),
    })
}

fn predicate() -> impl Strategy<Value = QueryPredicate> {
    leaf().prop_recursive(3, 24, 4, |inner| {
        (prop::collection::vec(inner, 1..4), 0u8..3).prop_map(|(predicates, kind)| match kind {
            0 => QueryPredicate::and_all(predicates),
            1 => QueryPredicate::or_all(predicates),
            _ => QueryPredicate::not(QueryPredicate::and_all(predicates)),
        })
    })
}

fn bound_values(predicate: &QueryPredicate) -> usize {
    use localsync_model::QueryOperator;
    match predicate {
        QueryPredicate::All => 0,
        QueryPredicate::Operation { operator, .. } => match operator {
            QueryOperator::Eq(serde_json::Value::Null) | QueryOperator::Ne(serde_json::Value::Null) => 0,
            QueryOperator::Between { .. } => 2,
            _ => 1,
        },
        QueryPredicate::Group { predicates, .. } => predicates.iter().map(bound_values).sum(),
    }
}

proptest! {
    #[test]
    fn argument_count_matches_value_leaves(p in predicate()) {
        let clause = translator::condition_clause(&post(), &p, Some("root")).unwrap();
        prop_assert_eq!(clause.arguments.len(), bound_values(&p));
        prop_assert_eq!(clause.sql.matches('?').count(), clause.arguments.len());
    }
}
