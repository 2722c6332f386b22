//! Compiles schemas, models and predicates into parameterized SQL.
//!
//! Every statement binds values positionally: the order of `arguments`
//! matches the order of `?` placeholders exactly. Output text is stable and
//! follows predicate construction order, so statements can be compared
//! literally.

use crate::error::{StorageError, StorageResult};
use localsync_model::{
    AnyModel, FieldType, GroupKind, ModelError, ModelSchema, Pagination, QueryOperator,
    QueryPredicate, SchemaCatalog, SortDescriptor, SortOrder, COMPOSITE_KEY_COLUMN,
};
use serde_json::Value;

/// Alias of the queried table in select and delete statements.
pub const ROOT_ALIAS: &str = "root";

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Converts a JSON value for a column of the given type.
    pub fn from_json(value: &Value, field_type: Option<FieldType>) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Integer(i64::from(*b)),
            Value::Number(n) => match (n.as_i64(), field_type) {
                (Some(i), Some(FieldType::Double)) => Self::Real(i as f64),
                (Some(i), _) => Self::Integer(i),
                (None, _) => Self::Real(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => Self::Text(value.to_string()),
        }
    }
}

/// SQL text with its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub arguments: Vec<SqlValue>,
}

impl Statement {
    fn new(sql: String, arguments: Vec<SqlValue>) -> Self {
        Self { sql, arguments }
    }
}

/// A column produced by a select, used to rebuild the model from a row.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedColumn {
    /// Association name for joined parent columns.
    pub association: Option<String>,
    pub name: String,
    pub field_type: FieldType,
}

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

fn column_ref(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("\"{ns}\".\"{name}\""),
        None => quote(name),
    }
}

fn indent(width: usize) -> String {
    " ".repeat(width)
}

fn column_type(schema: &ModelSchema, column: &str) -> FieldType {
    schema
        .get_field(column)
        .map_or(FieldType::String, |f| f.field_type)
}

// ── DDL ──────────────────────────────────────────────────────────

/// `create table if not exists` for one schema.
///
/// Column order is primary key, plain fields alphabetically, then foreign key
/// columns, followed by one `foreign key` constraint per association.
pub fn create_table(schema: &ModelSchema, catalog: &SchemaCatalog) -> StorageResult<String> {
    let mut lines = Vec::new();
    let composite = schema.has_composite_key();

    if composite {
        lines.push(format!("  {} text primary key not null", quote(COMPOSITE_KEY_COLUMN)));
    }
    for field in schema.sorted_fields() {
        let mut line = format!("  {} {}", quote(&field.name), field.field_type.sql_type());
        let is_key = schema.is_primary_key(&field.name);
        if is_key && !composite {
            line.push_str(" primary key not null");
        } else if field.required || is_key {
            line.push_str(" not null");
        }
        if field.association.as_ref().is_some_and(|a| a.unique) {
            line.push_str(" unique");
        }
        lines.push(line);
    }
    for field in schema.foreign_keys() {
        let Some(association) = field.association.as_ref() else {
            continue;
        };
        let parent = catalog.schema(&association.target)?;
        lines.push(format!(
            "  foreign key({}) references {}({})\n    on delete cascade",
            quote(&field.name),
            quote(&parent.name),
            quote(parent.primary_key_column()),
        ));
    }

    Ok(format!(
        "create table if not exists {} (\n{}\n);",
        quote(&schema.name),
        lines.join(",\n")
    ))
}

// ── DML ──────────────────────────────────────────────────────────

fn column_values(schema: &ModelSchema, model: &AnyModel) -> StorageResult<Vec<(String, SqlValue)>> {
    let mut values = Vec::new();
    if schema.has_composite_key() {
        values.push((
            COMPOSITE_KEY_COLUMN.to_string(),
            SqlValue::Text(model.identifier(schema)?),
        ));
    }
    for field in schema.sorted_fields() {
        let value = model.get(&field.name).unwrap_or(&Value::Null);
        values.push((field.name.clone(), SqlValue::from_json(value, Some(field.field_type))));
    }
    Ok(values)
}

/// `insert` with every column bound in storage order.
pub fn insert(schema: &ModelSchema, model: &AnyModel) -> StorageResult<Statement> {
    let values = column_values(schema, model)?;
    let columns: Vec<String> = values.iter().map(|(c, _)| quote(c)).collect();
    let placeholders = vec!["?"; values.len()].join(", ");
    let sql = format!(
        "insert into {} ({})\nvalues ({placeholders})",
        quote(&schema.name),
        columns.join(", ")
    );
    Ok(Statement::new(sql, values.into_iter().map(|(_, v)| v).collect()))
}

/// `update` of every non-key column, keyed by identifier, with an optional
/// condition appended to the `where` clause.
pub fn update(
    schema: &ModelSchema,
    model: &AnyModel,
    condition: Option<&QueryPredicate>,
) -> StorageResult<Statement> {
    let values = column_values(schema, model)?;
    let is_key = |c: &str| c == COMPOSITE_KEY_COLUMN || schema.is_primary_key(c);
    let mut assignments: Vec<(String, SqlValue)> =
        values.iter().filter(|(c, _)| !is_key(c)).cloned().collect();
    if assignments.is_empty() {
        assignments = values.iter().filter(|(c, _)| is_key(c)).cloned().collect();
    }

    let set = assignments
        .iter()
        .map(|(c, _)| format!("  {} = ?", quote(c)))
        .collect::<Vec<_>>()
        .join(",\n");
    let mut sql = format!(
        "update {}\nset\n{set}\nwhere {} = ?",
        quote(&schema.name),
        quote(schema.primary_key_column())
    );
    let mut arguments: Vec<SqlValue> = assignments.into_iter().map(|(_, v)| v).collect();
    arguments.push(SqlValue::Text(model.identifier(schema)?));

    if let Some(predicate) = condition {
        let clause = condition_clause(schema, predicate, None)?;
        if !clause.sql.is_empty() {
            sql.push('\n');
            sql.push_str(&clause.sql);
            arguments.extend(clause.arguments);
        }
    }
    Ok(Statement::new(sql, arguments))
}

/// `delete` of one row by identifier, optionally guarded by a condition.
pub fn delete(
    schema: &ModelSchema,
    id: &str,
    condition: Option<&QueryPredicate>,
) -> StorageResult<Statement> {
    let mut sql = format!(
        "delete from {} as {}\nwhere 1 = 1\n  and {} = ?",
        quote(&schema.name),
        quote(ROOT_ALIAS),
        column_ref(Some(ROOT_ALIAS), schema.primary_key_column())
    );
    let mut arguments = vec![SqlValue::Text(id.to_string())];
    if let Some(predicate) = condition {
        let clause = condition_clause(schema, predicate, Some(ROOT_ALIAS))?;
        if !clause.sql.is_empty() {
            sql.push('\n');
            sql.push_str(&clause.sql);
            arguments.extend(clause.arguments);
        }
    }
    Ok(Statement::new(sql, arguments))
}

// ── Queries ──────────────────────────────────────────────────────

/// Columns selected for a schema: its own columns under the root alias,
/// then the columns of each directly referenced parent under the
/// association name.
pub fn selected_columns(
    schema: &ModelSchema,
    catalog: &SchemaCatalog,
) -> StorageResult<Vec<SelectedColumn>> {
    let mut columns: Vec<SelectedColumn> = schema
        .columns()
        .into_iter()
        .map(|name| SelectedColumn {
            association: None,
            name: name.to_string(),
            field_type: column_type(schema, name),
        })
        .collect();
    for field in schema.foreign_keys() {
        let Some(association) = field.association.as_ref() else {
            continue;
        };
        let parent = catalog.schema(&association.target)?;
        columns.extend(parent.columns().into_iter().map(|name| SelectedColumn {
            association: Some(association.name.clone()),
            name: name.to_string(),
            field_type: column_type(parent, name),
        }));
    }
    Ok(columns)
}

/// `select` with a one-level join to each parent model.
pub fn select(
    schema: &ModelSchema,
    catalog: &SchemaCatalog,
    predicate: Option<&QueryPredicate>,
    sort: &[SortDescriptor],
    pagination: Option<Pagination>,
) -> StorageResult<Statement> {
    select_statement(schema, catalog, None, predicate, sort, pagination)
}

/// `select` of a single row by identifier.
pub fn select_by_id(
    schema: &ModelSchema,
    catalog: &SchemaCatalog,
    id: &str,
) -> StorageResult<Statement> {
    select_statement(schema, catalog, Some(id), None, &[], None)
}

fn select_statement(
    schema: &ModelSchema,
    catalog: &SchemaCatalog,
    id: Option<&str>,
    predicate: Option<&QueryPredicate>,
    sort: &[SortDescriptor],
    pagination: Option<Pagination>,
) -> StorageResult<Statement> {
    let projections: Vec<String> = selected_columns(schema, catalog)?
        .iter()
        .map(|c| match &c.association {
            Some(alias) => format!(
                "{} as \"{alias}.{}\"",
                column_ref(Some(alias), &c.name),
                c.name
            ),
            None => format!("{} as {}", column_ref(Some(ROOT_ALIAS), &c.name), quote(&c.name)),
        })
        .collect();
    let projection = projections
        .chunks(3)
        .map(|chunk| format!("  {}", chunk.join(", ")))
        .collect::<Vec<_>>()
        .join(",\n");

    let mut sql = format!(
        "select\n{projection}\nfrom {} as {}",
        quote(&schema.name),
        quote(ROOT_ALIAS)
    );

    for field in schema.foreign_keys() {
        let Some(association) = field.association.as_ref() else {
            continue;
        };
        let parent = catalog.schema(&association.target)?;
        let join = if field.required { "inner join" } else { "left outer join" };
        sql.push_str(&format!(
            "\n{join} {} as {}\n  on {} = {}",
            quote(&parent.name),
            quote(&association.name),
            column_ref(Some(&association.name), parent.primary_key_column()),
            column_ref(Some(ROOT_ALIAS), &field.name),
        ));
    }

    let mut arguments = Vec::new();
    let mut clauses = Vec::new();
    if let Some(id) = id {
        clauses.push(format!(
            "  and {} = ?",
            column_ref(Some(ROOT_ALIAS), schema.primary_key_column())
        ));
        arguments.push(SqlValue::Text(id.to_string()));
    }
    if let Some(predicate) = predicate {
        let clause = condition_clause(schema, predicate, Some(ROOT_ALIAS))?;
        if !clause.sql.is_empty() {
            clauses.push(clause.sql);
            arguments.extend(clause.arguments);
        }
    }
    if !clauses.is_empty() {
        sql.push_str("\nwhere 1 = 1\n");
        sql.push_str(&clauses.join("\n"));
    }

    if !sort.is_empty() {
        let terms = sort
            .iter()
            .map(|s| {
                if schema.get_field(&s.field).is_none() {
                    return Err(StorageError::Model(ModelError::UnknownField {
                        model: schema.name.clone(),
                        field: s.field.clone(),
                    }));
                }
                let direction = match s.order {
                    SortOrder::Ascending => "asc",
                    SortOrder::Descending => "desc",
                };
                Ok(format!("{} {direction}", column_ref(Some(ROOT_ALIAS), &s.field)))
            })
            .collect::<StorageResult<Vec<_>>>()?;
        sql.push_str(&format!("\norder by {}", terms.join(", ")));
    }

    if let Some(page) = pagination {
        sql.push_str(&format!("\nlimit {} offset {}", page.limit, page.offset()));
    }

    Ok(Statement::new(sql, arguments))
}

/// `select count(*)` of rows with the identifier that satisfy the condition.
pub fn count_matching(
    schema: &ModelSchema,
    id: &str,
    condition: Option<&QueryPredicate>,
) -> StorageResult<Statement> {
    let mut sql = format!(
        "select count(*) from {} as {}\nwhere 1 = 1\n  and {} = ?",
        quote(&schema.name),
        quote(ROOT_ALIAS),
        column_ref(Some(ROOT_ALIAS), schema.primary_key_column())
    );
    let mut arguments = vec![SqlValue::Text(id.to_string())];
    if let Some(predicate) = condition {
        let clause = condition_clause(schema, predicate, Some(ROOT_ALIAS))?;
        if !clause.sql.is_empty() {
            sql.push('\n');
            sql.push_str(&clause.sql);
            arguments.extend(clause.arguments);
        }
    }
    Ok(Statement::new(sql, arguments))
}

// ── Conditions ───────────────────────────────────────────────────

/// Compiles a predicate into `  and ...` lines, one per top-level clause.
///
/// Fails if the predicate references a field the schema does not declare.
/// `QueryPredicate::All` compiles to an empty clause.
pub fn condition_clause(
    schema: &ModelSchema,
    predicate: &QueryPredicate,
    namespace: Option<&str>,
) -> StorageResult<Statement> {
    predicate.validate(schema)?;

    let top_level: Vec<&QueryPredicate> = match predicate {
        QueryPredicate::All => Vec::new(),
        QueryPredicate::Group {
            kind: GroupKind::And,
            predicates,
        } => predicates.iter().collect(),
        other => vec![other],
    };

    let mut arguments = Vec::new();
    let lines: Vec<String> = top_level
        .into_iter()
        .filter(|p| !matches!(p, QueryPredicate::All))
        .map(|p| format!("  and {}", render(p, 2, namespace, &mut arguments)))
        .collect();
    Ok(Statement::new(lines.join("\n"), arguments))
}

fn render(
    predicate: &QueryPredicate,
    depth: usize,
    namespace: Option<&str>,
    arguments: &mut Vec<SqlValue>,
) -> String {
    match predicate {
        QueryPredicate::All => "1 = 1".to_string(),
        QueryPredicate::Operation { field, operator } => {
            render_operation(&column_ref(namespace, field), operator, arguments)
        }
        QueryPredicate::Group { kind, predicates } => {
            let (opener, joiner) = match kind {
                GroupKind::And => ("(", "and"),
                GroupKind::Or => ("(", "or"),
                GroupKind::Not => ("not (", "and"),
            };
            let inner = predicates
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let body = render(p, depth + 2, namespace, arguments);
                    if i == 0 {
                        format!("{}{body}", indent(depth + 2))
                    } else {
                        format!("{}{joiner} {body}", indent(depth + 2))
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{opener}\n{inner}\n{})", indent(depth))
        }
    }
}

fn render_operation(column: &str, operator: &QueryOperator, arguments: &mut Vec<SqlValue>) -> String {
    let mut bind = |value: &Value| arguments.push(SqlValue::from_json(value, None));
    match operator {
        QueryOperator::Eq(Value::Null) => format!("{column} is null"),
        QueryOperator::Ne(Value::Null) => format!("{column} is not null"),
        QueryOperator::Eq(v) => {
            bind(v);
            format!("{column} = ?")
        }
        QueryOperator::Ne(v) => {
            bind(v);
            format!("{column} <> ?")
        }
        QueryOperator::Gt(v) => {
            bind(v);
            format!("{column} > ?")
        }
        QueryOperator::Ge(v) => {
            bind(v);
            format!("{column} >= ?")
        }
        QueryOperator::Lt(v) => {
            bind(v);
            format!("{column} < ?")
        }
        QueryOperator::Le(v) => {
            bind(v);
            format!("{column} <= ?")
        }
        QueryOperator::Between { start, end } => {
            bind(start);
            bind(end);
            format!("{column} between ? and ?")
        }
        QueryOperator::BeginsWith(prefix) => {
            bind(&Value::String(format!("{prefix}%")));
            format!("{column} like ?")
        }
        QueryOperator::Contains(needle) => {
            bind(&Value::String(format!("%{needle}%")));
            format!("{column} like ?")
        }
    }
}
