//! Structured query predicates.
//!
//! Predicates are a tree of field comparisons combined with `and`, `or` and
//! `not` groups. The storage layer compiles them to SQL conditions, the remote
//! channel receives them as sync filters, and live subscription events are
//! filtered by evaluating them in memory. Construction order is preserved
//! everywhere because compiled SQL is compared literally.

use crate::error::{ModelError, ModelResult};
use crate::schema::ModelSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Starts a comparison on the named field.
pub fn field(name: &str) -> QueryField {
    QueryField(name.to_string())
}

/// A field reference used to build comparisons.
#[derive(Debug, Clone)]
pub struct QueryField(String);

impl QueryField {
    fn op(self, operator: QueryOperator) -> QueryPredicate {
        QueryPredicate::Operation {
            field: self.0,
            operator,
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> QueryPredicate {
        self.op(QueryOperator::Eq(value.into()))
    }

    pub fn ne(self, value: impl Into<Value>) -> QueryPredicate {
        self.op(QueryOperator::Ne(value.into()))
    }

    pub fn gt(self, value: impl Into<Value>) -> QueryPredicate {
        self.op(QueryOperator::Gt(value.into()))
    }

    pub fn ge(self, value: impl Into<Value>) -> QueryPredicate {
        self.op(QueryOperator::Ge(value.into()))
    }

    pub fn lt(self, value: impl Into<Value>) -> QueryPredicate {
        self.op(QueryOperator::Lt(value.into()))
    }

    pub fn le(self, value: impl Into<Value>) -> QueryPredicate {
        self.op(QueryOperator::Le(value.into()))
    }

    pub fn between(self, start: impl Into<Value>, end: impl Into<Value>) -> QueryPredicate {
        self.op(QueryOperator::Between {
            start: start.into(),
            end: end.into(),
        })
    }

    pub fn begins_with(self, prefix: &str) -> QueryPredicate {
        self.op(QueryOperator::BeginsWith(prefix.to_string()))
    }

    pub fn contains(self, needle: &str) -> QueryPredicate {
        self.op(QueryOperator::Contains(needle.to_string()))
    }

    /// `is null`
    pub fn is_null(self) -> QueryPredicate {
        self.eq(Value::Null)
    }

    /// `is not null`
    pub fn is_not_null(self) -> QueryPredicate {
        self.ne(Value::Null)
    }
}

/// A comparison applied to one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum QueryOperator {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Ge(Value),
    Lt(Value),
    Le(Value),
    Between { start: Value, end: Value },
    BeginsWith(String),
    Contains(String),
}

/// How the members of a group are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    And,
    Or,
    Not,
}

/// A predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryPredicate {
    /// Matches everything.
    All,
    Operation {
        field: String,
        operator: QueryOperator,
    },
    Group {
        kind: GroupKind,
        predicates: Vec<QueryPredicate>,
    },
}

impl QueryPredicate {
    pub fn and_all(predicates: Vec<QueryPredicate>) -> Self {
        Self::Group {
            kind: GroupKind::And,
            predicates,
        }
    }

    pub fn or_all(predicates: Vec<QueryPredicate>) -> Self {
        Self::Group {
            kind: GroupKind::Or,
            predicates,
        }
    }

    pub fn not(predicate: QueryPredicate) -> Self {
        Self::Group {
            kind: GroupKind::Not,
            predicates: vec![predicate],
        }
    }

    /// Appends to an existing `and` group or starts a new one.
    #[must_use]
    pub fn and(self, other: QueryPredicate) -> Self {
        self.combine(GroupKind::And, other)
    }

    /// Appends to an existing `or` group or starts a new one.
    #[must_use]
    pub fn or(self, other: QueryPredicate) -> Self {
        self.combine(GroupKind::Or, other)
    }

    fn combine(self, kind: GroupKind, other: QueryPredicate) -> Self {
        match self {
            Self::Group {
                kind: existing,
                mut predicates,
            } if existing == kind => {
                predicates.push(other);
                Self::Group { kind, predicates }
            }
            lhs => Self::Group {
                kind,
                predicates: vec![lhs, other],
            },
        }
    }

    /// Fails if the predicate references a field the schema does not declare.
    pub fn validate(&self, schema: &ModelSchema) -> ModelResult<()> {
        match self {
            Self::All => Ok(()),
            Self::Operation { field, .. } => {
                if schema.get_field(field).is_some() {
                    Ok(())
                } else {
                    Err(ModelError::UnknownField {
                        model: schema.name.clone(),
                        field: field.clone(),
                    })
                }
            }
            Self::Group { predicates, .. } => {
                predicates.iter().try_for_each(|p| p.validate(schema))
            }
        }
    }

    /// Stable serialized form, stored with the sync cursor.
    pub fn fingerprint(&self) -> ModelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Evaluates the predicate against a model instance.
    pub fn evaluate(&self, instance: &Map<String, Value>) -> bool {
        match self {
            Self::All => true,
            Self::Operation { field, operator } => {
                let value = instance.get(field).unwrap_or(&Value::Null);
                operator.evaluate(value)
            }
            Self::Group { kind, predicates } => match kind {
                GroupKind::And => predicates.iter().all(|p| p.evaluate(instance)),
                GroupKind::Or => predicates.iter().any(|p| p.evaluate(instance)),
                GroupKind::Not => !predicates.iter().all(|p| p.evaluate(instance)),
            },
        }
    }
}

impl QueryOperator {
    fn evaluate(&self, value: &Value) -> bool {
        match self {
            Self::Eq(expected) => compare(value, expected) == Some(Ordering::Equal),
            Self::Ne(expected) => compare(value, expected) != Some(Ordering::Equal),
            Self::Gt(bound) => !value.is_null() && compare(value, bound) == Some(Ordering::Greater),
            Self::Ge(bound) => {
                !value.is_null()
                    && matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            Self::Lt(bound) => !value.is_null() && compare(value, bound) == Some(Ordering::Less),
            Self::Le(bound) => {
                !value.is_null()
                    && matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
            Self::Between { start, end } => {
                !value.is_null()
                    && matches!(compare(value, start), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare(value, end), Some(Ordering::Less | Ordering::Equal))
            }
            Self::BeginsWith(prefix) => value.as_str().is_some_and(|s| s.starts_with(prefix)),
            Self::Contains(needle) => value.as_str().is_some_and(|s| s.contains(needle)),
        }
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One `order by` term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub field: String,
    pub order: SortOrder,
}

impl SortDescriptor {
    pub fn ascending(field: &str) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(field: &str) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }
}

/// Zero-based page of a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn page(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Row offset of the first item on the page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.limit)
    }
}
