//! Model schemas for localsync.
//!
//! A [`ModelSchema`] describes one model type: its fields, primary key and
//! `belongs-to` associations. Schemas are registered once in a
//! [`SchemaCatalog`], which validates them and computes the dependency graph
//! used for table creation order, initial sync ordering and cascade deletes.
//! The catalog is immutable and shared by `Arc` with every component.
//!
//! Model instances travel through the engine as [`AnyModel`] (a model name
//! plus a JSON object). Application types opt into typed access by
//! implementing [`Model`].

mod catalog;
mod error;
mod model;
mod predicate;
mod schema;

pub use catalog::{Dependent, SchemaCatalog};
pub use error::{ModelError, ModelResult};
pub use model::{AnyModel, Model, COMPOSITE_KEY_SEPARATOR};
pub use predicate::{
    field, GroupKind, Pagination, QueryField, QueryOperator, QueryPredicate, SortDescriptor,
    SortOrder,
};
pub use schema::{Association, FieldType, ModelField, ModelSchema, COMPOSITE_KEY_COLUMN};
