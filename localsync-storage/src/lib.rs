//! SQLite storage layer for localsync.
//!
//! Provides the local relational store the sync engine reads and writes
//! through.
//!
//! # Architecture
//!
//! - [`translator`] compiles schemas into DDL and models/predicates into
//!   parameterized DML and queries. It performs no I/O.
//! - [`SqliteStorageAdapter`] owns the connection, creates tables in
//!   dependency order and exposes typed and untyped save/query/delete.
//! - Engine-owned tables hold the mutation outbox, per-record sync metadata
//!   and per-model sync cursors alongside the model tables.

mod adapter;
mod error;
pub mod translator;

pub use adapter::{SqliteStorageAdapter, StorageSession};
pub use error::{StorageError, StorageResult};
pub use translator::{SqlValue, Statement};
