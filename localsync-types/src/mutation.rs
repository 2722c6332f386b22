//! Mutation events and sync metadata.
//!
//! A [`MutationEvent`] is the unit the outbox persists and replays to the
//! remote. [`MutationSyncMetadata`] is the remote's view of a single record
//! (version, tombstone flag) and [`ModelSyncMetadata`] is the per-model sync
//! cursor.

use crate::{Error, MutationEventId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of change a mutation event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationType {
    Create,
    Update,
    Delete,
}

impl MutationType {
    /// The lowercase name used in persisted rows.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidMutationType(other.to_string())),
        }
    }
}

/// A pending or historical local change to one model instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub id: MutationEventId,
    /// Identifier of the model instance (`#`-joined for composite keys).
    pub model_id: String,
    pub model_name: String,
    /// Serialized model payload.
    pub json: String,
    pub mutation_type: MutationType,
    pub created_at: Timestamp,
    /// Version the change was based on, sent to the remote for conflict detection.
    pub version: Option<i64>,
    /// Set while the outbox has handed the event to the remote.
    pub in_process: bool,
    /// Serialized remote condition for conditional writes.
    pub condition: Option<String>,
}

impl MutationEvent {
    /// Creates a new event stamped with the current time.
    pub fn new(
        model_id: impl Into<String>,
        model_name: impl Into<String>,
        json: impl Into<String>,
        mutation_type: MutationType,
    ) -> Self {
        Self {
            id: MutationEventId::generate(),
            model_id: model_id.into(),
            model_name: model_name.into(),
            json: json.into(),
            mutation_type,
            created_at: Timestamp::now(),
            version: None,
            in_process: false,
            condition: None,
        }
    }

    /// Sets the expected version.
    #[must_use]
    pub fn with_version(mut self, version: Option<i64>) -> Self {
        self.version = version;
        self
    }

    /// Sets the serialized condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Option<String>) -> Self {
        self.condition = condition;
        self
    }

    /// Parses the payload as a JSON value.
    pub fn payload(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.json)?)
    }
}

/// The remote's bookkeeping for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationSyncMetadata {
    pub model_name: String,
    pub model_id: String,
    #[serde(rename = "_deleted", default)]
    pub deleted: bool,
    #[serde(rename = "_lastChangedAt")]
    pub last_changed_at: Timestamp,
    #[serde(rename = "_version")]
    pub version: i64,
}

impl MutationSyncMetadata {
    pub fn new(
        model_name: impl Into<String>,
        model_id: impl Into<String>,
        version: i64,
        last_changed_at: Timestamp,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            model_id: model_id.into(),
            deleted: false,
            last_changed_at,
            version,
        }
    }

    /// Marks the record as a tombstone.
    #[must_use]
    pub fn tombstone(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// A model paired with its sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationSync<M> {
    pub model: M,
    pub sync_metadata: MutationSyncMetadata,
}

impl<M> MutationSync<M> {
    pub fn new(model: M, sync_metadata: MutationSyncMetadata) -> Self {
        Self {
            model,
            sync_metadata,
        }
    }
}

/// Per-model sync cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSyncMetadata {
    pub model_name: String,
    /// Server-side start time of the last completed initial sync.
    pub last_sync: Option<Timestamp>,
    /// Fingerprint of the sync expression in effect for that sync.
    pub sync_predicate: Option<String>,
}

impl ModelSyncMetadata {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            last_sync: None,
            sync_predicate: None,
        }
    }
}
