//! Outbox entry keys.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Key of one outbox entry, stored as hyphenated UUID v7 text.
///
/// The drain order comes from `created_at` and insertion order, not from
/// this key; comparing keys is only useful for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationEventId(Uuid);

impl MutationEventId {
    /// Keys a newly recorded mutation.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Reads a key back from the outbox table.
    pub fn parse(stored: &str) -> Result<Self> {
        let uuid = Uuid::try_parse(stored)?;
        if uuid.get_version_num() != 7 {
            return Err(Error::InvalidMutationEventId(stored.to_string()));
        }
        Ok(Self(uuid))
    }
}

impl fmt::Display for MutationEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}
