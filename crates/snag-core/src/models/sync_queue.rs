//! Pending local mutation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{EntityKind, RecordId, Timestamp};

/// The kind of local mutation waiting to be pushed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Upsert,
    Delete,
}

impl SyncOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown sync operation: {other}"
            ))),
        }
    }
}

/// One durable queue entry, keyed by `(scope, entity_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Entity kind; selects the handler
    pub scope: EntityKind,
    /// Record the mutation applies to
    pub entity_id: RecordId,
    /// Latest operation for this key
    pub operation: SyncOperation,
    /// When the key was first enqueued (Unix ms); drain order
    pub enqueued_at: Timestamp,
    /// Bumped every time the entry's operation is replaced
    pub revision: i64,
}
