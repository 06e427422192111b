//! Pull checkpoint model

use serde::Serialize;

use super::{SyncScopeKey, Timestamp};

/// Last remote timestamp fully merged for a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullCheckpoint {
    pub scope: SyncScopeKey,
    pub last_synced_at: Timestamp,
}

/// Serializable view of a checkpoint for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullCheckpointItem {
    pub scope: String,
    pub last_synced_at: Timestamp,
}

impl From<&PullCheckpoint> for PullCheckpointItem {
    fn from(checkpoint: &PullCheckpoint) -> Self {
        Self {
            scope: checkpoint.scope.to_string(),
            last_synced_at: checkpoint.last_synced_at,
        }
    }
}
