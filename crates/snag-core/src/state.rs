//! Shared sync state types.

use serde::Serialize;
use std::fmt;

/// Push engine state, published after every transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Queue drained, nothing pending
    #[default]
    Idle,
    /// A drain cycle is running
    Draining,
    /// Last cycle stopped with entries still queued
    IdleWithPending,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Draining => "draining",
            Self::IdleWithPending => "idle_with_pending",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
