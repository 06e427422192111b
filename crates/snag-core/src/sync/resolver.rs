//! Record-granularity last-writer-wins conflict resolution.
//!
//! The same rules run on the remote authority when it accepts a push and on
//! the client when it merges a pulled change into local storage. Whoever
//! loses a conflict gets the authoritative record back instead of having
//! its write silently dropped.

use serde_json::Value;

use crate::models::{RemoteChange, Timestamp, VersionedRecord};

/// Outcome of resolving one incoming write against the stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<P> {
    /// Incoming write wins; this is the record to store
    Accepted(VersionedRecord<P>),
    /// Stored record is at least as new; returned unchanged
    Rejected(VersionedRecord<P>),
    /// Delete of a record that is already a tombstone; nothing to write
    AlreadyDeleted(VersionedRecord<P>),
    /// Delete of a record that does not exist
    NotFound,
}

impl<P> Resolution<P> {
    /// Whether the incoming write is considered applied (accepted or a no-op delete)
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_) | Self::AlreadyDeleted(_))
    }

    /// Whether the stored record won against the incoming write
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Resolve a save carrying `incoming.updated_at`.
///
/// The stored side compares with its effective timestamp, so a tombstone
/// newer than the incoming save wins. An accepted save takes the incoming
/// `deleted_at` (normally `None`, which restores a tombstoned record).
pub fn resolve_upsert<P>(
    existing: Option<VersionedRecord<P>>,
    incoming: VersionedRecord<P>,
) -> Resolution<P> {
    let Some(existing) = existing else {
        return Resolution::Accepted(incoming);
    };

    if existing.effective_timestamp() >= incoming.updated_at {
        return Resolution::Rejected(existing);
    }

    Resolution::Accepted(VersionedRecord {
        parent_id: incoming.parent_id.or(existing.parent_id),
        ..incoming
    })
}

/// Resolve a delete carrying `deleted_at`.
///
/// Deleting a tombstone is always an idempotent success, without comparing
/// timestamps.
pub fn resolve_delete<P>(
    existing: Option<VersionedRecord<P>>,
    deleted_at: Timestamp,
) -> Resolution<P> {
    let Some(mut existing) = existing else {
        return Resolution::NotFound;
    };

    if existing.is_deleted() {
        return Resolution::AlreadyDeleted(existing);
    }

    if existing.updated_at >= deleted_at {
        return Resolution::Rejected(existing);
    }

    existing.deleted_at = Some(deleted_at);
    Resolution::Accepted(existing)
}

/// Resolve a pulled change (or a conflict response body) against the local
/// record: tombstones follow the delete rule, live records the upsert rule.
pub fn merge_remote(
    existing: Option<VersionedRecord<Value>>,
    change: RemoteChange,
) -> Resolution<Value> {
    match change {
        RemoteChange::Tombstone(tombstone) => resolve_delete(existing, tombstone.deleted_at),
        RemoteChange::Live(record) => resolve_upsert(existing, record),
    }
}

/// The timestamp an incoming change competes with
pub const fn incoming_timestamp(change: &RemoteChange) -> Timestamp {
    match change {
        RemoteChange::Tombstone(tombstone) => tombstone.deleted_at,
        RemoteChange::Live(record) => record.updated_at,
    }
}
