//! Data models for Snag

mod checkpoint;
mod entity;
mod record;
mod sync_conflict;
mod sync_queue;

pub use checkpoint::{PullCheckpoint, PullCheckpointItem};
pub use entity::{EntityKind, SyncScopeKey};
pub use record::{
    reserved_payload_key, RecordId, RemoteChange, Timestamp, Tombstone, VersionedRecord,
    RESERVED_PAYLOAD_KEYS,
};
pub use sync_conflict::SyncConflict;
pub use sync_queue::{SyncOperation, SyncQueueEntry};
