//! Local record store: versioned records of every entity kind

use std::sync::Arc;

use async_trait::async_trait;
use libsql::{params, Connection, Value as SqlValue};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use super::conflict_log::ConflictLog;
use super::{nullable_text, optional_integer, optional_text};
use crate::error::{Error, Result};
use crate::models::{
    reserved_payload_key, EntityKind, RecordId, RemoteChange, SyncScopeKey, Timestamp,
    VersionedRecord,
};
use crate::sync::resolver::{self, Resolution};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Notification that a stored record changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordChange {
    pub kind: EntityKind,
    pub id: RecordId,
}

/// Storage for versioned records, keyed by `(kind, id)`.
///
/// Reads return tombstones too; callers decide whether to hide them. The
/// `apply_*` and `merge` operations run the conflict resolver and the write
/// as one critical section.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get a record (live or tombstoned) by ID
    async fn get(&self, kind: EntityKind, id: RecordId) -> Result<Option<VersionedRecord<Value>>>;

    /// Insert or overwrite a record unconditionally
    async fn put(&self, kind: EntityKind, record: &VersionedRecord<Value>) -> Result<()>;

    /// Remove a record row entirely (local data wipe, not a sync delete)
    async fn purge(&self, kind: EntityKind, id: RecordId) -> Result<bool>;

    /// List records in a scope, most recently updated first
    async fn list(
        &self,
        scope: &SyncScopeKey,
        include_deleted: bool,
    ) -> Result<Vec<VersionedRecord<Value>>>;

    /// Records whose `updated_at` or `deleted_at` is newer than `since`,
    /// oldest change first
    async fn changed_since(
        &self,
        scope: &SyncScopeKey,
        since: Timestamp,
    ) -> Result<Vec<VersionedRecord<Value>>>;

    /// Resolve an incoming save against the stored record and persist the winner
    async fn apply_upsert(
        &self,
        kind: EntityKind,
        incoming: VersionedRecord<Value>,
    ) -> Result<Resolution<Value>>;

    /// Resolve an incoming delete against the stored record and persist the winner
    async fn apply_delete(
        &self,
        kind: EntityKind,
        id: RecordId,
        deleted_at: Timestamp,
    ) -> Result<Resolution<Value>>;

    /// Merge a change received from the remote authority
    async fn merge(&self, kind: EntityKind, change: RemoteChange) -> Result<Resolution<Value>>;

    /// Subscribe to change notifications
    fn subscribe(&self) -> broadcast::Receiver<RecordChange>;
}

/// libSQL implementation of `RecordStore`
#[derive(Clone)]
pub struct LibSqlRecordStore {
    conn: Connection,
    conflicts: ConflictLog,
    changes: broadcast::Sender<RecordChange>,
    write_lock: Arc<Mutex<()>>,
}

impl LibSqlRecordStore {
    /// Create a new store on the given connection
    pub fn new(conn: &Connection) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            conn: conn.clone(),
            conflicts: ConflictLog::new(conn),
            changes,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Conflict log written by rejected merges
    pub const fn conflicts(&self) -> &ConflictLog {
        &self.conflicts
    }

    /// Parse a record from a database row
    fn parse_record(row: &libsql::Row) -> Result<VersionedRecord<Value>> {
        let id: String = row.get(0)?;
        let parent_id = optional_text(row, 1)?
            .map(|parent| parse_id(&parent))
            .transpose()?;
        let payload: String = row.get(2)?;

        Ok(VersionedRecord {
            id: parse_id(&id)?,
            parent_id,
            payload: serde_json::from_str(&payload)?,
            updated_at: row.get(3)?,
            deleted_at: optional_integer(row, 4)?,
        })
    }

    async fn collect(mut rows: libsql::Rows) -> Result<Vec<VersionedRecord<Value>>> {
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    async fn write(&self, kind: EntityKind, record: &VersionedRecord<Value>) -> Result<()> {
        if !record.payload.is_object() {
            return Err(Error::InvalidInput(format!(
                "Payload of {kind} {} must be a JSON object",
                record.id
            )));
        }
        if let Some(key) = reserved_payload_key(&record.payload) {
            return Err(Error::InvalidInput(format!(
                "Payload of {kind} {} uses reserved field `{key}`",
                record.id
            )));
        }

        let payload = serde_json::to_string(&record.payload)?;
        self.conn
            .execute(
                "INSERT INTO records (collection, id, parent_id, payload, updated_at, deleted_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (collection, id) DO UPDATE SET
                     parent_id = excluded.parent_id,
                     payload = excluded.payload,
                     updated_at = excluded.updated_at,
                     deleted_at = excluded.deleted_at",
                params![
                    kind.collection(),
                    record.id.as_str(),
                    nullable_text(record.parent_id.map(|parent| parent.as_str())),
                    payload,
                    record.updated_at,
                    record
                        .deleted_at
                        .map_or(SqlValue::Null, SqlValue::Integer),
                ],
            )
            .await?;

        self.notify(kind, record.id);
        Ok(())
    }

    fn notify(&self, kind: EntityKind, id: RecordId) {
        // No subscribers is fine
        let _ = self.changes.send(RecordChange { kind, id });
    }

    /// Persist an accepted resolution, log a rejected one
    async fn settle(
        &self,
        kind: EntityKind,
        incoming_at: Timestamp,
        resolution: Resolution<Value>,
        replay: bool,
    ) -> Result<Resolution<Value>> {
        match &resolution {
            Resolution::Accepted(record) => self.write(kind, record).await?,
            Resolution::Rejected(existing) if !replay => {
                tracing::warn!(
                    collection = kind.collection(),
                    record_id = %existing.id,
                    stored_at = existing.effective_timestamp(),
                    incoming_at,
                    "Rejected stale write (last writer wins)"
                );
                self.conflicts
                    .record(kind, existing.id, existing.effective_timestamp(), incoming_at)
                    .await?;
            }
            Resolution::Rejected(_) | Resolution::AlreadyDeleted(_) | Resolution::NotFound => {}
        }
        Ok(resolution)
    }
}

#[async_trait]
impl RecordStore for LibSqlRecordStore {
    async fn get(&self, kind: EntityKind, id: RecordId) -> Result<Option<VersionedRecord<Value>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, parent_id, payload, updated_at, deleted_at
                 FROM records WHERE collection = ? AND id = ?",
                params![kind.collection(), id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, kind: EntityKind, record: &VersionedRecord<Value>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(kind, record).await
    }

    async fn purge(&self, kind: EntityKind, id: RecordId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let rows = self
            .conn
            .execute(
                "DELETE FROM records WHERE collection = ? AND id = ?",
                params![kind.collection(), id.as_str()],
            )
            .await?;

        if rows > 0 {
            self.notify(kind, id);
        }
        Ok(rows > 0)
    }

    async fn list(
        &self,
        scope: &SyncScopeKey,
        include_deleted: bool,
    ) -> Result<Vec<VersionedRecord<Value>>> {
        let rows = self
            .conn
            .query(
                "SELECT id, parent_id, payload, updated_at, deleted_at
                 FROM records
                 WHERE collection = ?1
                   AND (?2 IS NULL OR parent_id = ?2)
                   AND (?3 = 1 OR deleted_at IS NULL)
                 ORDER BY updated_at DESC",
                params![
                    scope.kind.collection(),
                    nullable_text(scope.parent_id.map(|parent| parent.as_str())),
                    i64::from(include_deleted),
                ],
            )
            .await?;

        Self::collect(rows).await
    }

    async fn changed_since(
        &self,
        scope: &SyncScopeKey,
        since: Timestamp,
    ) -> Result<Vec<VersionedRecord<Value>>> {
        let rows = self
            .conn
            .query(
                "SELECT id, parent_id, payload, updated_at, deleted_at
                 FROM records
                 WHERE collection = ?1
                   AND (?2 IS NULL OR parent_id = ?2)
                   AND (updated_at > ?3 OR deleted_at > ?3)
                 ORDER BY MAX(updated_at, COALESCE(deleted_at, 0)) ASC, id ASC",
                params![
                    scope.kind.collection(),
                    nullable_text(scope.parent_id.map(|parent| parent.as_str())),
                    since,
                ],
            )
            .await?;

        Self::collect(rows).await
    }

    async fn apply_upsert(
        &self,
        kind: EntityKind,
        incoming: VersionedRecord<Value>,
    ) -> Result<Resolution<Value>> {
        let _guard = self.write_lock.lock().await;
        let existing = self.get(kind, incoming.id).await?;
        let replay = existing.as_ref() == Some(&incoming);
        let incoming_at = incoming.updated_at;
        let resolution = resolver::resolve_upsert(existing, incoming);
        self.settle(kind, incoming_at, resolution, replay).await
    }

    async fn apply_delete(
        &self,
        kind: EntityKind,
        id: RecordId,
        deleted_at: Timestamp,
    ) -> Result<Resolution<Value>> {
        let _guard = self.write_lock.lock().await;
        let existing = self.get(kind, id).await?;
        let resolution = resolver::resolve_delete(existing, deleted_at);
        self.settle(kind, deleted_at, resolution, false).await
    }

    async fn merge(&self, kind: EntityKind, change: RemoteChange) -> Result<Resolution<Value>> {
        match change {
            RemoteChange::Live(record) => self.apply_upsert(kind, record).await,
            RemoteChange::Tombstone(tombstone) => {
                // A tombstone for a record this side never saw has nothing to delete
                self.apply_delete(kind, tombstone.id, tombstone.deleted_at)
                    .await
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.changes.subscribe()
    }
}

fn parse_id(value: &str) -> Result<RecordId> {
    value
        .parse()
        .map_err(|_| Error::InvalidInput(format!("Invalid record ID: {value}")))
}
