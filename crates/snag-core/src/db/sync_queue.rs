//! Durable queue of pending local mutations

use std::sync::Arc;

use async_trait::async_trait;
use libsql::{params, Connection};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordId, SyncOperation, SyncQueueEntry};

/// Pending mutations keyed by `(scope, entity_id)`.
///
/// Enqueueing an existing key replaces its operation but keeps its original
/// position, so the queue holds at most one entry per record.
#[async_trait]
pub trait SyncQueue: Send + Sync {
    /// Insert or replace the pending operation for a record
    async fn enqueue(
        &self,
        scope: EntityKind,
        entity_id: RecordId,
        operation: SyncOperation,
    ) -> Result<SyncQueueEntry>;

    /// All entries for a scope in drain order
    async fn dequeue_all(&self, scope: EntityKind) -> Result<Vec<SyncQueueEntry>>;

    /// Oldest entry across every scope
    async fn oldest(&self) -> Result<Option<SyncQueueEntry>>;

    /// Remove the entry for a record, whatever its revision
    async fn remove(&self, scope: EntityKind, entity_id: RecordId) -> Result<bool>;

    /// Remove an entry only if it was not replaced since it was read.
    ///
    /// Returns `false` when a newer enqueue replaced the operation; that
    /// entry stays queued.
    async fn acknowledge(&self, entry: &SyncQueueEntry) -> Result<bool>;

    /// Whether a scope has no pending entries
    async fn is_empty(&self, scope: EntityKind) -> Result<bool>;

    /// Number of pending entries across every scope
    async fn len(&self) -> Result<usize>;

    /// Every pending entry in drain order
    async fn entries(&self) -> Result<Vec<SyncQueueEntry>>;

    /// Drop every pending entry
    async fn clear(&self) -> Result<u64>;
}

/// libSQL implementation of `SyncQueue`
#[derive(Clone)]
pub struct LibSqlSyncQueue {
    conn: Connection,
    clock: Arc<dyn Clock>,
}

impl LibSqlSyncQueue {
    pub fn new(conn: &Connection) -> Self {
        Self::with_clock(conn, Arc::new(SystemClock))
    }

    pub fn with_clock(conn: &Connection, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn: conn.clone(),
            clock,
        }
    }

    fn parse_entry(row: &libsql::Row) -> Result<SyncQueueEntry> {
        let scope: String = row.get(0)?;
        let entity_id: String = row.get(1)?;
        let operation: String = row.get(2)?;

        Ok(SyncQueueEntry {
            scope: scope.parse()?,
            entity_id: entity_id.parse().map_err(|_| {
                Error::Database(format!("Invalid entity ID in sync queue: {entity_id}"))
            })?,
            operation: operation.parse()?,
            enqueued_at: row.get(3)?,
            revision: row.get(4)?,
        })
    }

    async fn query_entries(
        &self,
        sql: &str,
        args: impl libsql::params::IntoParams,
    ) -> Result<Vec<SyncQueueEntry>> {
        let mut rows = self.conn.query(sql, args).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl SyncQueue for LibSqlSyncQueue {
    async fn enqueue(
        &self,
        scope: EntityKind,
        entity_id: RecordId,
        operation: SyncOperation,
    ) -> Result<SyncQueueEntry> {
        let mut entries = self
            .query_entries(
                "INSERT INTO sync_queue (scope, entity_id, operation, enqueued_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (scope, entity_id) DO UPDATE SET
                     operation = excluded.operation,
                     revision = sync_queue.revision + 1
                 RETURNING scope, entity_id, operation, enqueued_at, revision",
                params![
                    scope.collection(),
                    entity_id.as_str(),
                    operation.as_str(),
                    self.clock.now(),
                ],
            )
            .await?;

        let entry = entries
            .pop()
            .ok_or_else(|| Error::Database("Enqueue returned no row".to_string()))?;
        tracing::debug!(
            scope = %entry.scope,
            entity_id = %entry.entity_id,
            operation = %entry.operation,
            revision = entry.revision,
            "Enqueued sync operation"
        );
        Ok(entry)
    }

    async fn dequeue_all(&self, scope: EntityKind) -> Result<Vec<SyncQueueEntry>> {
        self.query_entries(
            "SELECT scope, entity_id, operation, enqueued_at, revision
             FROM sync_queue WHERE scope = ?
             ORDER BY enqueued_at ASC, seq ASC",
            [scope.collection()],
        )
        .await
    }

    async fn oldest(&self) -> Result<Option<SyncQueueEntry>> {
        let mut entries = self
            .query_entries(
                "SELECT scope, entity_id, operation, enqueued_at, revision
                 FROM sync_queue
                 ORDER BY enqueued_at ASC, seq ASC
                 LIMIT 1",
                (),
            )
            .await?;
        Ok(entries.pop())
    }

    async fn remove(&self, scope: EntityKind, entity_id: RecordId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_queue WHERE scope = ? AND entity_id = ?",
                params![scope.collection(), entity_id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn acknowledge(&self, entry: &SyncQueueEntry) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_queue WHERE scope = ? AND entity_id = ? AND revision = ?",
                params![
                    entry.scope.collection(),
                    entry.entity_id.as_str(),
                    entry.revision
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn is_empty(&self, scope: EntityKind) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT NOT EXISTS(SELECT 1 FROM sync_queue WHERE scope = ?)",
                [scope.collection()],
            )
            .await?;

        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => true,
        })
    }

    async fn len(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sync_queue", ())
            .await?;

        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn entries(&self) -> Result<Vec<SyncQueueEntry>> {
        self.query_entries(
            "SELECT scope, entity_id, operation, enqueued_at, revision
             FROM sync_queue
             ORDER BY enqueued_at ASC, seq ASC",
            (),
        )
        .await
    }

    async fn clear(&self) -> Result<u64> {
        Ok(self.conn.execute("DELETE FROM sync_queue", ()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Database, LibSqlSyncQueue, Arc<ManualClock>) {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = LibSqlSyncQueue::with_clock(db.connection(), clock.clone());
        (db, queue, clock)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_same_key_replaces_operation_in_place() {
        let (_db, queue, clock) = setup().await;
        let id = RecordId::new();

        let first = queue
            .enqueue(EntityKind::Finding, id, SyncOperation::Upsert)
            .await
            .unwrap();
        clock.advance(50);
        let second = queue
            .enqueue(EntityKind::Finding, id, SyncOperation::Delete)
            .await
            .unwrap();

        let entries = queue.dequeue_all(EntityKind::Finding).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, SyncOperation::Delete);
        assert_eq!(entries[0].enqueued_at, first.enqueued_at);
        assert_eq!(second.revision, first.revision + 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dequeue_all_is_fifo_with_insertion_tie_break() {
        let (_db, queue, clock) = setup().await;
        let ids = [RecordId::new(), RecordId::new(), RecordId::new()];

        // Same timestamp for the first two
        queue
            .enqueue(EntityKind::Project, ids[1], SyncOperation::Upsert)
            .await
            .unwrap();
        queue
            .enqueue(EntityKind::Project, ids[0], SyncOperation::Upsert)
            .await
            .unwrap();
        clock.advance(1);
        queue
            .enqueue(EntityKind::Project, ids[2], SyncOperation::Delete)
            .await
            .unwrap();
        queue
            .enqueue(EntityKind::Client, RecordId::new(), SyncOperation::Upsert)
            .await
            .unwrap();

        let order = queue
            .dequeue_all(EntityKind::Project)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.entity_id)
            .collect::<Vec<_>>();
        assert_eq!(order, vec![ids[1], ids[0], ids[2]]);

        let oldest = queue.oldest().await.unwrap().unwrap();
        assert_eq!(oldest.entity_id, ids[1]);
        assert_eq!(queue.len().await.unwrap(), 4);
        assert_eq!(queue.entries().await.unwrap().len(), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acknowledge_keeps_entry_replaced_after_read() {
        let (_db, queue, _clock) = setup().await;
        let id = RecordId::new();

        let read = queue
            .enqueue(EntityKind::Structure, id, SyncOperation::Upsert)
            .await
            .unwrap();
        queue
            .enqueue(EntityKind::Structure, id, SyncOperation::Upsert)
            .await
            .unwrap();

        assert!(!queue.acknowledge(&read).await.unwrap());
        assert!(!queue.is_empty(EntityKind::Structure).await.unwrap());

        let current = queue.oldest().await.unwrap().unwrap();
        assert!(queue.acknowledge(&current).await.unwrap());
        assert!(queue.is_empty(EntityKind::Structure).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_and_clear() {
        let (_db, queue, _clock) = setup().await;
        let id = RecordId::new();
        queue
            .enqueue(EntityKind::Inspection, id, SyncOperation::Upsert)
            .await
            .unwrap();
        queue
            .enqueue(EntityKind::Client, RecordId::new(), SyncOperation::Upsert)
            .await
            .unwrap();

        assert!(queue.remove(EntityKind::Inspection, id).await.unwrap());
        assert!(!queue.remove(EntityKind::Inspection, id).await.unwrap());
        assert!(queue.is_empty(EntityKind::Inspection).await.unwrap());

        assert_eq!(queue.clear().await.unwrap(), 1);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queue_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queue.db");
        let id = RecordId::new();

        {
            let db = Database::open(&path).await.unwrap();
            LibSqlSyncQueue::new(db.connection())
                .enqueue(EntityKind::Finding, id, SyncOperation::Delete)
                .await
                .unwrap();
        }

        let db = Database::open(&path).await.unwrap();
        let entries = LibSqlSyncQueue::new(db.connection())
            .entries()
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_id, id);
        assert_eq!(entries[0].operation, SyncOperation::Delete);
    }
}
