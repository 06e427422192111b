//! Log of writes rejected by last-writer-wins resolution

use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{EntityKind, RecordId, SyncConflict, Timestamp};

const LWW_STRATEGY: &str = "lww";

/// Append-only conflict log backed by the `sync_conflicts` table
#[derive(Clone)]
pub struct ConflictLog {
    conn: Connection,
}

impl ConflictLog {
    pub fn new(conn: &Connection) -> Self {
        Self { conn: conn.clone() }
    }

    /// Record one rejected write
    pub async fn record(
        &self,
        kind: EntityKind,
        record_id: RecordId,
        local_updated_at: Timestamp,
        incoming_updated_at: Timestamp,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts
                    (collection, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    kind.collection(),
                    record_id.as_str(),
                    local_updated_at,
                    incoming_updated_at,
                    chrono::Utc::now().timestamp_millis(),
                    LWW_STRATEGY,
                ],
            )
            .await?;
        Ok(())
    }

    /// Most recent conflicts first
    pub async fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                "SELECT id, collection, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?",
                [limit],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(SyncConflict {
                id: row.get(0)?,
                collection: row.get(1)?,
                record_id: row.get(2)?,
                local_updated_at: row.get(3)?,
                incoming_updated_at: row.get(4)?,
                resolved_at: row.get(5)?,
                strategy: row.get(6)?,
            });
        }

        Ok(conflicts)
    }

    /// Remove every logged conflict
    pub async fn clear(&self) -> Result<u64> {
        Ok(self.conn.execute("DELETE FROM sync_conflicts", ()).await?)
    }
}
