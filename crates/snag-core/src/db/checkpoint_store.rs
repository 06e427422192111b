//! Pull checkpoints: last remote timestamp merged per scope

use async_trait::async_trait;
use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{PullCheckpoint, SyncScopeKey, Timestamp};

/// Durable per-scope pull checkpoints
#[async_trait]
pub trait PullSyncTimestampStore: Send + Sync {
    /// Last synced timestamp for a scope, `None` if never pulled
    async fn last_synced_at(&self, scope: &SyncScopeKey) -> Result<Option<Timestamp>>;

    /// Persist the checkpoint for a scope
    async fn set_last_synced_at(&self, scope: &SyncScopeKey, timestamp: Timestamp) -> Result<()>;

    /// Every stored checkpoint
    async fn all(&self) -> Result<Vec<PullCheckpoint>>;

    /// Forget every checkpoint so the next pull starts from the epoch
    async fn clear(&self) -> Result<u64>;
}

/// libSQL implementation of `PullSyncTimestampStore`
#[derive(Clone)]
pub struct LibSqlPullSyncTimestampStore {
    conn: Connection,
}

impl LibSqlPullSyncTimestampStore {
    pub fn new(conn: &Connection) -> Self {
        Self { conn: conn.clone() }
    }
}

#[async_trait]
impl PullSyncTimestampStore for LibSqlPullSyncTimestampStore {
    async fn last_synced_at(&self, scope: &SyncScopeKey) -> Result<Option<Timestamp>> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_synced_at FROM pull_checkpoints WHERE scope = ?",
                [scope.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set_last_synced_at(&self, scope: &SyncScopeKey, timestamp: Timestamp) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO pull_checkpoints (scope, last_synced_at) VALUES (?, ?)
                 ON CONFLICT (scope) DO UPDATE SET last_synced_at = excluded.last_synced_at",
                params![scope.to_string(), timestamp],
            )
            .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<PullCheckpoint>> {
        let mut rows = self
            .conn
            .query(
                "SELECT scope, last_synced_at FROM pull_checkpoints ORDER BY scope",
                (),
            )
            .await?;

        let mut checkpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            let scope: String = row.get(0)?;
            match scope.parse() {
                Ok(scope) => checkpoints.push(PullCheckpoint {
                    scope,
                    last_synced_at: row.get(1)?,
                }),
                Err(error) => {
                    tracing::warn!(scope = %scope, %error, "Skipping unreadable pull checkpoint");
                }
            }
        }

        Ok(checkpoints)
    }

    async fn clear(&self) -> Result<u64> {
        Ok(self.conn.execute("DELETE FROM pull_checkpoints", ()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{EntityKind, RecordId};
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn checkpoints_are_per_scope() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlPullSyncTimestampStore::new(db.connection());

        let all_findings = SyncScopeKey::collection(EntityKind::Finding);
        let structure = RecordId::new();
        let child_findings = SyncScopeKey::children_of(EntityKind::Finding, structure);

        assert_eq!(store.last_synced_at(&all_findings).await.unwrap(), None);

        store.set_last_synced_at(&all_findings, 100).await.unwrap();
        store.set_last_synced_at(&child_findings, 50).await.unwrap();
        store.set_last_synced_at(&all_findings, 200).await.unwrap();

        assert_eq!(store.last_synced_at(&all_findings).await.unwrap(), Some(200));
        assert_eq!(store.last_synced_at(&child_findings).await.unwrap(), Some(50));

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&PullCheckpoint {
            scope: child_findings,
            last_synced_at: 50
        }));

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.last_synced_at(&child_findings).await.unwrap(), None);
    }
}
