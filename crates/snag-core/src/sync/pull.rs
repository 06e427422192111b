//! Pull side: fetch remote changes per scope after flushing local writes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use super::engine::SyncEngineHandle;
use super::remote::RemoteClient;
use super::resolver::Resolution;
use crate::clock::Clock;
use crate::config::FlushPolicy;
use crate::db::{PullSyncTimestampStore, RecordStore, SyncQueue};
use crate::error::Result;
use crate::models::{SyncScopeKey, Timestamp};

/// How a pull ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PullOutcome {
    Completed,
    /// Remote fetch failed; checkpoint unchanged
    FetchFailed(String),
    /// Unpushed entries remained and the policy is `SkipPull`
    SkippedPendingPush,
    /// Shutdown requested between records; checkpoint unchanged
    Cancelled,
}

/// Summary of one pull
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub scope: String,
    /// Checkpoint the fetch started from
    pub since: Timestamp,
    /// Stored checkpoint after the pull
    pub checkpoint: Option<Timestamp>,
    /// Remote changes written locally
    pub applied: usize,
    /// Remote changes that lost against a newer local record
    pub rejected: usize,
    pub outcome: PullOutcome,
}

impl PullReport {
    fn unchanged(scope: &SyncScopeKey, checkpoint: Option<Timestamp>, outcome: PullOutcome) -> Self {
        Self {
            scope: scope.to_string(),
            since: checkpoint.unwrap_or(0),
            checkpoint,
            applied: 0,
            rejected: 0,
            outcome,
        }
    }
}

/// Runs pulls so they never overtake pending pushes of the same scope
pub struct PullSyncCoordinator {
    engine: SyncEngineHandle,
    queue: Arc<dyn SyncQueue>,
    checkpoints: Arc<dyn PullSyncTimestampStore>,
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteClient>,
    clock: Arc<dyn Clock>,
    policy: FlushPolicy,
    scope_locks: Mutex<HashMap<SyncScopeKey, Arc<Mutex<()>>>>,
}

impl PullSyncCoordinator {
    pub fn new(
        engine: SyncEngineHandle,
        queue: Arc<dyn SyncQueue>,
        checkpoints: Arc<dyn PullSyncTimestampStore>,
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            queue,
            checkpoints,
            store,
            remote,
            clock,
            policy: FlushPolicy::default(),
            scope_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn scope_lock(&self, scope: &SyncScopeKey) -> Arc<Mutex<()>> {
        let mut locks = self.scope_locks.lock().await;
        Arc::clone(locks.entry(*scope).or_default())
    }

    /// Run `block` after the push queue has been flushed.
    ///
    /// Calls for the same scope run one at a time. Returns `None` when the
    /// scope still has pending entries and the policy skips the block.
    pub async fn with_flushed_queue<F, Fut, T>(
        &self,
        scope: &SyncScopeKey,
        block: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.scope_lock(scope).await;
        let _guard = lock.lock().await;

        if self.flush(scope).await? {
            Ok(Some(block().await))
        } else {
            Ok(None)
        }
    }

    /// Drain the push queue; `false` if the block should be skipped
    async fn flush(&self, scope: &SyncScopeKey) -> Result<bool> {
        if self.queue.is_empty(scope.kind).await? {
            return Ok(true);
        }

        let report = self.engine.drain().await?;
        if self.queue.is_empty(scope.kind).await? {
            return Ok(true);
        }

        match self.policy {
            FlushPolicy::Proceed => {
                tracing::warn!(
                    %scope,
                    outcome = ?report.outcome,
                    "Pending pushes remain; pulling anyway"
                );
                Ok(true)
            }
            FlushPolicy::SkipPull => {
                tracing::warn!(
                    %scope,
                    outcome = ?report.outcome,
                    "Pending pushes remain; skipping pull"
                );
                Ok(false)
            }
        }
    }

    /// Flush, then fetch and merge everything changed since the checkpoint
    pub async fn pull(&self, scope: &SyncScopeKey) -> Result<PullReport> {
        match self
            .with_flushed_queue(scope, || self.pull_flushed(scope))
            .await?
        {
            Some(report) => report,
            None => {
                let checkpoint = self.checkpoints.last_synced_at(scope).await?;
                Ok(PullReport::unchanged(
                    scope,
                    checkpoint,
                    PullOutcome::SkippedPendingPush,
                ))
            }
        }
    }

    async fn pull_flushed(&self, scope: &SyncScopeKey) -> Result<PullReport> {
        let previous = self.checkpoints.last_synced_at(scope).await?;
        let since = previous.unwrap_or(0);
        // Captured before the fetch so changes racing the fetch are re-read next time
        let now = self.clock.now();

        let changes = match self.remote.fetch_since(scope, since).await {
            Ok(changes) => changes,
            Err(error) => {
                tracing::warn!(%scope, since, %error, "Pull fetch failed");
                return Ok(PullReport::unchanged(
                    scope,
                    previous,
                    PullOutcome::FetchFailed(error.to_string()),
                ));
            }
        };

        let mut report = PullReport::unchanged(scope, previous, PullOutcome::Completed);
        for change in changes {
            if self.engine.is_cancelled() {
                tracing::info!(%scope, applied = report.applied, "Pull cancelled");
                report.outcome = PullOutcome::Cancelled;
                return Ok(report);
            }

            let id = change.id();
            match self.store.merge(scope.kind, change).await? {
                Resolution::Accepted(_) | Resolution::AlreadyDeleted(_) => report.applied += 1,
                Resolution::Rejected(_) => report.rejected += 1,
                Resolution::NotFound => {
                    tracing::debug!(%scope, entity_id = %id, "Ignoring tombstone for unknown record");
                }
            }
        }

        self.checkpoints.set_last_synced_at(scope, now).await?;
        report.checkpoint = Some(now);
        tracing::info!(
            %scope,
            since,
            checkpoint = now,
            applied = report.applied,
            rejected = report.rejected,
            "Pull completed"
        );
        Ok(report)
    }
}
