//! Offline-first repository: local writes first, sync in the background.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::db::{RecordChange, RecordStore, SyncQueue};
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordId, SyncOperation, SyncScopeKey, VersionedRecord};
use crate::sync::{PullReport, PullSyncCoordinator, SyncEngineHandle, TriggerReason};

/// Typed access to one entity kind.
///
/// Writes are stamped with the clock, stored locally, queued and then
/// handed to the engine; they never wait on the network.
pub struct OfflineFirstRepository<P> {
    kind: EntityKind,
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn SyncQueue>,
    engine: SyncEngineHandle,
    pull: Arc<PullSyncCoordinator>,
    clock: Arc<dyn Clock>,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Clone for OfflineFirstRepository<P> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            engine: self.engine.clone(),
            pull: Arc::clone(&self.pull),
            clock: Arc::clone(&self.clock),
            _payload: PhantomData,
        }
    }
}

impl<P: Serialize + DeserializeOwned> OfflineFirstRepository<P> {
    pub fn new(
        kind: EntityKind,
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn SyncQueue>,
        engine: SyncEngineHandle,
        pull: Arc<PullSyncCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kind,
            store,
            queue,
            engine,
            pull,
            clock,
            _payload: PhantomData,
        }
    }

    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Create or overwrite a record. A tombstoned record is restored.
    pub async fn save(
        &self,
        id: Option<RecordId>,
        parent_id: Option<RecordId>,
        payload: P,
    ) -> Result<VersionedRecord<P>> {
        let id = id.unwrap_or_default();
        let existing = self.store.get(self.kind, id).await?;
        let parent_id = parent_id.or_else(|| existing.as_ref().and_then(|record| record.parent_id));

        let record = VersionedRecord::new(id, parent_id, payload, self.clock.now());
        self.write_and_enqueue(&record.encode()?, existing, SyncOperation::Upsert)
            .await?;

        Ok(record)
    }

    /// Tombstone a record. Deleting a tombstone is a no-op.
    pub async fn delete(&self, id: RecordId) -> Result<VersionedRecord<P>> {
        let mut record = self
            .store
            .get(self.kind, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", self.kind)))?;

        if !record.is_deleted() {
            let previous = record.clone();
            record.deleted_at = Some(self.clock.now());
            self.write_and_enqueue(&record, Some(previous), SyncOperation::Delete)
                .await?;
        }

        Ok(record.decode()?)
    }

    /// Live record by ID
    pub async fn get(&self, id: RecordId) -> Result<Option<VersionedRecord<P>>> {
        match self.store.get(self.kind, id).await? {
            Some(record) if !record.is_deleted() => Ok(Some(record.decode()?)),
            _ => Ok(None),
        }
    }

    /// Live records, optionally restricted to one parent
    pub async fn list(&self, parent_id: Option<RecordId>) -> Result<Vec<VersionedRecord<P>>> {
        let records = self.store.list(&self.scope(parent_id), false).await?;
        records
            .into_iter()
            .map(|record| record.decode().map_err(Error::from))
            .collect()
    }

    /// Pull remote changes for this kind (and parent)
    pub async fn refresh(&self, parent_id: Option<RecordId>) -> Result<PullReport> {
        self.pull.pull(&self.scope(parent_id)).await
    }

    /// Change notifications for this kind
    pub fn observe(&self) -> RecordObserver {
        RecordObserver {
            kind: self.kind,
            changes: self.store.subscribe(),
        }
    }

    /// Store the record and queue its push. If the queue write fails the
    /// stored row is put back the way it was.
    async fn write_and_enqueue(
        &self,
        record: &VersionedRecord<Value>,
        previous: Option<VersionedRecord<Value>>,
        operation: SyncOperation,
    ) -> Result<()> {
        self.store.put(self.kind, record).await?;

        if let Err(error) = self.queue.enqueue(self.kind, record.id, operation).await {
            let restored = match previous {
                Some(previous) => self.store.put(self.kind, &previous).await,
                None => self.store.purge(self.kind, record.id).await.map(|_| ()),
            };
            if let Err(restore_error) = restored {
                tracing::error!(
                    scope = %self.kind,
                    record_id = %record.id,
                    error = %restore_error,
                    "Failed to roll back local write"
                );
            }
            return Err(error);
        }

        self.trigger();
        Ok(())
    }

    fn scope(&self, parent_id: Option<RecordId>) -> SyncScopeKey {
        SyncScopeKey {
            kind: self.kind,
            parent_id,
        }
    }

    fn trigger(&self) {
        if let Err(error) = self.engine.trigger(TriggerReason::Enqueued) {
            tracing::debug!(scope = %self.kind, %error, "Write stays queued");
        }
    }
}

/// Stream of changed record IDs for one kind
pub struct RecordObserver {
    kind: EntityKind,
    changes: broadcast::Receiver<RecordChange>,
}

impl RecordObserver {
    /// Next changed record, `None` once the store is gone
    pub async fn next(&mut self) -> Option<RecordId> {
        loop {
            match self.changes.recv().await {
                Ok(change) if change.kind == self.kind => return Some(change.id),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(scope = %self.kind, skipped, "Record observer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
