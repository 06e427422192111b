//! Per-entity push strategies and their registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::remote::{PushResponse, RemoteClient};
use crate::db::RecordStore;
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordId, RemoteChange, SyncOperation};

/// Result of pushing one queued mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The remote accepted the write, possibly after reconciling a conflict
    Success,
    /// Transient or remote failure; retry later unchanged
    Failure(String),
    /// The record no longer exists; nothing left to push
    EntityNotFound,
}

/// Pushes queued mutations of one entity kind to the remote authority.
///
/// An `Err` return is a local storage failure and aborts the drain cycle.
#[async_trait]
pub trait SyncOperationHandler: Send + Sync {
    fn entity_kind(&self) -> EntityKind;

    async fn execute(&self, entity_id: RecordId, operation: SyncOperation)
        -> Result<HandlerOutcome>;
}

/// Handlers keyed by the scope they serve
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<EntityKind, Arc<dyn SyncOperationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for its kind
    pub fn register(&mut self, handler: Arc<dyn SyncOperationHandler>) -> &mut Self {
        self.handlers.insert(handler.entity_kind(), handler);
        self
    }

    /// Register a `RecordSyncHandler` for every entity kind
    pub fn with_record_handlers(
        store: &Arc<dyn RecordStore>,
        remote: &Arc<dyn RemoteClient>,
    ) -> Self {
        let mut registry = Self::new();
        for kind in EntityKind::ALL {
            registry.register(Arc::new(RecordSyncHandler::new(
                kind,
                Arc::clone(store),
                Arc::clone(remote),
            )));
        }
        registry
    }

    /// Look up the handler for a scope
    pub fn get(&self, scope: EntityKind) -> Result<Arc<dyn SyncOperationHandler>> {
        self.handlers
            .get(&scope)
            .cloned()
            .ok_or(Error::MissingHandler(scope))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Pushes the current local state of a record.
///
/// The queued operation is a hint: a tombstoned record is pushed as a delete
/// and a live one as an upsert, so the remote always receives the latest
/// local truth.
pub struct RecordSyncHandler {
    kind: EntityKind,
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteClient>,
}

impl RecordSyncHandler {
    pub fn new(kind: EntityKind, store: Arc<dyn RecordStore>, remote: Arc<dyn RemoteClient>) -> Self {
        Self {
            kind,
            store,
            remote,
        }
    }
}

#[async_trait]
impl SyncOperationHandler for RecordSyncHandler {
    fn entity_kind(&self) -> EntityKind {
        self.kind
    }

    async fn execute(
        &self,
        entity_id: RecordId,
        operation: SyncOperation,
    ) -> Result<HandlerOutcome> {
        let Some(record) = self.store.get(self.kind, entity_id).await? else {
            tracing::debug!(scope = %self.kind, %entity_id, "Local record gone; nothing to push");
            return Ok(HandlerOutcome::EntityNotFound);
        };

        let pushed = match record.deleted_at {
            Some(deleted_at) => {
                self.remote
                    .push_delete(self.kind, entity_id, deleted_at)
                    .await
            }
            None => {
                if operation == SyncOperation::Delete {
                    tracing::debug!(scope = %self.kind, %entity_id, "Record restored locally; pushing upsert");
                }
                self.remote.push_upsert(self.kind, &record).await
            }
        };

        match pushed {
            Ok(PushResponse::Accepted) => Ok(HandlerOutcome::Success),
            Ok(PushResponse::Conflict(authoritative)) => {
                tracing::info!(
                    scope = %self.kind,
                    %entity_id,
                    remote_updated_at = authoritative.updated_at,
                    "Remote rejected push; merging authoritative record"
                );
                self.store
                    .merge(self.kind, RemoteChange::from_record(authoritative))
                    .await?;
                Ok(HandlerOutcome::Success)
            }
            Ok(PushResponse::NotFound) if record.is_deleted() => Ok(HandlerOutcome::EntityNotFound),
            Ok(PushResponse::NotFound) => Ok(HandlerOutcome::Failure(format!(
                "Remote does not know {} {entity_id}",
                self.kind
            ))),
            Err(error) => Ok(HandlerOutcome::Failure(error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, LibSqlRecordStore};
    use crate::models::VersionedRecord;
    use crate::sync::testing::{FakeRemote, RemoteCall};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    async fn setup(remote: FakeRemote) -> (Database, Arc<LibSqlRecordStore>, Arc<FakeRemote>, RecordSyncHandler) {
        let db = Database::open_in_memory().await.unwrap();
        let store = Arc::new(LibSqlRecordStore::new(db.connection()));
        let remote = Arc::new(remote);
        let handler = RecordSyncHandler::new(EntityKind::Finding, store.clone(), remote.clone());
        (db, store, remote, handler)
    }

    fn record(updated_at: i64) -> VersionedRecord<Value> {
        VersionedRecord::new(RecordId::new(), None, json!({"title": "Crack"}), updated_at)
    }

    #[test]
    fn registry_reports_missing_handler() {
        let registry = HandlerRegistry::new();
        let error = registry.get(EntityKind::Inspection).err().unwrap();
        assert!(matches!(error, Error::MissingHandler(EntityKind::Inspection)));
        assert_eq!(
            error.to_string(),
            "No sync handler registered for scope 'inspections'"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registry_with_record_handlers_covers_every_kind() {
        let db = Database::open_in_memory().await.unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(LibSqlRecordStore::new(db.connection()));
        let remote: Arc<dyn RemoteClient> = Arc::new(FakeRemote::default());

        let registry = HandlerRegistry::with_record_handlers(&store, &remote);
        assert_eq!(registry.len(), EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            assert_eq!(registry.get(kind).unwrap().entity_kind(), kind);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_local_record_is_entity_not_found() {
        let (_db, _store, remote, handler) = setup(FakeRemote::default()).await;

        let outcome = handler
            .execute(RecordId::new(), SyncOperation::Upsert)
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::EntityNotFound);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accepted_upsert_is_success() {
        let (_db, store, remote, handler) = setup(FakeRemote::default()).await;
        let local = record(10);
        store.put(EntityKind::Finding, &local).await.unwrap();

        let outcome = handler
            .execute(local.id, SyncOperation::Upsert)
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Success);
        assert_eq!(
            remote.calls(),
            vec![RemoteCall::Upsert(EntityKind::Finding, local)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conflict_merges_authoritative_record_locally() {
        let (_db, store, remote, handler) = setup(FakeRemote::default()).await;
        let local = record(10);
        store.put(EntityKind::Finding, &local).await.unwrap();

        let server = VersionedRecord {
            payload: json!({"title": "Crack (verified)"}),
            updated_at: 20,
            ..local.clone()
        };
        remote.respond_with(Ok(PushResponse::Conflict(server.clone())));

        let outcome = handler
            .execute(local.id, SyncOperation::Upsert)
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Success);
        let stored = store.get(EntityKind::Finding, local.id).await.unwrap();
        assert_eq!(stored, Some(server));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_unknown_to_remote_is_entity_not_found() {
        let (_db, store, remote, handler) = setup(FakeRemote::default()).await;
        let mut local = record(10);
        local.deleted_at = Some(15);
        store.put(EntityKind::Finding, &local).await.unwrap();
        remote.respond_with(Ok(PushResponse::NotFound));

        let outcome = handler
            .execute(local.id, SyncOperation::Delete)
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::EntityNotFound);
        assert_eq!(
            remote.calls(),
            vec![RemoteCall::Delete(EntityKind::Finding, local.id, 15)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_entry_for_live_record_pushes_upsert() {
        let (_db, store, remote, handler) = setup(FakeRemote::default()).await;
        let local = record(30);
        store.put(EntityKind::Finding, &local).await.unwrap();

        handler
            .execute(local.id, SyncOperation::Delete)
            .await
            .unwrap();

        assert_eq!(
            remote.calls(),
            vec![RemoteCall::Upsert(EntityKind::Finding, local)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_error_is_failure() {
        let (_db, store, remote, handler) = setup(FakeRemote::default()).await;
        let local = record(10);
        store.put(EntityKind::Finding, &local).await.unwrap();
        remote.respond_with(Err("connection refused".to_string()));

        let outcome = handler
            .execute(local.id, SyncOperation::Upsert)
            .await
            .unwrap();

        let HandlerOutcome::Failure(reason) = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("connection refused"));
    }
}
