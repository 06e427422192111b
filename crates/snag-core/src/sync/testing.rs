//! In-process fakes for sync tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::handler::{HandlerOutcome, SyncOperationHandler};
use super::remote::{PushResponse, RemoteClient, RemoteError, RemoteResult};
use crate::error::Result;
use crate::models::{EntityKind, RecordId, RemoteChange, SyncOperation, SyncScopeKey, Timestamp, VersionedRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Fetch(SyncScopeKey, Timestamp),
    Upsert(EntityKind, VersionedRecord<Value>),
    Delete(EntityKind, RecordId, Timestamp),
}

/// Scripted remote: queued responses first, then accept everything
#[derive(Default)]
pub struct FakeRemote {
    calls: Mutex<Vec<RemoteCall>>,
    push_responses: Mutex<VecDeque<std::result::Result<PushResponse, String>>>,
    fetch_responses: Mutex<VecDeque<std::result::Result<Vec<RemoteChange>, String>>>,
    fetch_delay: Option<Duration>,
    offline: AtomicBool,
    active_fetches: AtomicUsize,
    max_active_fetches: AtomicUsize,
}

impl FakeRemote {
    pub fn with_fetch_delay(delay: Duration) -> Self {
        Self {
            fetch_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn respond_with(&self, response: std::result::Result<PushResponse, String>) {
        self.push_responses.lock().unwrap().push_back(response);
    }

    pub fn serve_fetch(&self, response: std::result::Result<Vec<RemoteChange>, String>) {
        self.fetch_responses.lock().unwrap().push_back(response);
    }

    /// While offline every push fails with a transport-like error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_active_fetches(&self) -> usize {
        self.max_active_fetches.load(Ordering::SeqCst)
    }

    fn next_push(&self) -> RemoteResult<PushResponse> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Api("offline".to_string()));
        }
        match self.push_responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(RemoteError::Api(message)),
            None => Ok(PushResponse::Accepted),
        }
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn fetch_since(
        &self,
        scope: &SyncScopeKey,
        since: Timestamp,
    ) -> RemoteResult<Vec<RemoteChange>> {
        self.calls
            .lock()
            .unwrap()
            .push(RemoteCall::Fetch(*scope, since));

        let active = self.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_fetches.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.active_fetches.fetch_sub(1, Ordering::SeqCst);

        match self.fetch_responses.lock().unwrap().pop_front() {
            Some(Ok(changes)) => Ok(changes),
            Some(Err(message)) => Err(RemoteError::Api(message)),
            None => Ok(Vec::new()),
        }
    }

    async fn push_upsert(
        &self,
        kind: EntityKind,
        record: &VersionedRecord<Value>,
    ) -> RemoteResult<PushResponse> {
        self.calls
            .lock()
            .unwrap()
            .push(RemoteCall::Upsert(kind, record.clone()));
        self.next_push()
    }

    async fn push_delete(
        &self,
        kind: EntityKind,
        id: RecordId,
        deleted_at: Timestamp,
    ) -> RemoteResult<PushResponse> {
        self.calls
            .lock()
            .unwrap()
            .push(RemoteCall::Delete(kind, id, deleted_at));
        self.next_push()
    }
}

/// Handler returning queued outcomes, then `Success`
pub struct ScriptedHandler {
    kind: EntityKind,
    outcomes: Mutex<VecDeque<HandlerOutcome>>,
    calls: Mutex<Vec<(RecordId, SyncOperation)>>,
}

impl ScriptedHandler {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            outcomes: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, outcome: HandlerOutcome) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn push_outcome(&self, outcome: HandlerOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<(RecordId, SyncOperation)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncOperationHandler for ScriptedHandler {
    fn entity_kind(&self) -> EntityKind {
        self.kind
    }

    async fn execute(
        &self,
        entity_id: RecordId,
        operation: SyncOperation,
    ) -> Result<HandlerOutcome> {
        self.calls.lock().unwrap().push((entity_id, operation));
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(HandlerOutcome::Success))
    }
}
