//! Push engine: drains the sync queue in FIFO order through the handlers.
//!
//! One worker task owns the drain loop. Callers talk to it through a
//! cloneable [`SyncEngineHandle`]; triggers that arrive while a drain is
//! running are folded into a single follow-up run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::handler::{HandlerOutcome, HandlerRegistry};
use crate::db::SyncQueue;
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordId};
use crate::state::SyncState;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Why a drain was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Enqueued,
    ConnectivityRestored,
    Periodic,
    Manual,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Enqueued => "enqueued",
            Self::ConnectivityRestored => "connectivity_restored",
            Self::Periodic => "periodic",
            Self::Manual => "manual",
        })
    }
}

/// How a drain cycle ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DrainOutcome {
    /// Queue is empty
    Completed,
    /// A handler failed; that entry and everything behind it stay queued
    StoppedOnFailure {
        scope: EntityKind,
        entity_id: RecordId,
        reason: String,
    },
    /// Engine shut down between entries
    Cancelled,
}

/// Summary of one drain cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries the remote accepted
    pub pushed: usize,
    /// Entries dropped because the record no longer exists
    pub discarded: usize,
    pub outcome: DrainOutcome,
}

impl DrainReport {
    const fn new() -> Self {
        Self {
            pushed: 0,
            discarded: 0,
            outcome: DrainOutcome::Completed,
        }
    }

    pub const fn is_completed(&self) -> bool {
        matches!(self.outcome, DrainOutcome::Completed)
    }
}

enum Command {
    Trigger(TriggerReason),
    Drain(oneshot::Sender<Result<DrainReport>>),
    Shutdown,
}

/// The drain loop and the state it publishes
pub struct SyncEngine {
    queue: Arc<dyn SyncQueue>,
    handlers: HandlerRegistry,
    state: watch::Sender<SyncState>,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(queue: Arc<dyn SyncQueue>, handlers: HandlerRegistry) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            queue,
            handlers,
            state,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the worker task and return a handle to it
    pub fn spawn(self) -> SyncEngineHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = SyncEngineHandle {
            commands,
            state: self.state.subscribe(),
            cancelled: Arc::clone(&self.cancelled),
        };

        tokio::spawn(self.run(receiver));
        handle
    }

    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        tracing::info!(handlers = self.handlers.len(), "Sync engine started");

        while let Some(command) = commands.recv().await {
            let mut waiters = Vec::new();
            let mut shutdown = false;

            // Fold everything already queued into this run
            let pending = std::iter::from_fn(|| commands.try_recv().ok());
            for command in std::iter::once(command).chain(pending) {
                match command {
                    Command::Trigger(reason) => {
                        tracing::debug!(%reason, "Sync drain triggered");
                    }
                    Command::Drain(reply) => waiters.push(reply),
                    Command::Shutdown => shutdown = true,
                }
            }

            let result = self.drain_once().await;
            if let Err(error) = &result {
                tracing::error!(%error, "Sync drain aborted");
            }
            reply_all(waiters, result);

            if shutdown {
                break;
            }
        }

        tracing::info!("Sync engine stopped");
    }

    /// Run one drain cycle and publish the resulting state
    pub async fn drain_once(&self) -> Result<DrainReport> {
        self.state.send_replace(SyncState::Draining);
        let result = self.drain_entries().await;

        let pending = match self.queue.len().await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::warn!(%error, "Could not count pending sync entries");
                1
            }
        };
        self.state.send_replace(if pending == 0 {
            SyncState::Idle
        } else {
            SyncState::IdleWithPending
        });

        result
    }

    async fn drain_entries(&self) -> Result<DrainReport> {
        let mut report = DrainReport::new();

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                tracing::info!(pushed = report.pushed, "Sync drain cancelled");
                report.outcome = DrainOutcome::Cancelled;
                break;
            }

            let Some(entry) = self.queue.oldest().await? else {
                break;
            };
            let handler = self.handlers.get(entry.scope)?;

            match handler.execute(entry.entity_id, entry.operation).await? {
                HandlerOutcome::Success => {
                    tracing::debug!(
                        scope = %entry.scope,
                        entity_id = %entry.entity_id,
                        operation = %entry.operation,
                        "Pushed sync entry"
                    );
                    self.queue.acknowledge(&entry).await?;
                    report.pushed += 1;
                }
                HandlerOutcome::EntityNotFound => {
                    tracing::debug!(
                        scope = %entry.scope,
                        entity_id = %entry.entity_id,
                        "Discarding sync entry for missing record"
                    );
                    self.queue.acknowledge(&entry).await?;
                    report.discarded += 1;
                }
                HandlerOutcome::Failure(reason) => {
                    tracing::warn!(
                        scope = %entry.scope,
                        entity_id = %entry.entity_id,
                        %reason,
                        "Sync push failed; stopping drain"
                    );
                    report.outcome = DrainOutcome::StoppedOnFailure {
                        scope: entry.scope,
                        entity_id: entry.entity_id,
                        reason,
                    };
                    break;
                }
            }
        }

        Ok(report)
    }
}

fn reply_all(waiters: Vec<oneshot::Sender<Result<DrainReport>>>, result: Result<DrainReport>) {
    match result {
        Ok(report) => {
            for waiter in waiters {
                let _ = waiter.send(Ok(report.clone()));
            }
        }
        Err(error) => {
            let message = error.to_string();
            let mut waiters = waiters.into_iter();
            if let Some(first) = waiters.next() {
                let _ = first.send(Err(error));
            }
            for waiter in waiters {
                let _ = waiter.send(Err(Error::DrainFailed(message.clone())));
            }
        }
    }
}

/// Cloneable handle to a running engine
#[derive(Clone)]
pub struct SyncEngineHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SyncState>,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngineHandle {
    /// Request a drain without waiting for it.
    ///
    /// A full command channel already holds a pending run, so the trigger is
    /// dropped.
    pub fn trigger(&self, reason: TriggerReason) -> Result<()> {
        match self.commands.try_send(Command::Trigger(reason)) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::EngineStopped),
        }
    }

    /// Run a drain cycle and wait for its report
    pub async fn drain(&self) -> Result<DrainReport> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Drain(reply))
            .await
            .map_err(|_| Error::EngineStopped)?;
        response.await.map_err(|_| Error::EngineStopped)?
    }

    /// Stop the engine at the next entry boundary
    pub async fn shutdown(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Whether shutdown was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Current engine state
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch engine state transitions
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }
}

/// Trigger a drain every `interval` until the engine stops
pub fn spawn_periodic_trigger(handle: SyncEngineHandle, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if handle.trigger(TriggerReason::Periodic).is_err() {
                tracing::debug!("Periodic sync trigger stopped");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, LibSqlSyncQueue};
    use crate::models::SyncOperation;
    use crate::sync::testing::ScriptedHandler;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Database, Arc<LibSqlSyncQueue>) {
        let db = Database::open_in_memory().await.unwrap();
        let queue = Arc::new(LibSqlSyncQueue::new(db.connection()));
        (db, queue)
    }

    async fn enqueue_three(queue: &LibSqlSyncQueue, kind: EntityKind) -> Vec<RecordId> {
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = RecordId::new();
            queue.enqueue(kind, id, SyncOperation::Upsert).await.unwrap();
            ids.push(id);
        }
        ids
    }

    fn engine_with(queue: &Arc<LibSqlSyncQueue>, handler: &Arc<ScriptedHandler>) -> SyncEngine {
        let mut handlers = HandlerRegistry::new();
        handlers.register(handler.clone());
        SyncEngine::new(queue.clone(), handlers)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_on_first_entry_keeps_whole_queue() {
        let (_db, queue) = setup().await;
        let ids = enqueue_three(&queue, EntityKind::Finding).await;
        let handler = Arc::new(
            ScriptedHandler::new(EntityKind::Finding)
                .then(HandlerOutcome::Failure("offline".to_string())),
        );
        let engine = engine_with(&queue, &handler);

        let report = engine.drain_once().await.unwrap();

        assert_eq!(
            report.outcome,
            DrainOutcome::StoppedOnFailure {
                scope: EntityKind::Finding,
                entity_id: ids[0],
                reason: "offline".to_string(),
            }
        );
        assert_eq!(handler.calls().len(), 1);
        assert_eq!(queue.len().await.unwrap(), 3);
        assert_eq!(*engine.state.borrow(), SyncState::IdleWithPending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entity_not_found_is_discarded_and_drain_continues() {
        let (_db, queue) = setup().await;
        let ids = enqueue_three(&queue, EntityKind::Project).await;
        let handler = Arc::new(
            ScriptedHandler::new(EntityKind::Project).then(HandlerOutcome::EntityNotFound),
        );
        let engine = engine_with(&queue, &handler);

        let report = engine.drain_once().await.unwrap();

        assert_eq!(report.pushed, 2);
        assert_eq!(report.discarded, 1);
        assert!(report.is_completed());
        assert!(queue.is_empty(EntityKind::Project).await.unwrap());
        let called = handler
            .calls()
            .into_iter()
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        assert_eq!(called, ids);
        assert_eq!(*engine.state.borrow(), SyncState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_resumes_from_failed_entry() {
        let (_db, queue) = setup().await;
        let ids = enqueue_three(&queue, EntityKind::Structure).await;
        let handler = Arc::new(
            ScriptedHandler::new(EntityKind::Structure)
                .then(HandlerOutcome::Success)
                .then(HandlerOutcome::Failure("timeout".to_string())),
        );
        let engine = engine_with(&queue, &handler);

        let first = engine.drain_once().await.unwrap();
        assert_eq!(first.pushed, 1);
        assert_eq!(queue.len().await.unwrap(), 2);

        let second = engine.drain_once().await.unwrap();
        assert!(second.is_completed());
        assert_eq!(second.pushed, 2);

        let called = handler
            .calls()
            .into_iter()
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        assert_eq!(called, vec![ids[0], ids[1], ids[1], ids[2]]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn every_missing_entity_is_discarded() {
        let (_db, queue) = setup().await;
        let first = RecordId::new();
        let second = RecordId::new();
        queue
            .enqueue(EntityKind::Finding, first, SyncOperation::Upsert)
            .await
            .unwrap();
        queue
            .enqueue(EntityKind::Finding, second, SyncOperation::Delete)
            .await
            .unwrap();
        let handler = Arc::new(
            ScriptedHandler::new(EntityKind::Finding)
                .then(HandlerOutcome::EntityNotFound)
                .then(HandlerOutcome::EntityNotFound),
        );
        let engine = engine_with(&queue, &handler);

        let report = engine.drain_once().await.unwrap();

        assert!(report.is_completed());
        assert_eq!(report.pushed, 0);
        assert_eq!(report.discarded, 2);
        assert_eq!(
            handler.calls(),
            vec![
                (first, SyncOperation::Upsert),
                (second, SyncOperation::Delete)
            ]
        );
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(*engine.state.borrow(), SyncState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retry_resumes_at_failed_entry_before_newer_ones() {
        let (_db, queue) = setup().await;
        let failing = RecordId::new();
        queue
            .enqueue(EntityKind::Client, failing, SyncOperation::Upsert)
            .await
            .unwrap();
        let handler = Arc::new(
            ScriptedHandler::new(EntityKind::Client)
                .then(HandlerOutcome::Failure("503".to_string())),
        );
        let engine = engine_with(&queue, &handler);

        let first = engine.drain_once().await.unwrap();
        assert!(!first.is_completed());
        assert_eq!(queue.len().await.unwrap(), 1);

        let later = RecordId::new();
        queue
            .enqueue(EntityKind::Client, later, SyncOperation::Upsert)
            .await
            .unwrap();

        let retry = engine.drain_once().await.unwrap();

        assert!(retry.is_completed());
        assert_eq!(retry.pushed, 2);
        assert_eq!(
            handler.calls(),
            vec![
                (failing, SyncOperation::Upsert),
                (failing, SyncOperation::Upsert),
                (later, SyncOperation::Upsert)
            ]
        );
        assert!(queue.is_empty(EntityKind::Client).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_follows_fifo_across_scopes() {
        let (_db, queue) = setup().await;
        let project = RecordId::new();
        let finding = RecordId::new();
        queue
            .enqueue(EntityKind::Project, project, SyncOperation::Upsert)
            .await
            .unwrap();
        queue
            .enqueue(EntityKind::Finding, finding, SyncOperation::Delete)
            .await
            .unwrap();

        let projects = Arc::new(ScriptedHandler::new(EntityKind::Project));
        let findings = Arc::new(ScriptedHandler::new(EntityKind::Finding));
        let mut handlers = HandlerRegistry::new();
        handlers.register(projects.clone()).register(findings.clone());
        let engine = SyncEngine::new(queue.clone(), handlers);

        let report = engine.drain_once().await.unwrap();
        assert_eq!(report.pushed, 2);
        assert_eq!(projects.calls(), vec![(project, SyncOperation::Upsert)]);
        assert_eq!(findings.calls(), vec![(finding, SyncOperation::Delete)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_handler_is_fatal_and_keeps_queue() {
        let (_db, queue) = setup().await;
        enqueue_three(&queue, EntityKind::Inspection).await;
        let handler = Arc::new(ScriptedHandler::new(EntityKind::Finding));
        let engine = engine_with(&queue, &handler);

        let error = engine.drain_once().await.unwrap_err();

        assert!(matches!(error, Error::MissingHandler(EntityKind::Inspection)));
        assert_eq!(queue.len().await.unwrap(), 3);
        assert!(handler.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_stops_at_entry_boundary() {
        let (_db, queue) = setup().await;
        enqueue_three(&queue, EntityKind::Client).await;

        struct CancellingHandler(Arc<AtomicBool>);

        #[async_trait::async_trait]
        impl crate::sync::SyncOperationHandler for CancellingHandler {
            fn entity_kind(&self) -> EntityKind {
                EntityKind::Client
            }

            async fn execute(
                &self,
                _entity_id: RecordId,
                _operation: SyncOperation,
            ) -> Result<HandlerOutcome> {
                self.0.store(true, Ordering::SeqCst);
                Ok(HandlerOutcome::Success)
            }
        }

        let mut engine = SyncEngine::new(queue.clone(), HandlerRegistry::new());
        engine
            .handlers
            .register(Arc::new(CancellingHandler(engine.cancelled.clone())));

        let report = engine.drain_once().await.unwrap();
        assert_eq!(report.outcome, DrainOutcome::Cancelled);
        assert_eq!(report.pushed, 1);
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replaced_entry_is_pushed_again() {
        let (_db, queue) = setup().await;
        let id = RecordId::new();
        queue
            .enqueue(EntityKind::Finding, id, SyncOperation::Upsert)
            .await
            .unwrap();

        struct ReenqueueOnce {
            queue: Arc<LibSqlSyncQueue>,
            done: AtomicBool,
        }

        #[async_trait::async_trait]
        impl crate::sync::SyncOperationHandler for ReenqueueOnce {
            fn entity_kind(&self) -> EntityKind {
                EntityKind::Finding
            }

            async fn execute(
                &self,
                entity_id: RecordId,
                _operation: SyncOperation,
            ) -> Result<HandlerOutcome> {
                if !self.done.swap(true, Ordering::SeqCst) {
                    // Local edit lands while the push is in flight
                    self.queue
                        .enqueue(EntityKind::Finding, entity_id, SyncOperation::Upsert)
                        .await?;
                }
                Ok(HandlerOutcome::Success)
            }
        }

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(ReenqueueOnce {
            queue: queue.clone(),
            done: AtomicBool::new(false),
        }));
        let engine = SyncEngine::new(queue.clone(), handlers);

        let report = engine.drain_once().await.unwrap();
        assert_eq!(report.pushed, 2);
        assert!(queue.is_empty(EntityKind::Finding).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handle_drains_and_reports_state() {
        let (_db, queue) = setup().await;
        enqueue_three(&queue, EntityKind::Finding).await;
        let handler = Arc::new(ScriptedHandler::new(EntityKind::Finding));
        let handle = engine_with(&queue, &handler).spawn();

        handle.trigger(TriggerReason::Enqueued).unwrap();
        let report = handle.drain().await.unwrap();

        assert!(report.is_completed());
        assert_eq!(handler.calls().len(), 3);
        assert_eq!(handle.state(), SyncState::Idle);
        assert!(queue.is_empty(EntityKind::Finding).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_stops_worker() {
        let (_db, queue) = setup().await;
        let handler = Arc::new(ScriptedHandler::new(EntityKind::Finding));
        let handle = engine_with(&queue, &handler).spawn();

        handle.shutdown().await;
        assert!(handle.is_cancelled());

        // Worker exits after replying to anything already queued
        let mut stopped = false;
        for _ in 0..50 {
            if matches!(handle.drain().await, Err(Error::EngineStopped)) {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stopped);
        assert!(handle.trigger(TriggerReason::Manual).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn periodic_trigger_drains_queue() {
        let (_db, queue) = setup().await;
        enqueue_three(&queue, EntityKind::Project).await;
        let handler = Arc::new(ScriptedHandler::new(EntityKind::Project));
        let handle = engine_with(&queue, &handler).spawn();

        let ticker = spawn_periodic_trigger(handle.clone(), Duration::from_millis(10));
        for _ in 0..100 {
            if queue.len().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(queue.len().await.unwrap(), 0);
        ticker.abort();
        handle.shutdown().await;
    }
}
