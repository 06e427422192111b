//! Wires the local store, queue, engine and pull coordinator together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::repository::OfflineFirstRepository;
use crate::clock::{Clock, MonotonicClock};
use crate::config::SyncConfig;
use crate::db::{
    ConflictLog, Database, LibSqlPullSyncTimestampStore, LibSqlRecordStore, LibSqlSyncQueue,
    PullSyncTimestampStore, RecordStore, SyncQueue,
};
use crate::error::{Error, Result};
use crate::models::EntityKind;
use crate::sync::{
    spawn_periodic_trigger, HandlerRegistry, HttpRemoteClient, PullSyncCoordinator, RemoteClient,
    SyncEngine, SyncEngineHandle,
};

/// A running sync stack over one local database.
pub struct SyncService {
    _db: Database,
    db_path: Option<PathBuf>,
    store: Arc<LibSqlRecordStore>,
    queue: Arc<LibSqlSyncQueue>,
    checkpoints: Arc<LibSqlPullSyncTimestampStore>,
    engine: SyncEngineHandle,
    pull: Arc<PullSyncCoordinator>,
    clock: Arc<dyn Clock>,
    periodic: Option<JoinHandle<()>>,
}

impl SyncService {
    /// Open (or create) the database at `db_path` and sync against the
    /// configured API.
    pub async fn open_path(db_path: impl Into<PathBuf>, config: &SyncConfig) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let remote = HttpRemoteClient::new(&config.api_url, config.http_timeout)
            .map_err(|error| Error::Remote(error.to_string()))?;
        let db = Database::open(&db_path).await?;
        tracing::info!(db = %db_path.display(), api = %config.api_url, "Sync service opened");

        let mut service = Self::with_remote(db, Arc::new(remote), config);
        service.db_path = Some(db_path);
        Ok(service)
    }

    /// Build the stack on an open database with any remote
    pub fn with_remote(db: Database, remote: Arc<dyn RemoteClient>, config: &SyncConfig) -> Self {
        let conn = db.connection();
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let store = Arc::new(LibSqlRecordStore::new(conn));
        let queue = Arc::new(LibSqlSyncQueue::with_clock(conn, Arc::clone(&clock)));
        let checkpoints = Arc::new(LibSqlPullSyncTimestampStore::new(conn));

        let dyn_store: Arc<dyn RecordStore> = store.clone();
        let engine = SyncEngine::new(
            queue.clone(),
            HandlerRegistry::with_record_handlers(&dyn_store, &remote),
        )
        .spawn();
        let pull = Arc::new(
            PullSyncCoordinator::new(
                engine.clone(),
                queue.clone(),
                checkpoints.clone(),
                dyn_store,
                remote,
                Arc::clone(&clock),
            )
            .with_policy(config.flush_policy),
        );

        Self {
            _db: db,
            db_path: None,
            store,
            queue,
            checkpoints,
            engine,
            pull,
            clock,
            periodic: None,
        }
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Typed repository for one entity kind
    pub fn repository<P: Serialize + DeserializeOwned>(
        &self,
        kind: EntityKind,
    ) -> OfflineFirstRepository<P> {
        OfflineFirstRepository::new(
            kind,
            self.store.clone(),
            self.queue.clone(),
            self.engine.clone(),
            self.pull.clone(),
            Arc::clone(&self.clock),
        )
    }

    pub fn store(&self) -> &LibSqlRecordStore {
        &self.store
    }

    pub fn queue(&self) -> &dyn SyncQueue {
        self.queue.as_ref()
    }

    pub fn checkpoints(&self) -> &dyn PullSyncTimestampStore {
        self.checkpoints.as_ref()
    }

    pub fn conflicts(&self) -> &ConflictLog {
        self.store.conflicts()
    }

    pub const fn engine(&self) -> &SyncEngineHandle {
        &self.engine
    }

    pub fn pull(&self) -> &PullSyncCoordinator {
        &self.pull
    }

    /// Trigger a drain every `config.sync_interval`
    pub fn start_periodic_sync(&mut self, config: &SyncConfig) {
        if self.periodic.is_none() {
            tracing::info!(interval_secs = config.sync_interval.as_secs(), "Periodic sync enabled");
            self.periodic = Some(spawn_periodic_trigger(
                self.engine.clone(),
                config.sync_interval,
            ));
        }
    }

    /// Drop every local record, pending entry, checkpoint and conflict
    pub async fn reset(&self) -> Result<()> {
        self.queue.clear().await?;
        self.checkpoints.clear().await?;
        self.store.conflicts().clear().await?;
        for kind in EntityKind::ALL {
            for record in self.store.list(&kind.into(), true).await? {
                self.store.purge(kind, record.id).await?;
            }
        }
        tracing::info!("Local sync state reset");
        Ok(())
    }

    /// Stop background work at the next entry boundary
    pub async fn shutdown(mut self) {
        if let Some(periodic) = self.periodic.take() {
            periodic.abort();
        }
        self.engine.shutdown().await;
    }
}
