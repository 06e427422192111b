//! Offline-first synchronization: push queue draining, scoped pulls, and
//! last-writer-wins conflict resolution.

mod engine;
mod handler;
mod pull;
mod remote;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{
    spawn_periodic_trigger, DrainOutcome, DrainReport, SyncEngine, SyncEngineHandle, TriggerReason,
};
pub use handler::{HandlerOutcome, HandlerRegistry, RecordSyncHandler, SyncOperationHandler};
pub use pull::{PullOutcome, PullReport, PullSyncCoordinator};
pub use remote::{
    DeleteRequest, HttpRemoteClient, PushResponse, RemoteClient, RemoteError, RemoteResult,
};
pub use resolver::Resolution;
