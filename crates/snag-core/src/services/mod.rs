//! Application-facing services built on the sync layer.

mod repository;
mod sync_service;

pub use repository::{OfflineFirstRepository, RecordObserver};
pub use sync_service::SyncService;
