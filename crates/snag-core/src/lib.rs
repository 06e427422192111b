//! snag-core - Core library for Snag
//!
//! This crate contains the versioned record model, the local libSQL store,
//! and the offline-first sync machinery shared by the Snag API server and
//! CLI.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{EntityKind, RecordId, SyncScopeKey, Timestamp, VersionedRecord};
