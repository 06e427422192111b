//! Error types for snag-core

use thiserror::Error;

use crate::models::EntityKind;

/// Result type alias using snag-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in snag-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No sync handler registered for an entity kind.
    ///
    /// This is a wiring defect, never a runtime condition, so the engine
    /// surfaces it instead of retrying.
    #[error("No sync handler registered for scope '{0}'")]
    MissingHandler(EntityKind),

    /// The sync engine worker is no longer running
    #[error("Sync engine is not running")]
    EngineStopped,

    /// Shared result of a drain cycle that aborted
    #[error("Sync drain failed: {0}")]
    DrainFailed(String),

    /// Remote authority error
    #[error("Remote error: {0}")]
    Remote(String),
}
