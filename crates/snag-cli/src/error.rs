use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] snag_core::Error),
    #[error(transparent)]
    Config(#[from] snag_core::config::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Payload must be a JSON object: {0}")]
    InvalidPayload(String),
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Push stopped on {scope} {entity_id}: {reason}")]
    PushStopped {
        scope: String,
        entity_id: String,
        reason: String,
    },
    #[error("Push cancelled before the queue was drained")]
    PushCancelled,
    #[error("Pull failed: {0}")]
    PullFailed(String),
    #[error("Refusing to reset local sync state without --yes")]
    ResetNotConfirmed,
}
