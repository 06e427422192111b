use serde_json::Value;
use snag_core::models::{EntityKind, RecordId};
use snag_core::services::SyncService;

use crate::error::CliError;

pub async fn run_delete(
    service: &SyncService,
    kind: EntityKind,
    id: RecordId,
) -> Result<(), CliError> {
    match service.repository::<Value>(kind).delete(id).await {
        Ok(record) => {
            println!("{}", record.id);
            Ok(())
        }
        Err(snag_core::Error::NotFound(_)) => Err(CliError::RecordNotFound(format!("{kind}/{id}"))),
        Err(error) => Err(error.into()),
    }
}
