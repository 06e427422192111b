use serde_json::Value;
use snag_core::models::{EntityKind, RecordId};
use snag_core::services::SyncService;

use crate::commands::common::parse_payload;
use crate::error::CliError;

pub async fn run_save(
    service: &SyncService,
    kind: EntityKind,
    id: Option<RecordId>,
    parent_id: Option<RecordId>,
    raw_payload: &str,
) -> Result<RecordId, CliError> {
    let payload = parse_payload(raw_payload)?;
    let record = service
        .repository::<Value>(kind)
        .save(id, parent_id, payload)
        .await?;

    println!("{}", record.id);
    Ok(record.id)
}
