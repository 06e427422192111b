use chrono::Utc;
use snag_core::db::RecordStore;
use snag_core::models::{EntityKind, RecordId, SyncScopeKey};
use snag_core::services::SyncService;

use crate::commands::common::format_record_lines;
use crate::error::CliError;

pub async fn run_list(
    service: &SyncService,
    kind: EntityKind,
    parent_id: Option<RecordId>,
    include_deleted: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let scope = SyncScopeKey { kind, parent_id };
    let records = service.store().list(&scope, include_deleted).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No {kind} stored locally.");
    } else {
        for line in format_record_lines(&records, Utc::now().timestamp_millis()) {
            println!("{line}");
        }
    }

    Ok(())
}
