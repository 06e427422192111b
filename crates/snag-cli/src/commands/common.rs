use std::env;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use snag_core::config::SyncConfig;
use snag_core::models::{reserved_payload_key, SyncConflict, SyncQueueEntry};
use snag_core::services::SyncService;
use snag_core::util::compact_text;
use snag_core::VersionedRecord;

use crate::error::CliError;

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("SNAG_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snag")
        .join("snag.db")
}

/// Environment config with the `--api-url` flag applied on top
pub fn resolve_sync_config(api_url: Option<&str>) -> Result<SyncConfig, CliError> {
    let config = SyncConfig::from_env()?;
    match api_url {
        Some(api_url) => Ok(config.with_api_url(api_url)?),
        None => Ok(config),
    }
}

pub async fn open_service(db_path: &Path, config: &SyncConfig) -> Result<SyncService, CliError> {
    Ok(SyncService::open_path(db_path, config).await?)
}

/// Parse a record payload; only JSON objects are accepted
pub fn parse_payload(raw: &str) -> Result<Value, CliError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    if !value.is_object() {
        return Err(CliError::InvalidPayload(compact_text(raw)));
    }
    match reserved_payload_key(&value) {
        Some(key) => Err(CliError::InvalidPayload(format!(
            "field `{key}` is reserved for sync metadata"
        ))),
        None => Ok(value),
    }
}

pub fn format_record_lines(records: &[VersionedRecord<Value>], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let age = format_relative_time(record.effective_timestamp(), now_ms);
            let marker = if record.is_deleted() { "  [deleted]" } else { "" };
            format!(
                "{}  {:>8}  {}{marker}",
                record.id,
                age,
                payload_preview(&record.payload, 60)
            )
        })
        .collect()
}

pub fn payload_preview(payload: &Value, max_chars: usize) -> String {
    let rendered = payload.to_string();
    if rendered.chars().count() <= max_chars {
        return rendered;
    }
    let truncated = rendered.chars().take(max_chars).collect::<String>();
    format!("{truncated}...")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingItem {
    pub scope: String,
    pub entity_id: String,
    pub operation: String,
    pub enqueued_at: i64,
    pub enqueued_at_iso: String,
}

pub fn pending_to_item(entry: &SyncQueueEntry) -> PendingItem {
    PendingItem {
        scope: entry.scope.to_string(),
        entity_id: entry.entity_id.to_string(),
        operation: entry.operation.to_string(),
        enqueued_at: entry.enqueued_at,
        enqueued_at_iso: format_sync_timestamp(entry.enqueued_at),
    }
}

pub fn format_pending_lines(pending: &[PendingItem]) -> Vec<String> {
    pending
        .iter()
        .map(|item| {
            format!(
                "{}  {:<6}  {}/{}",
                item.enqueued_at_iso, item.operation, item.scope, item.entity_id
            )
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflictItem {
    pub id: i64,
    pub collection: String,
    pub record_id: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        collection: conflict.collection.clone(),
        record_id: conflict.record_id.clone(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  {}/{}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.collection,
                conflict.record_id,
                conflict.local_updated_at,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
