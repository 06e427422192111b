use serde::Serialize;
use snag_core::config::SyncConfig;
use snag_core::models::{EntityKind, PullCheckpointItem, RecordId, SyncScopeKey};
use snag_core::services::SyncService;
use snag_core::sync::{DrainOutcome, DrainReport, PullOutcome, PullReport};

use crate::commands::common::{
    format_pending_lines, format_sync_conflict_lines, format_sync_timestamp, pending_to_item,
    sync_conflict_to_item, PendingItem, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_sync_push(service: &SyncService) -> Result<DrainReport, CliError> {
    let report = service.engine().drain().await?;
    println!(
        "Pushed {} change(s), discarded {}",
        report.pushed, report.discarded
    );

    match &report.outcome {
        DrainOutcome::Completed => Ok(report),
        DrainOutcome::StoppedOnFailure {
            scope,
            entity_id,
            reason,
        } => Err(CliError::PushStopped {
            scope: scope.to_string(),
            entity_id: entity_id.to_string(),
            reason: reason.clone(),
        }),
        DrainOutcome::Cancelled => Err(CliError::PushCancelled),
    }
}

pub async fn run_sync_pull(
    service: &SyncService,
    kind: EntityKind,
    parent_id: Option<RecordId>,
) -> Result<PullReport, CliError> {
    let report = service.pull().pull(&SyncScopeKey { kind, parent_id }).await?;

    match &report.outcome {
        PullOutcome::Completed => {
            println!(
                "Pulled {}: applied {}, kept local {}",
                report.scope, report.applied, report.rejected
            );
            Ok(report)
        }
        PullOutcome::SkippedPendingPush => {
            println!("Skipped pull of {}: local changes still pending", report.scope);
            Ok(report)
        }
        PullOutcome::FetchFailed(reason) => Err(CliError::PullFailed(reason.clone())),
        PullOutcome::Cancelled => Err(CliError::PullFailed("cancelled".to_string())),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub db_path: Option<String>,
    pub api_url: String,
    pub pending: Vec<PendingItem>,
    pub checkpoints: Vec<PullCheckpointItem>,
}

pub async fn sync_status(service: &SyncService, config: &SyncConfig) -> Result<SyncStatus, CliError> {
    let pending = service.queue().entries().await?;
    let checkpoints = service.checkpoints().all().await?;

    Ok(SyncStatus {
        db_path: service.db_path().map(|path| path.display().to_string()),
        api_url: config.api_url.clone(),
        pending: pending.iter().map(pending_to_item).collect(),
        checkpoints: checkpoints.iter().map(PullCheckpointItem::from).collect(),
    })
}

pub async fn run_sync_status(
    service: &SyncService,
    config: &SyncConfig,
    as_json: bool,
) -> Result<(), CliError> {
    let status = sync_status(service, config).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("API: {}", status.api_url);
    if let Some(db_path) = &status.db_path {
        println!("Database: {db_path}");
    }

    if status.pending.is_empty() {
        println!("No pending changes.");
    } else {
        println!("Pending changes ({}):", status.pending.len());
        for line in format_pending_lines(&status.pending) {
            println!("  {line}");
        }
    }

    if status.checkpoints.is_empty() {
        println!("Never pulled.");
    } else {
        println!("Last pulled:");
        for checkpoint in &status.checkpoints {
            println!(
                "  {:<48}  {}",
                checkpoint.scope,
                format_sync_timestamp(checkpoint.last_synced_at)
            );
        }
    }
    Ok(())
}

pub async fn run_sync_conflicts(
    service: &SyncService,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = service.conflicts().list(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_reset(service: &SyncService, confirmed: bool) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::ResetNotConfirmed);
    }

    service.reset().await?;
    println!("Local sync state reset");
    Ok(())
}
