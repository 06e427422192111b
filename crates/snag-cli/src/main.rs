//! Snag CLI - record findings offline and sync them with the Snag API.

mod cli;
mod commands;
mod error;


use clap::Parser;

use cli::{Cli, Commands, SyncCommands};
use commands::common::{open_service, resolve_db_path, resolve_sync_config};
use commands::completions::run_completions;
use commands::delete::run_delete;
use commands::list::run_list;
use commands::save::run_save;
use commands::sync::{
    run_sync_conflicts, run_sync_pull, run_sync_push, run_sync_reset, run_sync_status,
};
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("snag=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path);
    let config = resolve_sync_config(cli.api_url.as_deref())?;
    let service = open_service(&db_path, &config).await?;

    let result = match cli.command {
        Commands::Save {
            kind,
            payload,
            id,
            parent,
        } => run_save(&service, kind, id, parent, &payload).await.map(|_| ()),
        Commands::Delete { kind, id } => run_delete(&service, kind, id).await,
        Commands::List {
            kind,
            parent,
            all,
            json,
        } => run_list(&service, kind, parent, all, json).await,
        Commands::Sync { command } => match command {
            SyncCommands::Push => run_sync_push(&service).await.map(|_| ()),
            SyncCommands::Pull { kind, parent } => {
                run_sync_pull(&service, kind, parent).await.map(|_| ())
            }
            SyncCommands::Status { json } => run_sync_status(&service, &config, json).await,
            SyncCommands::Conflicts { limit, json } => {
                run_sync_conflicts(&service, limit, json).await
            }
            SyncCommands::Reset { yes } => run_sync_reset(&service, yes).await,
        },
        Commands::Completions { .. } => Ok(()),
    };

    service.shutdown().await;
    result
}
