use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use snag_core::models::{EntityKind, RecordId};

#[derive(Parser)]
#[command(name = "snag")]
#[command(about = "Record and sync snagging findings from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Sync API base URL (overrides SNAG_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or overwrite a record
    Save {
        /// Collection: clients, projects, structures, findings, inspections
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        /// JSON object payload
        payload: String,
        /// Record ID (new one generated when omitted)
        #[arg(long, value_parser = parse_record_id)]
        id: Option<RecordId>,
        /// Parent record ID
        #[arg(long, value_parser = parse_record_id)]
        parent: Option<RecordId>,
    },
    /// Delete a record (tombstone)
    Delete {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        #[arg(value_parser = parse_record_id)]
        id: RecordId,
    },
    /// List local records
    List {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        /// Only children of this record
        #[arg(long, value_parser = parse_record_id)]
        parent: Option<RecordId>,
        /// Include tombstones
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push, pull and inspect sync state
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Drain the push queue
    Push,
    /// Pull remote changes for one collection
    Pull {
        #[arg(value_parser = parse_kind)]
        kind: EntityKind,
        /// Only children of this record
        #[arg(long, value_parser = parse_record_id)]
        parent: Option<RecordId>,
    },
    /// Show pending entries and pull checkpoints
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Wipe local records, queue, checkpoints and conflicts
    Reset {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}

fn parse_kind(value: &str) -> Result<EntityKind, String> {
    value.parse().map_err(|error: snag_core::Error| error.to_string())
}

fn parse_record_id(value: &str) -> Result<RecordId, String> {
    value
        .parse()
        .map_err(|_| format!("'{value}' is not a valid record ID"))
}
