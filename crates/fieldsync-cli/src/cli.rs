use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use fieldsync_core::OperationKind;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Queue marketplace writes offline and sync them when connectivity returns")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the client config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a mutation against a remote collection
    Enqueue {
        /// Mutation kind
        #[arg(value_enum)]
        kind: KindArg,
        /// Remote collection name
        collection: String,
        /// Row payload as a JSON object (`-` reads stdin)
        payload: String,
        /// Only queue the mutation, do not sync afterwards
        #[arg(long)]
        no_sync: bool,
    },
    /// Replay queued mutations and refresh the cache
    Sync,
    /// Show queue and sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued mutations, oldest first
    Pending {
        /// Number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List mutations that exhausted their retries
    Failures {
        /// Number of failures to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show cached rows of a collection
    Cache {
        /// Collection name
        collection: String,
        /// Number of rows to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop the local cache so the next sync pulls everything
    ResetCache,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Create,
    Update,
    Delete,
}

impl From<KindArg> for OperationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Create => Self::Create,
            KindArg::Update => Self::Update,
            KindArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
