//! fieldsync CLI - operator tool for the offline operation queue
//!
//! Queue writes, replay them against the remote service, and inspect the
//! queue, the quarantine and the local cache.

mod cli;
mod commands;
mod error;
mod settings;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::cache::{run_cache, run_reset_cache};
use crate::commands::completions::run_completions;
use crate::commands::enqueue::run_enqueue;
use crate::commands::failures::run_failures;
use crate::commands::pending::run_pending;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;
use crate::settings::{load_client_config, resolve_config_path, resolve_db_path};

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
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fieldsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path)?;
    let config_path = resolve_config_path(cli.config)?;
    let config = load_client_config(&config_path)?;

    match cli.command {
        Commands::Enqueue {
            kind,
            collection,
            payload,
            no_sync,
        } => {
            run_enqueue(
                kind.into(),
                &collection,
                &payload,
                no_sync,
                &db_path,
                &config,
            )
            .await?;
        }
        Commands::Sync => run_sync(&db_path, &config).await?,
        Commands::Status { json } => run_status(json, &db_path, &config).await?,
        Commands::Pending { limit, json } => run_pending(limit, json, &db_path).await?,
        Commands::Failures { limit, json } => run_failures(limit, json, &db_path).await?,
        Commands::Cache {
            collection,
            limit,
            json,
        } => run_cache(&collection, limit, json, &db_path).await?,
        Commands::ResetCache => run_reset_cache(&db_path).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
