use std::path::Path;

use chrono::Utc;
use fieldsync_core::config::ClientConfig;

use crate::commands::common::{
    format_relative_time, format_timestamp, is_remote_configured, open_store, StatusItem,
};
use crate::error::CliError;

pub async fn load_status(db_path: &Path, config: &ClientConfig) -> Result<StatusItem, CliError> {
    let store = open_store(db_path)?;
    let last_successful_sync = store.last_successful_sync().await?;

    Ok(StatusItem {
        db_path: db_path.display().to_string(),
        remote_configured: is_remote_configured(config)?,
        tracked_collections: config.collections.clone(),
        pending: store.pending_count().await?,
        failures: store.failure_count().await?,
        last_successful_sync,
        last_successful_sync_iso: last_successful_sync.map(format_timestamp),
        watermark: store.watermark().await?,
    })
}

pub async fn run_status(
    as_json: bool,
    db_path: &Path,
    config: &ClientConfig,
) -> Result<(), CliError> {
    let status = load_status(db_path, config).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let last_sync = status.last_successful_sync.map_or_else(
        || "never".to_string(),
        |millis| {
            format!(
                "{} ({})",
                format_timestamp(millis),
                format_relative_time(millis, Utc::now().timestamp_millis())
            )
        },
    );
    println!("Database:    {}", status.db_path);
    println!(
        "Remote:      {}",
        if status.remote_configured { "configured" } else { "not configured" }
    );
    if !status.tracked_collections.is_empty() {
        println!("Collections: {}", status.tracked_collections.join(", "));
    }
    println!("Pending:     {}", status.pending);
    println!("Failures:    {}", status.failures);
    println!("Last sync:   {last_sync}");
    Ok(())
}
