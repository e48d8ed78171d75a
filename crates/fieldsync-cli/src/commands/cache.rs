use std::path::Path;

use crate::commands::common::{format_cache_lines, open_store};
use crate::error::CliError;

pub async fn run_cache(
    collection: &str,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let rows = open_store(db_path)?.cached_rows(collection.trim(), limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No cached rows for '{}'.", collection.trim());
        return Ok(());
    }

    for line in format_cache_lines(&rows) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_reset_cache(db_path: &Path) -> Result<(), CliError> {
    let cleared = open_store(db_path)?.reset_cache().await?;
    println!("Cleared {cleared} cached rows; next sync pulls everything");
    Ok(())
}
