use std::path::Path;

use crate::commands::common::{format_pending_lines, open_store, pending_to_item, PendingItem};
use crate::error::CliError;

pub async fn run_pending(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let operations = open_store(db_path)?.oldest_operations(limit).await?;

    if as_json {
        let json_items = operations
            .iter()
            .map(pending_to_item)
            .collect::<Vec<PendingItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("No pending operations.");
        return Ok(());
    }

    for line in format_pending_lines(&operations) {
        println!("{line}");
    }
    Ok(())
}
