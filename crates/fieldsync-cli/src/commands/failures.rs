use std::path::Path;

use crate::commands::common::{failure_to_item, format_failure_lines, open_store, FailureItem};
use crate::error::CliError;

pub async fn run_failures(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let failures = open_store(db_path)?.failures(limit).await?;

    if as_json {
        let json_items = failures
            .iter()
            .map(failure_to_item)
            .collect::<Vec<FailureItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if failures.is_empty() {
        println!("No failed operations.");
        return Ok(());
    }

    for line in format_failure_lines(&failures) {
        println!("{line}");
    }
    Ok(())
}
