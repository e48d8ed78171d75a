use std::path::Path;

use fieldsync_core::config::ClientConfig;
use fieldsync_core::TriggerOutcome;

use crate::commands::common::{format_report_lines, open_offline_sync};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path, config: &ClientConfig) -> Result<(), CliError> {
    let sync = open_offline_sync(db_path, config)?;

    match sync.sync_now().await? {
        TriggerOutcome::Completed(report) => {
            for line in format_report_lines(&report) {
                println!("{line}");
            }
        }
        TriggerOutcome::AlreadyRunning => println!("Sync already in progress"),
        TriggerOutcome::Offline => println!("Offline; nothing was sent"),
    }
    Ok(())
}
