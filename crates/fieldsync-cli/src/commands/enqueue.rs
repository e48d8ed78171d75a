use std::path::Path;
use std::sync::Arc;

use fieldsync_core::clock::SystemClock;
use fieldsync_core::config::ClientConfig;
use fieldsync_core::{OperationKind, OperationQueue, PendingOperation};

use crate::commands::common::{is_remote_configured, open_store, parse_payload, short_id};
use crate::commands::sync::run_sync;
use crate::error::CliError;

pub async fn enqueue_operation(
    kind: OperationKind,
    collection: &str,
    raw_payload: &str,
    db_path: &Path,
) -> Result<PendingOperation, CliError> {
    let payload = parse_payload(raw_payload)?;
    let store = open_store(db_path)?;
    let queue = OperationQueue::new(store, Arc::new(SystemClock));
    Ok(queue.enqueue(kind, collection, payload).await?)
}

pub async fn run_enqueue(
    kind: OperationKind,
    collection: &str,
    raw_payload: &str,
    no_sync: bool,
    db_path: &Path,
    config: &ClientConfig,
) -> Result<(), CliError> {
    let operation = enqueue_operation(kind, collection, raw_payload, db_path).await?;
    println!(
        "Queued {} on {} ({})",
        operation.kind,
        operation.collection,
        short_id(&operation.id.to_string())
    );

    if no_sync {
        return Ok(());
    }
    if !is_remote_configured(config)? {
        println!("Sync not configured; the operation stays queued");
        return Ok(());
    }

    run_sync(db_path, config).await
}
