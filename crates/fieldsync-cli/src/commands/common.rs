use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use fieldsync_core::config::ClientConfig;
use fieldsync_core::remote::PostgrestRemote;
use fieldsync_core::util::compact_text;
use fieldsync_core::{
    CachedRow, ConnectivityMonitor, LocalStore, OfflineSync, PendingOperation, PullOutcome,
    SyncFailure, SyncReport,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct PendingItem {
    pub id: String,
    pub kind: String,
    pub collection: String,
    pub payload: Value,
    pub enqueued_at: i64,
    pub next_attempt_at: i64,
    pub next_attempt_iso: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FailureItem {
    pub id: i64,
    pub operation_id: String,
    pub kind: String,
    pub collection: String,
    pub payload: Value,
    pub error: String,
    pub retry_count: u32,
    pub failed_at: i64,
    pub failed_at_iso: String,
}

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub db_path: String,
    pub remote_configured: bool,
    pub tracked_collections: Vec<String>,
    pub pending: usize,
    pub failures: usize,
    pub last_successful_sync: Option<i64>,
    pub last_successful_sync_iso: Option<String>,
    pub watermark: Option<i64>,
}

pub fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    Ok(LocalStore::open_path(db_path)?)
}

/// Sync subsystem for a CLI run: always online, no background triggers.
pub fn open_offline_sync(db_path: &Path, config: &ClientConfig) -> Result<OfflineSync, CliError> {
    let Some(remote_config) = config.remote_config()? else {
        return Err(CliError::SyncNotConfigured);
    };
    let remote = PostgrestRemote::new(remote_config)?;
    let sync_config = config.sync_config()?.with_auto_sync(false);

    Ok(OfflineSync::new(
        open_store(db_path)?,
        Arc::new(remote),
        ConnectivityMonitor::new(true),
        sync_config,
    ))
}

pub fn is_remote_configured(config: &ClientConfig) -> Result<bool, CliError> {
    Ok(config.remote_config()?.is_some())
}

/// Parse a JSON object payload. `-` reads it from piped stdin.
pub fn parse_payload(raw: &str) -> Result<Value, CliError> {
    let text = if raw.trim() == "-" {
        read_piped_stdin()?
            .ok_or_else(|| CliError::InvalidPayload("no payload on stdin".to_string()))?
    } else {
        raw.to_string()
    };

    let value: Value = serde_json::from_str(&text)
        .map_err(|error| CliError::InvalidPayload(format!("not valid JSON: {error}")))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CliError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ))
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    let trimmed = buffer.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

pub fn pending_to_item(operation: &PendingOperation) -> PendingItem {
    PendingItem {
        id: operation.id.to_string(),
        kind: operation.kind.to_string(),
        collection: operation.collection.clone(),
        payload: operation.payload.clone(),
        enqueued_at: operation.enqueued_at,
        next_attempt_at: operation.next_attempt_at,
        next_attempt_iso: format_timestamp(operation.next_attempt_at),
        retry_count: operation.retry_count,
        last_error: operation.last_error.clone(),
    }
}

pub fn failure_to_item(failure: &SyncFailure) -> FailureItem {
    FailureItem {
        id: failure.id,
        operation_id: failure.operation_id.to_string(),
        kind: failure.kind.to_string(),
        collection: failure.collection.clone(),
        payload: failure.payload.clone(),
        error: failure.error.clone(),
        retry_count: failure.retry_count,
        failed_at: failure.failed_at,
        failed_at_iso: format_timestamp(failure.failed_at),
    }
}

pub fn format_pending_lines(operations: &[PendingOperation]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    operations
        .iter()
        .map(|operation| {
            let short_id = short_id(&operation.id.to_string());
            let payload = payload_preview(&operation.payload, 40);
            let due = if operation.is_due(now_ms) {
                "due".to_string()
            } else {
                format!("retry {}", format_timestamp(operation.next_attempt_at))
            };
            let line = format!(
                "{short_id:<13}  {:<6}  {:<16}  {payload:<40}  {due}",
                operation.kind, operation.collection
            );
            match &operation.last_error {
                Some(error) => format!("{line}  (tries={}, {error})", operation.retry_count),
                None => line,
            }
        })
        .collect()
}

pub fn format_failure_lines(failures: &[SyncFailure]) -> Vec<String> {
    failures
        .iter()
        .map(|failure| {
            format!(
                "{}  {:<6}  {:<16}  op={}  tries={}  {}",
                format_timestamp(failure.failed_at),
                failure.kind,
                failure.collection,
                short_id(&failure.operation_id.to_string()),
                failure.retry_count,
                failure.error
            )
        })
        .collect()
}

pub fn format_cache_lines(rows: &[CachedRow]) -> Vec<String> {
    rows.iter()
        .map(|row| {
            let updated = row
                .remote_updated_at
                .map_or_else(|| "-".to_string(), format_timestamp);
            format!(
                "{:<24}  {updated:<23}  {}",
                row.row_id,
                payload_preview(&row.data, 60)
            )
        })
        .collect()
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Pushed: {} applied, {} rescheduled, {} quarantined, {} deferred",
        report.applied, report.rescheduled, report.quarantined, report.deferred
    )];
    if report.aborted_offline {
        lines.push("Went offline during sync; remaining operations stay queued".to_string());
    }
    lines.push(match &report.pull {
        PullOutcome::Skipped => "Pull: skipped".to_string(),
        PullOutcome::Completed { rows, watermark } => {
            format!("Pull: {rows} rows cached (watermark {})", format_timestamp(*watermark))
        }
        PullOutcome::Failed { collection, error } => {
            format!("Pull: failed on '{collection}': {error}")
        }
    });
    lines
}

pub fn payload_preview(payload: &Value, max_chars: usize) -> String {
    let rendered = compact_text(&payload.to_string());
    if rendered.chars().count() <= max_chars {
        rendered
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = rendered.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
