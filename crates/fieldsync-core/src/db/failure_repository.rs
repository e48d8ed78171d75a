//! Quarantined operation repository

use crate::error::Result;
use crate::models::{PendingOperation, SyncFailure};
use rusqlite::{params, Connection};

use super::queue_repository::conversion_error;

/// `SQLite` storage for terminal sync failures
pub struct SqliteFailureRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteFailureRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record a quarantined operation
    pub fn insert(
        &self,
        operation: &PendingOperation,
        retry_count: u32,
        error: &str,
        failed_at: i64,
    ) -> Result<SyncFailure> {
        self.conn.execute(
            "INSERT INTO sync_failures
                (operation_id, kind, collection, payload, error, retry_count, failed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                operation.id.as_str(),
                operation.kind.as_str(),
                operation.collection,
                serde_json::to_string(&operation.payload)?,
                error,
                retry_count,
                failed_at,
            ],
        )?;

        Ok(SyncFailure {
            id: self.conn.last_insert_rowid(),
            operation_id: operation.id,
            kind: operation.kind,
            collection: operation.collection.clone(),
            payload: operation.payload.clone(),
            error: error.to_string(),
            retry_count,
            failed_at,
        })
    }

    /// Most recent failures first
    pub fn list(&self, limit: usize) -> Result<Vec<SyncFailure>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, operation_id, kind, collection, payload, error, retry_count, failed_at
             FROM sync_failures
             ORDER BY failed_at DESC, id DESC
             LIMIT ?",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let failures = stmt
            .query_map(params![limit], |row| {
                let operation_id: String = row.get(1)?;
                let kind: String = row.get(2)?;
                let payload: String = row.get(4)?;
                Ok(SyncFailure {
                    id: row.get(0)?,
                    operation_id: operation_id
                        .parse()
                        .map_err(|error| conversion_error(1, error))?,
                    kind: kind
                        .parse()
                        .map_err(|error: String| conversion_error(2, error))?,
                    collection: row.get(3)?,
                    payload: serde_json::from_str(&payload)
                        .map_err(|error| conversion_error(4, error))?,
                    error: row.get(5)?,
                    retry_count: row.get(6)?,
                    failed_at: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(failures)
    }

    /// Number of recorded failures
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_failures", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
