//! Pending operation queue repository

use crate::error::{Error, Result};
use crate::models::{OperationId, PendingOperation};
use rusqlite::{params, Connection, OptionalExtension};

const SELECT_COLUMNS: &str = "seq, id, kind, collection, payload, enqueued_at, next_attempt_at, \
                              retry_count, last_error";

/// Trait for queue storage operations
pub trait OperationQueueRepository {
    /// Append an operation, returning it with its assigned sequence number
    fn insert(&self, operation: &PendingOperation) -> Result<PendingOperation>;

    /// Get an operation by ID
    fn get(&self, id: &OperationId) -> Result<Option<PendingOperation>>;

    /// All pending operations ordered by next attempt, then enqueue time, then sequence
    fn list_by_next_attempt(&self) -> Result<Vec<PendingOperation>>;

    /// Pending operations in enqueue order, at most `limit`
    fn list_oldest(&self, limit: usize) -> Result<Vec<PendingOperation>>;

    /// Record a failed attempt
    fn reschedule(
        &self,
        id: &OperationId,
        retry_count: u32,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<()>;

    /// Remove an operation
    fn delete(&self, id: &OperationId) -> Result<()>;

    /// Number of queued operations
    fn count(&self) -> Result<usize>;
}

/// `SQLite` implementation of `OperationQueueRepository`
pub struct SqliteOperationQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteOperationQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an operation from a database row
    fn parse_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingOperation> {
        let id: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let payload: String = row.get(4)?;

        Ok(PendingOperation {
            seq: row.get(0)?,
            id: id.parse().map_err(|error| conversion_error(1, error))?,
            kind: kind.parse().map_err(|error: String| conversion_error(2, error))?,
            collection: row.get(3)?,
            payload: serde_json::from_str(&payload).map_err(|error| conversion_error(4, error))?,
            enqueued_at: row.get(5)?,
            next_attempt_at: row.get(6)?,
            retry_count: row.get(7)?,
            last_error: row.get(8)?,
        })
    }
}

pub(crate) fn conversion_error(
    column: usize,
    error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, error.into())
}

impl OperationQueueRepository for SqliteOperationQueueRepository<'_> {
    fn insert(&self, operation: &PendingOperation) -> Result<PendingOperation> {
        self.conn.execute(
            "INSERT INTO pending_operations
                (id, kind, collection, payload, enqueued_at, next_attempt_at, retry_count, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                operation.id.as_str(),
                operation.kind.as_str(),
                operation.collection,
                serde_json::to_string(&operation.payload)?,
                operation.enqueued_at,
                operation.next_attempt_at,
                operation.retry_count,
                operation.last_error,
            ],
        )?;

        let mut stored = operation.clone();
        stored.seq = self.conn.last_insert_rowid();
        Ok(stored)
    }

    fn get(&self, id: &OperationId) -> Result<Option<PendingOperation>> {
        let operation = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM pending_operations WHERE id = ?"),
                params![id.as_str()],
                Self::parse_operation,
            )
            .optional()?;
        Ok(operation)
    }

    fn list_by_next_attempt(&self) -> Result<Vec<PendingOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM pending_operations
             ORDER BY next_attempt_at ASC, enqueued_at ASC, seq ASC"
        ))?;

        let operations = stmt
            .query_map([], Self::parse_operation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(operations)
    }

    fn list_oldest(&self, limit: usize) -> Result<Vec<PendingOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM pending_operations
             ORDER BY seq ASC
             LIMIT ?"
        ))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let operations = stmt
            .query_map(params![limit], Self::parse_operation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(operations)
    }

    fn reschedule(
        &self,
        id: &OperationId,
        retry_count: u32,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<()> {
        // The retry counter only moves forward
        let rows = self.conn.execute(
            "UPDATE pending_operations
             SET retry_count = ?, next_attempt_at = ?, last_error = ?
             WHERE id = ? AND retry_count <= ?",
            params![retry_count, next_attempt_at, error, id.as_str(), retry_count],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn delete(&self, id: &OperationId) -> Result<()> {
        let rows = self.conn.execute(
            "DELETE FROM pending_operations WHERE id = ?",
            params![id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_operations", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
