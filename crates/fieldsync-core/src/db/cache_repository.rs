//! Cached remote row repository

use crate::error::Result;
use crate::models::CachedRow;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::queue_repository::conversion_error;

/// Trait for cached row storage operations
pub trait CacheRepository {
    /// Insert or refresh a row.
    ///
    /// Returns `false` when the stored copy is newer than `row` and was kept.
    fn upsert(&self, row: &CachedRow) -> Result<bool>;

    /// Get a cached row
    fn get(&self, collection: &str, row_id: &str) -> Result<Option<CachedRow>>;

    /// List a collection, most recently modified first
    fn list(&self, collection: &str, limit: usize) -> Result<Vec<CachedRow>>;

    /// Number of cached rows in a collection
    fn count(&self, collection: &str) -> Result<usize>;

    /// Drop every cached row
    fn clear(&self) -> Result<usize>;
}

/// `SQLite` implementation of `CacheRepository`
pub struct SqliteCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedRow> {
        let data: String = row.get(2)?;
        Ok(CachedRow {
            collection: row.get(0)?,
            row_id: row.get(1)?,
            data: serde_json::from_str::<Value>(&data)
                .map_err(|error| conversion_error(2, error))?,
            remote_updated_at: row.get(3)?,
            pulled_at: row.get(4)?,
        })
    }
}

impl CacheRepository for SqliteCacheRepository<'_> {
    fn upsert(&self, row: &CachedRow) -> Result<bool> {
        // Never let an older remote version replace a newer cached one
        let changed = self.conn.execute(
            "INSERT INTO cached_rows (collection, row_id, data, remote_updated_at, pulled_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (collection, row_id) DO UPDATE SET
                data = excluded.data,
                remote_updated_at = excluded.remote_updated_at,
                pulled_at = excluded.pulled_at
             WHERE excluded.remote_updated_at IS NULL
                OR cached_rows.remote_updated_at IS NULL
                OR excluded.remote_updated_at >= cached_rows.remote_updated_at",
            params![
                row.collection,
                row.row_id,
                serde_json::to_string(&row.data)?,
                row.remote_updated_at,
                row.pulled_at,
            ],
        )?;
        Ok(changed > 0)
    }

    fn get(&self, collection: &str, row_id: &str) -> Result<Option<CachedRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT collection, row_id, data, remote_updated_at, pulled_at
                 FROM cached_rows
                 WHERE collection = ? AND row_id = ?",
                params![collection, row_id],
                Self::parse_row,
            )
            .optional()?;
        Ok(row)
    }

    fn list(&self, collection: &str, limit: usize) -> Result<Vec<CachedRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, row_id, data, remote_updated_at, pulled_at
             FROM cached_rows
             WHERE collection = ?
             ORDER BY remote_updated_at DESC, row_id ASC
             LIMIT ?",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![collection, limit], Self::parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM cached_rows WHERE collection = ?",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM cached_rows", [])?)
    }
}
