//! Sync metadata repository (key/value, local only)

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

const PULL_WATERMARK: &str = "pull_watermark";
const LAST_SUCCESSFUL_SYNC: &str = "last_successful_sync";

/// `SQLite` storage for the pull watermark and sync bookkeeping
pub struct SqliteMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Boundary of already pulled remote data (Unix ms)
    pub fn watermark(&self) -> Result<Option<i64>> {
        self.get_millis(PULL_WATERMARK)
    }

    /// Advance the pull watermark
    pub fn set_watermark(&self, millis: i64) -> Result<()> {
        self.set_value(PULL_WATERMARK, &millis.to_string())
    }

    /// Time of the last sync whose pull completed (Unix ms)
    pub fn last_successful_sync(&self) -> Result<Option<i64>> {
        self.get_millis(LAST_SUCCESSFUL_SYNC)
    }

    /// Record a completed sync
    pub fn set_last_successful_sync(&self, millis: i64) -> Result<()> {
        self.set_value(LAST_SUCCESSFUL_SYNC, &millis.to_string())
    }

    /// Forget the watermark so the next pull starts from scratch
    pub fn clear_watermark(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_meta WHERE key = ?", params![PULL_WATERMARK])?;
        Ok(())
    }

    fn get_millis(&self, key: &str) -> Result<Option<i64>> {
        let value = self.get_value(key)?;
        Ok(value.and_then(|value| {
            value.parse().map_or_else(
                |_| {
                    tracing::warn!(key, value = %value, "Ignoring malformed sync metadata");
                    None
                },
                Some,
            )
        }))
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_watermark_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteMetaRepository::new(db.connection());

        assert_eq!(repo.watermark().unwrap(), None);
        repo.set_watermark(1_000).unwrap();
        repo.set_watermark(2_000).unwrap();
        assert_eq!(repo.watermark().unwrap(), Some(2_000));

        repo.clear_watermark().unwrap();
        assert_eq!(repo.watermark().unwrap(), None);
    }

    #[test]
    fn test_last_sync_independent_of_watermark() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteMetaRepository::new(db.connection());

        repo.set_last_successful_sync(5).unwrap();
        repo.clear_watermark().unwrap();
        assert_eq!(repo.last_successful_sync().unwrap(), Some(5));
    }

    #[test]
    fn test_malformed_value_reads_as_none() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteMetaRepository::new(db.connection());

        repo.set_value(PULL_WATERMARK, "not-a-number").unwrap();
        assert_eq!(repo.watermark().unwrap(), None);
    }
}
