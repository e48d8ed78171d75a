//! Shared local store service used by the queue and the sync engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::{
    CacheRepository, Database, OperationQueueRepository, SqliteCacheRepository,
    SqliteFailureRepository, SqliteMetaRepository, SqliteOperationQueueRepository,
};
use crate::models::{CachedRow, OperationId, PendingOperation, SyncFailure};
use crate::util::{id_field, timestamp_field_millis};
use crate::Result;

/// Thread-safe handle to the durable store.
///
/// Every method runs a short synchronous `SQLite` transaction; the lock is
/// never held across network I/O.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        tracing::debug!("Opened local store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem path of the store, if on disk.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    // ------------------------------------------------------------------
    // Operation queue
    // ------------------------------------------------------------------

    /// Durably append an operation.
    pub async fn enqueue(&self, operation: &PendingOperation) -> Result<PendingOperation> {
        let db = self.db.lock().await;
        SqliteOperationQueueRepository::new(db.connection()).insert(operation)
    }

    /// Snapshot of the queue in drain order.
    pub async fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        let db = self.db.lock().await;
        SqliteOperationQueueRepository::new(db.connection()).list_by_next_attempt()
    }

    /// Oldest operations in enqueue order.
    pub async fn oldest_operations(&self, limit: usize) -> Result<Vec<PendingOperation>> {
        let db = self.db.lock().await;
        SqliteOperationQueueRepository::new(db.connection()).list_oldest(limit)
    }

    /// Number of queued operations.
    pub async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteOperationQueueRepository::new(db.connection()).count()
    }

    /// Remove an operation that was applied remotely.
    pub async fn complete_operation(&self, id: &OperationId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteOperationQueueRepository::new(db.connection()).delete(id)
    }

    /// Record a failed attempt and schedule the next one.
    pub async fn reschedule_operation(
        &self,
        id: &OperationId,
        retry_count: u32,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteOperationQueueRepository::new(db.connection()).reschedule(
            id,
            retry_count,
            next_attempt_at,
            error,
        )
    }

    /// Move an operation from the queue into the failure table atomically.
    pub async fn quarantine_operation(
        &self,
        operation: &PendingOperation,
        retry_count: u32,
        error: &str,
        failed_at: i64,
    ) -> Result<SyncFailure> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;

        let failure =
            SqliteFailureRepository::new(&tx).insert(operation, retry_count, error, failed_at)?;
        SqliteOperationQueueRepository::new(&tx).delete(&operation.id)?;

        tx.commit()?;
        Ok(failure)
    }

    // ------------------------------------------------------------------
    // Failures
    // ------------------------------------------------------------------

    /// Quarantined operations, newest first.
    pub async fn failures(&self, limit: usize) -> Result<Vec<SyncFailure>> {
        let db = self.db.lock().await;
        SqliteFailureRepository::new(db.connection()).list(limit)
    }

    /// Number of quarantined operations.
    pub async fn failure_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteFailureRepository::new(db.connection()).count()
    }

    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    /// Upsert pulled rows for one collection in a single transaction.
    ///
    /// Rows without an id are skipped. Returns the number of rows written.
    pub async fn upsert_cached_rows(
        &self,
        collection: &str,
        rows: &[Value],
        id_key: &str,
        updated_at_key: &str,
        pulled_at: i64,
    ) -> Result<usize> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let mut written = 0;

        {
            let repo = SqliteCacheRepository::new(&tx);
            for row in rows {
                let Some(row_id) = id_field(row, id_key) else {
                    tracing::warn!(collection, "Skipping pulled row without '{id_key}'");
                    continue;
                };

                let cached = CachedRow {
                    collection: collection.to_string(),
                    row_id,
                    data: row.clone(),
                    remote_updated_at: timestamp_field_millis(row, updated_at_key),
                    pulled_at,
                };
                if repo.upsert(&cached)? {
                    written += 1;
                }
            }
        }

        tx.commit()?;
        Ok(written)
    }

    /// Cached rows of a collection, most recently modified first.
    pub async fn cached_rows(&self, collection: &str, limit: usize) -> Result<Vec<CachedRow>> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).list(collection, limit)
    }

    /// A single cached row.
    pub async fn cached_row(&self, collection: &str, row_id: &str) -> Result<Option<CachedRow>> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).get(collection, row_id)
    }

    /// Number of cached rows in a collection.
    pub async fn cached_count(&self, collection: &str) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteCacheRepository::new(db.connection()).count(collection)
    }

    /// Clear every cached collection and the pull watermark.
    pub async fn reset_cache(&self) -> Result<usize> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;

        let cleared = SqliteCacheRepository::new(&tx).clear()?;
        SqliteMetaRepository::new(&tx).clear_watermark()?;

        tx.commit()?;
        tracing::info!(rows = cleared, "Cleared local cache");
        Ok(cleared)
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Current pull watermark (Unix ms).
    pub async fn watermark(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        SqliteMetaRepository::new(db.connection()).watermark()
    }

    /// Record a completed pull: advance the watermark and the last sync time together.
    pub async fn record_successful_pull(&self, watermark: i64, completed_at: i64) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;

        let meta = SqliteMetaRepository::new(&tx);
        meta.set_watermark(watermark)?;
        meta.set_last_successful_sync(completed_at)?;

        tx.commit()?;
        Ok(())
    }

    /// Time of the last fully successful sync (Unix ms).
    pub async fn last_successful_sync(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        SqliteMetaRepository::new(db.connection()).last_successful_sync()
    }
}
