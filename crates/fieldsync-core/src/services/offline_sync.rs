//! Composition root tying the store, queue, engine and monitor together.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::LocalStore;
use crate::clock::{Clock, SystemClock};
use crate::models::{CachedRow, OperationKind, PendingOperation, SyncFailure};
use crate::remote::RemoteService;
use crate::sync::{ConnectivityMonitor, OperationQueue, SyncConfig, SyncEngine, SyncState, TriggerOutcome};
use crate::Result;

/// Point-in-time view of the sync subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub online: bool,
    pub pending: usize,
    pub failures: usize,
    /// Unix ms of the last pass whose pull completed
    pub last_successful_sync: Option<i64>,
    /// Unix ms boundary of pulled remote data
    pub watermark: Option<i64>,
}

/// Offline-first write path and sync driver for one local store.
///
/// Construct one per store at application start and pass it by reference.
/// With auto sync enabled, enqueues and reconnects reported through
/// [`Self::set_online`] start background passes. Hosts that flip a shared
/// [`ConnectivityMonitor`] directly call [`Self::listen_for_connectivity`]
/// instead. Dropping it stops that listener.
pub struct OfflineSync {
    store: LocalStore,
    queue: OperationQueue,
    engine: SyncEngine,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineSync {
    /// Wire up a sync subsystem using the system clock
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteService>,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Self {
        Self::with_clock(store, remote, connectivity, config, Arc::new(SystemClock))
    }

    /// Wire up a sync subsystem reading time from `clock`
    pub fn with_clock(
        store: LocalStore,
        remote: Arc<dyn RemoteService>,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = OperationQueue::new(store.clone(), clock.clone());
        let engine = SyncEngine::new(store.clone(), remote, connectivity, clock, config);
        Self {
            store,
            queue,
            engine,
            listener: Mutex::new(None),
        }
    }

    /// Record a mutation locally and return without waiting for the network.
    ///
    /// With auto sync enabled and the host online, a background pass is
    /// started; its outcome is only logged.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        collection: &str,
        payload: Value,
    ) -> Result<PendingOperation> {
        let operation = self.queue.enqueue(kind, collection, payload).await?;
        if self.engine.config().auto_sync && self.engine.connectivity().is_online() {
            drop(self.engine.trigger_in_background());
        }
        Ok(operation)
    }

    /// Run a pass now and wait for it
    pub async fn sync_now(&self) -> Result<TriggerOutcome> {
        self.engine.trigger().await
    }

    /// Report host connectivity. Returns `true` when the state changed.
    ///
    /// A reconnect starts a background pass when auto sync is enabled. While
    /// the listener runs, the listener starts it instead.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.engine.connectivity().set_online(online);
        if changed && online && self.engine.config().auto_sync && !self.is_listening() {
            drop(self.engine.trigger_in_background());
        }
        changed
    }

    fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the reconnect listener if it is not already running.
    pub fn listen_for_connectivity(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *listener = Some(self.engine.watch_connectivity());
    }

    /// Counters and timestamps for display
    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            state: self.engine.state(),
            online: self.engine.connectivity().is_online(),
            pending: self.store.pending_count().await?,
            failures: self.store.failure_count().await?,
            last_successful_sync: self.store.last_successful_sync().await?,
            watermark: self.store.watermark().await?,
        })
    }

    /// Queued operations in drain order
    pub async fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        self.store.pending_operations().await
    }

    /// Quarantined operations, newest first
    pub async fn failures(&self, limit: usize) -> Result<Vec<SyncFailure>> {
        self.store.failures(limit).await
    }

    /// Cached remote rows of one collection
    pub async fn cached_rows(&self, collection: &str, limit: usize) -> Result<Vec<CachedRow>> {
        self.store.cached_rows(collection, limit).await
    }

    /// One cached remote row
    pub async fn cached_row(&self, collection: &str, row_id: &str) -> Result<Option<CachedRow>> {
        self.store.cached_row(collection, row_id).await
    }

    /// Drop every cached row and the watermark so the next pull starts over
    pub async fn reset_cache(&self) -> Result<usize> {
        self.store.reset_cache().await
    }

    /// Underlying engine
    pub const fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Underlying store
    pub const fn store(&self) -> &LocalStore {
        &self.store
    }
}

impl Drop for OfflineSync {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
        }
    }
}
