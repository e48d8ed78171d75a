//! Drain-then-pull sync engine.
//!
//! A pass replays due queue entries against the remote service, oldest first
//! per collection, then mirrors every tracked collection into the local
//! cache starting from the stored watermark. Only one pass runs at a time per
//! engine; a trigger arriving mid-pass returns [`TriggerOutcome::AlreadyRunning`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::{ConnectivityMonitor, SyncConfig};
use crate::clock::Clock;
use crate::error::Result;
use crate::models::{OperationKind, PendingOperation};
use crate::remote::{RemoteError, RemoteResult, RemoteService};
use crate::services::LocalStore;

/// Whether a pass is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No pass in progress
    Idle,
    /// A drain or pull is in progress
    Syncing,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Syncing => f.write_str("syncing"),
        }
    }
}

/// Result of the pull phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PullOutcome {
    /// Not run because the drain was aborted
    #[default]
    Skipped,
    /// Every tracked collection was fetched; the watermark advanced
    Completed {
        /// Cached rows written
        rows: usize,
        /// New watermark (pull start time, Unix ms)
        watermark: i64,
    },
    /// A collection could not be fetched; the watermark is unchanged
    Failed {
        /// First collection that failed
        collection: String,
        /// Remote error
        error: RemoteError,
    },
}

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Operations sent to the remote service
    pub attempted: usize,
    /// Operations applied and removed from the queue
    pub applied: usize,
    /// Failed operations scheduled for another attempt
    pub rescheduled: usize,
    /// Failed operations moved to the failure table
    pub quarantined: usize,
    /// Operations left queued without an attempt this pass
    pub deferred: usize,
    /// The host went offline mid-drain
    pub aborted_offline: bool,
    /// Pull phase result
    pub pull: PullOutcome,
}

/// What a trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A full pass ran
    Completed(SyncReport),
    /// Another pass was already in progress
    AlreadyRunning,
    /// The host is offline; nothing was attempted
    Offline,
}

impl TriggerOutcome {
    /// Report of the pass, if one ran
    pub const fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::AlreadyRunning | Self::Offline => None,
        }
    }
}

struct EngineInner {
    store: LocalStore,
    remote: Arc<dyn RemoteService>,
    connectivity: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    running: AtomicBool,
}

/// Resets the running flag when the pass ends, including on error.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine over the given store and remote service
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteService>,
        connectivity: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                connectivity,
                clock,
                config,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        if self.inner.running.load(Ordering::Acquire) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Connectivity monitor consulted before every operation
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Run one drain-then-pull pass unless offline or already running.
    ///
    /// Remote failures are recorded on the operations or in the pull outcome;
    /// only local store failures are returned as errors.
    pub async fn trigger(&self) -> Result<TriggerOutcome> {
        if !self.inner.connectivity.is_online() {
            tracing::debug!("Offline, skipping sync");
            return Ok(TriggerOutcome::Offline);
        }

        let Some(_guard) = RunningGuard::acquire(&self.inner.running) else {
            tracing::debug!("Sync already in progress");
            return Ok(TriggerOutcome::AlreadyRunning);
        };

        let mut report = self.drain().await?;
        if !report.aborted_offline {
            report.pull = self.pull().await?;
        }

        tracing::info!(
            attempted = report.attempted,
            applied = report.applied,
            rescheduled = report.rescheduled,
            quarantined = report.quarantined,
            deferred = report.deferred,
            aborted_offline = report.aborted_offline,
            "Sync pass finished"
        );
        Ok(TriggerOutcome::Completed(report))
    }

    /// Spawn [`Self::trigger`] on the runtime. Errors are logged.
    pub fn trigger_in_background(&self) -> JoinHandle<Result<TriggerOutcome>> {
        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = engine.trigger().await;
            if let Err(error) = &outcome {
                tracing::error!(%error, "Background sync failed");
            }
            outcome
        })
    }

    /// Spawn a listener that runs a pass on every transition to online.
    ///
    /// Going offline does not interrupt a running pass; the drain stops by
    /// itself before the next operation.
    pub fn watch_connectivity(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let mut receiver = self.inner.connectivity.subscribe();
        tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let online = *receiver.borrow_and_update();
                if !online {
                    tracing::debug!("Went offline");
                    continue;
                }

                match engine.trigger().await {
                    Ok(outcome) => tracing::debug!(?outcome, "Reconnect sync finished"),
                    Err(error) => tracing::error!(%error, "Reconnect sync failed"),
                }
            }
        })
    }

    async fn drain(&self) -> Result<SyncReport> {
        let inner = &self.inner;
        let snapshot = inner.store.pending_operations().await?;
        let mut report = SyncReport::default();

        // Remaining operations of each collection in enqueue order
        let mut by_collection: HashMap<&str, VecDeque<&PendingOperation>> = HashMap::new();
        let mut by_seq: Vec<&PendingOperation> = snapshot.iter().collect();
        by_seq.sort_by_key(|operation| operation.seq);
        for operation in by_seq {
            by_collection
                .entry(operation.collection.as_str())
                .or_default()
                .push_back(operation);
        }
        let mut blocked: HashSet<&str> = HashSet::new();

        // The snapshot order picks which collection runs next. A collection
        // runs from its head until it is empty or blocked.
        'collections: for operation in &snapshot {
            let collection = operation.collection.as_str();
            if blocked.contains(collection) {
                continue;
            }
            let Some(remaining) = by_collection.get_mut(collection) else {
                continue;
            };

            while let Some(&head) = remaining.front() {
                if !inner.connectivity.is_online() {
                    tracing::info!("Went offline, stopping drain");
                    report.aborted_offline = true;
                    break 'collections;
                }
                if !head.is_due(inner.clock.now_millis()) {
                    blocked.insert(collection);
                    break;
                }

                report.attempted += 1;
                tracing::debug!(
                    operation_id = %head.id,
                    kind = %head.kind,
                    collection,
                    retry_count = head.retry_count,
                    "Applying operation"
                );

                match self.apply(head).await {
                    Ok(()) => {
                        inner.store.complete_operation(&head.id).await?;
                        remaining.pop_front();
                        report.applied += 1;
                    }
                    Err(error) => {
                        blocked.insert(collection);
                        self.record_failure(head, &error, &mut report).await?;
                        break;
                    }
                }
            }
        }

        report.deferred = snapshot.len() - report.attempted;
        Ok(report)
    }

    async fn apply(&self, operation: &PendingOperation) -> RemoteResult<()> {
        let remote = &self.inner.remote;
        let collection = operation.collection.as_str();

        if !operation.kind.targets_existing_row() {
            return remote.insert(collection, &operation.payload).await;
        }

        let id_field = &self.inner.config.id_field;
        let id = operation.target_id(id_field).ok_or_else(|| {
            RemoteError::InvalidOperation(format!(
                "{} payload has no '{id_field}' field",
                operation.kind
            ))
        })?;

        if operation.kind == OperationKind::Update {
            remote.update_by_id(collection, &id, &operation.payload).await
        } else {
            remote.delete_by_id(collection, &id).await
        }
    }

    async fn record_failure(
        &self,
        operation: &PendingOperation,
        error: &RemoteError,
        report: &mut SyncReport,
    ) -> Result<()> {
        let inner = &self.inner;
        let policy = &inner.config.backoff;
        let retry_count = operation.retry_count.saturating_add(1);
        let now = inner.clock.now_millis();
        let message = error.to_string();

        let fail_fast = inner.config.fail_fast_on_permanent && error.is_permanent();
        if fail_fast || policy.should_quarantine(retry_count) {
            tracing::warn!(
                operation_id = %operation.id,
                collection = %operation.collection,
                retry_count,
                permanent = error.is_permanent(),
                %error,
                "Quarantining operation"
            );
            inner
                .store
                .quarantine_operation(operation, retry_count, &message, now)
                .await?;
            report.quarantined += 1;
        } else {
            let next_attempt_at = policy.next_attempt_at(now, operation.enqueued_at, retry_count);
            tracing::warn!(
                operation_id = %operation.id,
                collection = %operation.collection,
                retry_count,
                next_attempt_at,
                %error,
                "Operation failed, rescheduling"
            );
            inner
                .store
                .reschedule_operation(&operation.id, retry_count, next_attempt_at, &message)
                .await?;
            report.rescheduled += 1;
        }
        Ok(())
    }

    async fn pull(&self) -> Result<PullOutcome> {
        let inner = &self.inner;
        let config = &inner.config;
        let started = inner.clock.now_millis();
        let since = inner.store.watermark().await?;
        let mut rows = 0;

        for collection in &config.tracked_collections {
            let batch = match inner.remote.select_updated_since(collection, since).await {
                Ok(batch) => batch,
                Err(error) => {
                    tracing::warn!(collection = %collection, %error, "Pull failed, keeping watermark");
                    return Ok(PullOutcome::Failed {
                        collection: collection.clone(),
                        error,
                    });
                }
            };

            let written = inner
                .store
                .upsert_cached_rows(
                    collection,
                    &batch,
                    &config.id_field,
                    &config.updated_at_field,
                    inner.clock.now_millis(),
                )
                .await?;
            tracing::debug!(collection = %collection, fetched = batch.len(), written, "Pulled collection");
            rows += written;
        }

        inner
            .store
            .record_successful_pull(started, inner.clock.now_millis())
            .await?;
        Ok(PullOutcome::Completed {
            rows,
            watermark: started,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::remote::InMemoryRemote;
    use crate::sync::{BackoffPolicy, OperationQueue};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        engine: SyncEngine,
        queue: OperationQueue,
        store: LocalStore,
        remote: InMemoryRemote,
        clock: Arc<ManualClock>,
    }

    fn harness(config: SyncConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = LocalStore::open_in_memory().unwrap();
        let remote = InMemoryRemote::with_clock(clock.clone());
        let engine = SyncEngine::new(
            store.clone(),
            Arc::new(remote.clone()),
            ConnectivityMonitor::new(true),
            clock.clone(),
            config,
        );
        let queue = OperationQueue::new(store.clone(), clock.clone());
        Harness {
            engine,
            queue,
            store,
            remote,
            clock,
        }
    }

    async fn run(engine: &SyncEngine) -> SyncReport {
        match engine.trigger().await.unwrap() {
            TriggerOutcome::Completed(report) => report,
            other => panic!("expected a completed pass, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_operation_waits_for_backoff() {
        let h = harness(SyncConfig::new());
        h.queue
            .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
            .await
            .unwrap();
        h.remote.fail_next_writes(1, RemoteError::Timeout);

        let report = run(&h.engine).await;
        assert_eq!(report.rescheduled, 1);

        let op = h.store.pending_operations().await.unwrap().remove(0);
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.next_attempt_at, 1_000_000 + 5 * 60 * 1_000);
        assert_eq!(op.last_error.as_deref(), Some("request timed out"));

        let report = run(&h.engine).await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.deferred, 1);

        h.clock.advance(Duration::from_secs(5 * 60));
        let report = run(&h.engine).await;
        assert_eq!(report.applied, 1);
        assert_eq!(h.store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_target_id_counts_as_failure() {
        let h = harness(SyncConfig::new().with_backoff(BackoffPolicy::immediate(5)));
        h.queue
            .enqueue(OperationKind::Delete, "orders", json!({"total": 1}))
            .await
            .unwrap();

        let report = run(&h.engine).await;
        assert_eq!(report.rescheduled, 1);
        assert_eq!(h.remote.write_call_count(), 0);

        let op = h.store.pending_operations().await.unwrap().remove(0);
        assert!(op.last_error.unwrap().contains("no 'id' field"));
    }

    #[tokio::test]
    async fn running_flag_blocks_second_trigger() {
        let h = harness(SyncConfig::new());
        let _guard = RunningGuard::acquire(&h.engine.inner.running).unwrap();

        assert_eq!(h.engine.state(), SyncState::Syncing);
        assert_eq!(h.engine.trigger().await.unwrap(), TriggerOutcome::AlreadyRunning);
    }

    #[tokio::test]
    async fn running_flag_resets_after_pass() {
        let h = harness(SyncConfig::new());
        run(&h.engine).await;
        assert_eq!(h.engine.state(), SyncState::Idle);
        run(&h.engine).await;
    }

    #[tokio::test]
    async fn pull_with_no_tracked_collections_records_sync() {
        let h = harness(SyncConfig::new());
        let report = run(&h.engine).await;

        assert_eq!(
            report.pull,
            PullOutcome::Completed {
                rows: 0,
                watermark: 1_000_000
            }
        );
        assert_eq!(h.store.last_successful_sync().await.unwrap(), Some(1_000_000));
    }

    #[test]
    fn sync_state_display() {
        assert_eq!(SyncState::Idle.to_string(), "idle");
        assert_eq!(SyncState::Syncing.to_string(), "syncing");
    }
}
