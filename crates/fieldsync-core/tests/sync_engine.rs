//! End-to-end behaviour of the offline queue and sync engine against the
//! in-memory remote.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_core::clock::ManualClock;
use fieldsync_core::remote::{InMemoryRemote, RemoteCall, RemoteError};
use fieldsync_core::{
    BackoffPolicy, ConnectivityMonitor, LocalStore, OfflineSync, OperationKind, PullOutcome,
    SyncConfig, SyncReport, TriggerOutcome,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const START: i64 = 1_767_225_600_000;
const HOUR: Duration = Duration::from_secs(60 * 60);

struct Fixture {
    sync: OfflineSync,
    remote: InMemoryRemote,
    clock: Arc<ManualClock>,
}

fn fixture(online: bool, config: SyncConfig) -> Fixture {
    let clock = Arc::new(ManualClock::new(START));
    let remote = InMemoryRemote::with_clock(clock.clone());
    let sync = OfflineSync::with_clock(
        LocalStore::open_in_memory().expect("in-memory store"),
        Arc::new(remote.clone()),
        ConnectivityMonitor::new(online),
        config,
        clock.clone(),
    );
    Fixture {
        sync,
        remote,
        clock,
    }
}

fn manual() -> SyncConfig {
    SyncConfig::new().with_auto_sync(false)
}

async fn sync_pass(sync: &OfflineSync) -> SyncReport {
    match sync.sync_now().await.expect("sync pass") {
        TriggerOutcome::Completed(report) => report,
        other => panic!("expected a completed pass, got {other:?}"),
    }
}

async fn wait_for_empty_queue(sync: &OfflineSync) {
    for _ in 0..200 {
        if sync.store().pending_count().await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue was not drained");
}

fn write_targets(remote: &InMemoryRemote) -> Vec<String> {
    remote
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RemoteCall::Insert { id, .. } => Some(format!("create:{}", id.unwrap_or_default())),
            RemoteCall::Update { id, .. } => Some(format!("update:{id}")),
            RemoteCall::Delete { id, .. } => Some(format!("delete:{id}")),
            RemoteCall::Select { .. } => None,
        })
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn scenario_a_create_applies_immediately() {
    let f = fixture(true, manual());
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1", "total": 500}))
        .await
        .unwrap();

    let report = sync_pass(&f.sync).await;

    assert_eq!(report.applied, 1);
    assert!(f.sync.pending_operations().await.unwrap().is_empty());
    assert!(f.sync.failures(10).await.unwrap().is_empty());
    assert_eq!(f.remote.row("orders", "o1").unwrap()["total"], json!(500));
}

#[tokio::test]
async fn scenario_b_five_failures_quarantine_the_operation() {
    let f = fixture(true, manual());
    let op = f
        .sync
        .enqueue(OperationKind::Update, "orders", json!({"id": "o1", "total": 650}))
        .await
        .unwrap();
    f.remote
        .fail_all_writes(RemoteError::Network("connection refused".into()));

    for _ in 0..5 {
        sync_pass(&f.sync).await;
        f.clock.advance(HOUR);
    }

    let failures = f.sync.failures(10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].operation_id, op.id);
    assert_eq!(failures[0].retry_count, 5);
    assert_eq!(failures[0].payload, json!({"id": "o1", "total": 650}));
    assert!(failures[0].error.contains("connection refused"));
    assert!(f.sync.pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_c_offline_writes_drain_in_order_on_reconnect() {
    let f = fixture(false, SyncConfig::new());
    f.sync.listen_for_connectivity();

    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1", "total": 100}))
        .await
        .unwrap();
    f.sync
        .enqueue(OperationKind::Update, "orders", json!({"id": "o1", "total": 120}))
        .await
        .unwrap();
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o2", "total": 80}))
        .await
        .unwrap();
    assert!(f.remote.calls().is_empty());

    assert!(f.sync.set_online(true));
    wait_for_empty_queue(&f.sync).await;

    assert_eq!(
        write_targets(&f.remote),
        vec!["create:o1", "update:o1", "create:o2"]
    );
    assert_eq!(f.remote.row("orders", "o1").unwrap()["total"], json!(120));
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn bounded_retries_never_attempt_a_sixth_time() {
    let f = fixture(true, manual());
    f.sync
        .enqueue(OperationKind::Delete, "orders", json!({"id": "o9"}))
        .await
        .unwrap();
    f.remote.fail_all_writes(RemoteError::Timeout);

    let mut quarantined = 0;
    for _ in 0..8 {
        quarantined += sync_pass(&f.sync).await.quarantined;
        f.clock.advance(HOUR);
    }

    assert_eq!(quarantined, 1);
    assert_eq!(f.remote.write_call_count(), 5);
    assert_eq!(f.sync.failures(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn offline_trigger_makes_no_remote_calls() {
    let f = fixture(false, manual());
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();
    let before = f.sync.pending_operations().await.unwrap();

    let outcome = f.sync.sync_now().await.unwrap();

    assert_eq!(outcome, TriggerOutcome::Offline);
    assert!(f.remote.calls().is_empty());
    assert_eq!(f.sync.pending_operations().await.unwrap(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_run_a_single_drain() {
    let f = fixture(true, manual());
    for id in ["o1", "o2", "o3"] {
        f.sync
            .enqueue(OperationKind::Create, "orders", json!({ "id": id }))
            .await
            .unwrap();
    }
    f.remote.set_latency(Duration::from_millis(50));

    let handles: Vec<_> = (0..6)
        .map(|_| f.sync.engine().trigger_in_background())
        .collect();
    let mut applied = 0;
    let mut already_running = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            TriggerOutcome::Completed(report) => applied += report.applied,
            TriggerOutcome::AlreadyRunning => already_running += 1,
            TriggerOutcome::Offline => panic!("monitor reported offline"),
        }
    }

    assert_eq!(applied, 3);
    assert!(already_running >= 1);
    assert_eq!(f.remote.write_call_count(), 3);
    assert_eq!(
        write_targets(&f.remote),
        vec!["create:o1", "create:o2", "create:o3"]
    );
}

// ============================================================================
// Ordering and backoff
// ============================================================================

#[tokio::test]
async fn failed_head_blocks_later_operations_of_its_collection() {
    let f = fixture(true, manual());
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();
    f.sync
        .enqueue(OperationKind::Update, "orders", json!({"id": "o1", "total": 3}))
        .await
        .unwrap();
    f.remote.fail_next_writes(1, RemoteError::Timeout);

    let report = sync_pass(&f.sync).await;
    assert_eq!(report.attempted, 1);
    assert_eq!(report.rescheduled, 1);
    assert_eq!(report.deferred, 1);

    // still inside the five minute backoff window
    f.clock.advance(Duration::from_secs(60));
    let report = sync_pass(&f.sync).await;
    assert_eq!(report.attempted, 0);

    f.clock.advance(Duration::from_secs(4 * 60));
    let report = sync_pass(&f.sync).await;
    assert_eq!(report.applied, 2);
    assert_eq!(report.deferred, 0);

    assert!(f.sync.pending_operations().await.unwrap().is_empty());
    assert_eq!(
        write_targets(&f.remote),
        vec!["create:o1", "create:o1", "update:o1"]
    );
}

#[tokio::test]
async fn successor_scheduled_before_retried_head_drains_in_same_pass() {
    let f = fixture(true, manual());
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();
    f.remote.fail_next_writes(1, RemoteError::Timeout);
    assert_eq!(sync_pass(&f.sync).await.rescheduled, 1);

    // due long before the rescheduled create
    f.clock.advance(Duration::from_secs(1));
    f.sync
        .enqueue(OperationKind::Update, "orders", json!({"id": "o1", "total": 7}))
        .await
        .unwrap();

    f.clock.advance(Duration::from_secs(5 * 60));
    let report = sync_pass(&f.sync).await;

    assert_eq!(report.applied, 2);
    assert_eq!(report.deferred, 0);
    assert!(f.sync.pending_operations().await.unwrap().is_empty());
    assert_eq!(
        write_targets(&f.remote),
        vec!["create:o1", "create:o1", "update:o1"]
    );
    assert_eq!(f.remote.row("orders", "o1").unwrap()["total"], json!(7));
}

#[tokio::test]
async fn failing_collection_does_not_block_others() {
    let f = fixture(true, manual());
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();
    f.sync
        .enqueue(OperationKind::Create, "city_markets", json!({"id": "m1"}))
        .await
        .unwrap();
    f.remote
        .fail_writes_to("orders", RemoteError::from_status(503, "unavailable"));

    let report = sync_pass(&f.sync).await;

    assert_eq!(report.applied, 1);
    assert_eq!(report.rescheduled, 1);
    assert!(f.remote.row("city_markets", "m1").is_some());
    let pending = f.sync.pending_operations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].collection, "orders");
    assert!(pending[0].last_error.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn immediate_backoff_retries_on_next_pass() {
    let f = fixture(true, manual().with_backoff(BackoffPolicy::immediate(5)));
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();
    f.remote.fail_next_writes(2, RemoteError::Timeout);

    assert_eq!(sync_pass(&f.sync).await.rescheduled, 1);
    assert_eq!(sync_pass(&f.sync).await.rescheduled, 1);
    assert_eq!(sync_pass(&f.sync).await.applied, 1);
}

#[tokio::test]
async fn permanent_errors_quarantine_immediately_with_fail_fast() {
    let f = fixture(true, manual().with_fail_fast_on_permanent(true));
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();
    f.remote
        .fail_next_writes(1, RemoteError::from_status(400, "violates check constraint"));

    let report = sync_pass(&f.sync).await;

    assert_eq!(report.quarantined, 1);
    let failures = f.sync.failures(10).await.unwrap();
    assert_eq!(failures[0].retry_count, 1);
}

#[tokio::test]
async fn permanent_errors_are_retried_by_default() {
    let f = fixture(true, manual());
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();
    f.remote
        .fail_next_writes(1, RemoteError::from_status(400, "violates check constraint"));

    let report = sync_pass(&f.sync).await;

    assert_eq!(report.rescheduled, 1);
    assert!(f.sync.failures(10).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn going_offline_stops_the_drain_and_skips_pull() {
    let f = fixture(true, manual().with_tracked_collections(["orders"]));
    for id in ["o1", "o2", "o3"] {
        f.sync
            .enqueue(OperationKind::Create, "orders", json!({ "id": id }))
            .await
            .unwrap();
    }
    f.remote.set_latency(Duration::from_millis(200));

    let handle = f.sync.engine().trigger_in_background();
    tokio::time::sleep(Duration::from_millis(50)).await;
    f.sync.set_online(false);

    let outcome = handle.await.unwrap().unwrap();
    let report = outcome.report().expect("pass ran").clone();
    assert!(report.aborted_offline);
    assert_eq!(report.applied, 1);
    assert_eq!(report.pull, PullOutcome::Skipped);
    assert_eq!(f.sync.pending_operations().await.unwrap().len(), 2);
    assert_eq!(f.sync.status().await.unwrap().last_successful_sync, None);
}

// ============================================================================
// Pull
// ============================================================================

#[tokio::test]
async fn pull_mirrors_tracked_collections() {
    let f = fixture(true, manual().with_tracked_collections(["livestock", "farm_inputs"]));
    f.remote
        .seed_row("livestock", json!({"id": "cow-1", "breed": "Sanga"}));
    f.remote
        .seed_row("farm_inputs", json!({"id": 3, "name": "NPK 15-15-15"}));
    f.remote.seed_row("untracked", json!({"id": "x"}));

    let report = sync_pass(&f.sync).await;

    assert_eq!(
        report.pull,
        PullOutcome::Completed {
            rows: 2,
            watermark: START
        }
    );
    let cow = f.sync.cached_row("livestock", "cow-1").await.unwrap().unwrap();
    assert_eq!(cow.data["breed"], json!("Sanga"));
    assert_eq!(cow.remote_updated_at, Some(START));
    assert!(f.sync.cached_row("farm_inputs", "3").await.unwrap().is_some());
    assert!(f.sync.cached_rows("untracked", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn pull_uses_watermark_for_incremental_fetch() {
    let f = fixture(true, manual().with_tracked_collections(["livestock"]));
    f.remote.seed_row("livestock", json!({"id": "cow-1"}));
    sync_pass(&f.sync).await;

    f.clock.advance(Duration::from_secs(1));
    f.remote.seed_row("livestock", json!({"id": "goat-2"}));
    f.remote.clear_calls();
    let report = sync_pass(&f.sync).await;

    assert_eq!(
        f.remote.calls(),
        vec![RemoteCall::Select {
            collection: "livestock".to_string(),
            since: Some(START)
        }]
    );
    // cow-1 sits exactly on the watermark and is fetched again
    assert_eq!(
        report.pull,
        PullOutcome::Completed {
            rows: 2,
            watermark: START + 1_000
        }
    );
    assert_eq!(f.sync.cached_rows("livestock", 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn row_stamped_at_the_watermark_is_pulled_later() {
    let f = fixture(true, manual().with_tracked_collections(["livestock"]));
    sync_pass(&f.sync).await;
    assert_eq!(f.sync.status().await.unwrap().watermark, Some(START));

    // committed in the same millisecond the previous pull started
    f.remote.seed_row("livestock", json!({"id": "cow-1"}));
    f.clock.advance(Duration::from_secs(1));
    let report = sync_pass(&f.sync).await;

    assert_eq!(
        report.pull,
        PullOutcome::Completed {
            rows: 1,
            watermark: START + 1_000
        }
    );
    assert!(f.sync.cached_row("livestock", "cow-1").await.unwrap().is_some());
}

#[tokio::test]
async fn partial_pull_failure_keeps_watermark() {
    let f = fixture(true, manual().with_tracked_collections(["livestock", "city_markets"]));
    f.remote.seed_row("livestock", json!({"id": "cow-1"}));
    f.remote.seed_row("city_markets", json!({"id": "accra"}));
    f.remote.fail_selects_from("city_markets", RemoteError::Timeout);

    let report = sync_pass(&f.sync).await;

    assert_eq!(
        report.pull,
        PullOutcome::Failed {
            collection: "city_markets".to_string(),
            error: RemoteError::Timeout
        }
    );
    let status = f.sync.status().await.unwrap();
    assert_eq!(status.watermark, None);
    assert_eq!(status.last_successful_sync, None);

    f.remote.clear_faults();
    f.clock.advance(Duration::from_secs(30));
    let report = sync_pass(&f.sync).await;

    assert!(matches!(report.pull, PullOutcome::Completed { rows: 2, .. }));
    assert_eq!(f.sync.status().await.unwrap().watermark, Some(START + 30_000));
    assert!(f.sync.cached_row("city_markets", "accra").await.unwrap().is_some());
}

#[tokio::test]
async fn pushed_writes_come_back_through_pull() {
    let f = fixture(true, manual().with_tracked_collections(["orders"]));
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1", "total": 500}))
        .await
        .unwrap();

    sync_pass(&f.sync).await;

    let cached = f.sync.cached_row("orders", "o1").await.unwrap().unwrap();
    assert_eq!(cached.data["total"], json!(500));
}

#[tokio::test]
async fn reset_cache_forces_full_pull() {
    let f = fixture(true, manual().with_tracked_collections(["livestock"]));
    f.remote.seed_row("livestock", json!({"id": "cow-1"}));
    sync_pass(&f.sync).await;

    assert_eq!(f.sync.reset_cache().await.unwrap(), 1);
    f.clock.advance(Duration::from_secs(1));
    f.remote.clear_calls();
    sync_pass(&f.sync).await;

    assert_eq!(
        f.remote.calls(),
        vec![RemoteCall::Select {
            collection: "livestock".to_string(),
            since: None
        }]
    );
    assert!(f.sync.cached_row("livestock", "cow-1").await.unwrap().is_some());
}

// ============================================================================
// Background triggers
// ============================================================================

#[tokio::test]
async fn enqueue_triggers_background_sync_when_online() {
    let f = fixture(true, SyncConfig::new());
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();

    wait_for_empty_queue(&f.sync).await;
    assert!(f.remote.row("orders", "o1").is_some());
}

#[tokio::test]
async fn reconnect_without_listener_triggers_sync() {
    let f = fixture(false, SyncConfig::new());
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();
    assert!(f.remote.calls().is_empty());

    assert!(f.sync.set_online(true));
    wait_for_empty_queue(&f.sync).await;

    assert!(f.remote.row("orders", "o1").is_some());
}

#[tokio::test]
async fn reconnect_with_auto_sync_off_waits_for_manual_sync() {
    let f = fixture(false, manual());
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();

    f.sync.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(f.remote.calls().is_empty());
    assert_eq!(f.sync.status().await.unwrap().pending, 1);
}

#[tokio::test]
async fn dropping_offline_sync_stops_listener() {
    let f = fixture(false, manual());
    let monitor = f.sync.engine().connectivity().clone();
    f.sync.listen_for_connectivity();
    f.sync
        .enqueue(OperationKind::Create, "orders", json!({"id": "o1"}))
        .await
        .unwrap();
    let store = f.sync.store().clone();

    drop(f.sync);
    tokio::task::yield_now().await;
    monitor.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(f.remote.calls().is_empty());
    assert_eq!(store.pending_count().await.unwrap(), 1);
}
