//! fieldsync-core - Core library for fieldsync
//!
//! This crate contains the offline operation queue, the local durable store,
//! the remote collection boundary, and the sync engine that replays queued
//! mutations and mirrors remote collections for offline reads.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{CachedRow, OperationId, OperationKind, PendingOperation, SyncFailure};
pub use services::{LocalStore, OfflineSync, SyncStatus};
pub use sync::{
    BackoffPolicy, ConnectivityMonitor, OperationQueue, PullOutcome, SyncConfig, SyncEngine,
    SyncReport, SyncState, TriggerOutcome,
};
