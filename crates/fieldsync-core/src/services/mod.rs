//! Client-facing services

mod local_store;
mod offline_sync;

pub use local_store::LocalStore;
pub use offline_sync::{OfflineSync, SyncStatus};
