//! Operation queue, sync engine and connectivity tracking

mod backoff;
mod config;
mod connectivity;
mod engine;
mod queue;

pub use backoff::BackoffPolicy;
pub use config::SyncConfig;
pub use connectivity::ConnectivityMonitor;
pub use engine::{PullOutcome, SyncEngine, SyncReport, SyncState, TriggerOutcome};
pub use queue::OperationQueue;
