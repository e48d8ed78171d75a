//! Data models for fieldsync

mod cached;
mod failure;
mod operation;

pub use cached::CachedRow;
pub use failure::SyncFailure;
pub use operation::{OperationId, OperationKind, PendingOperation};
