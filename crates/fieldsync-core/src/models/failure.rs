//! Sync failure model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{OperationId, OperationKind};

/// Operation that exhausted its retry budget and was removed from the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    /// Failure row identifier
    pub id: i64,
    /// Id of the quarantined operation
    pub operation_id: OperationId,
    /// Kind of the quarantined operation
    pub kind: OperationKind,
    /// Target collection
    pub collection: String,
    /// Payload that could not be applied
    pub payload: Value,
    /// Last error reported by the remote service
    pub error: String,
    /// Attempts made before quarantine
    pub retry_count: u32,
    /// Quarantine timestamp (Unix ms)
    pub failed_at: i64,
}
