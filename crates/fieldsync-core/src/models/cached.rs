//! Cached remote row model

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local copy of a remote row, written only by the pull phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRow {
    /// Remote collection the row belongs to
    pub collection: String,
    /// Remote row id
    pub row_id: String,
    /// Full remote row
    pub data: Value,
    /// Remote last-modified time (Unix ms), when the row carries one
    pub remote_updated_at: Option<i64>,
    /// Time the row was pulled (Unix ms)
    pub pulled_at: i64,
}
