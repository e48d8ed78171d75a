//! Pending operation model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::util::id_field;

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of mutation applied to a remote collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Insert a new row
    Create,
    /// Update a row by id
    Update,
    /// Delete a row by id
    Delete,
}

impl OperationKind {
    /// Stable lowercase name used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Whether this kind addresses an existing row by id
    #[must_use]
    pub const fn targets_existing_row(self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "insert" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind '{other}'")),
        }
    }
}

/// A client mutation waiting to be applied to the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique identifier
    pub id: OperationId,
    /// Local insertion sequence, breaks ties between equal timestamps
    pub seq: i64,
    /// Mutation kind
    pub kind: OperationKind,
    /// Remote collection name
    pub collection: String,
    /// Row payload sent to the remote service
    pub payload: Value,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Earliest time the next attempt may run (Unix ms)
    pub next_attempt_at: i64,
    /// Number of failed attempts so far
    pub retry_count: u32,
    /// Message of the most recent failure
    pub last_error: Option<String>,
}

impl PendingOperation {
    /// Create a fresh operation that is due immediately.
    ///
    /// `seq` is assigned by the store on insert.
    #[must_use]
    pub fn new(
        kind: OperationKind,
        collection: impl Into<String>,
        payload: Value,
        now_millis: i64,
    ) -> Self {
        Self {
            id: OperationId::new(),
            seq: 0,
            kind,
            collection: collection.into(),
            payload,
            enqueued_at: now_millis,
            next_attempt_at: now_millis,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Id of the remote row this operation addresses, read from `field`.
    #[must_use]
    pub fn target_id(&self, field: &str) -> Option<String> {
        id_field(&self.payload, field)
    }

    /// Whether the operation may be attempted at `now_millis`
    #[must_use]
    pub const fn is_due(&self, now_millis: i64) -> bool {
        self.next_attempt_at <= now_millis
    }
}
