//! Remote collection service boundary.
//!
//! The sync engine only needs four capabilities from the hosted backend:
//! insert, update by id, delete by id, and a range-filtered select on the
//! last-modified column.

mod memory;
mod postgrest;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::{InMemoryRemote, RemoteCall};
pub use postgrest::{PostgrestConfig, PostgrestRemote};

/// Errors reported by a remote collection service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Connection could not be established or was interrupted
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// 5xx response
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// 4xx response
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// The operation cannot be expressed as a request (missing id, bad collection name)
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Response body could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether retrying the same request cannot succeed.
    ///
    /// Timeouts (408) and rate limiting (429) are 4xx responses that are still
    /// worth retrying.
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => !matches!(status, 408 | 429),
            Self::InvalidOperation(_) => true,
            Self::Network(_) | Self::Timeout | Self::Server { .. } | Self::InvalidResponse(_) => {
                false
            }
        }
    }

    /// Build an error from an HTTP status and response body
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status >= 500 {
            Self::Server { status, message }
        } else {
            Self::Rejected { status, message }
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else if let Some(status) = error.status() {
            Self::from_status(status.as_u16(), error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

/// Result type for remote calls
pub type RemoteResult<T> = Result<T, RemoteError>;

/// A hosted collection service addressed by collection name and row id.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Insert a new row
    async fn insert(&self, collection: &str, payload: &Value) -> RemoteResult<()>;

    /// Update the row with the given id
    async fn update_by_id(&self, collection: &str, id: &str, payload: &Value) -> RemoteResult<()>;

    /// Delete the row with the given id
    async fn delete_by_id(&self, collection: &str, id: &str) -> RemoteResult<()>;

    /// Rows modified at or after `since` (Unix ms), oldest first.
    ///
    /// `None` selects the whole collection.
    async fn select_updated_since(
        &self,
        collection: &str,
        since: Option<i64>,
    ) -> RemoteResult<Vec<Value>>;
}
