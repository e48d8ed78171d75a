//! Append-only operation queue.

use std::sync::Arc;

use serde_json::Value;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{OperationKind, PendingOperation};
use crate::services::LocalStore;
use crate::util::is_collection_name;

/// Records client mutations durably; never talks to the network.
#[derive(Clone)]
pub struct OperationQueue {
    store: LocalStore,
    clock: Arc<dyn Clock>,
}

impl OperationQueue {
    /// Queue writing into `store`, timestamped by `clock`
    pub fn new(store: LocalStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append a mutation, due immediately with no retries.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        collection: &str,
        payload: Value,
    ) -> Result<PendingOperation> {
        let collection = collection.trim();
        if collection.is_empty() {
            return Err(Error::InvalidInput(
                "collection name cannot be empty".to_string(),
            ));
        }
        if !is_collection_name(collection) {
            return Err(Error::InvalidInput(format!(
                "collection name '{collection}' must be a plain identifier"
            )));
        }

        let operation = PendingOperation::new(kind, collection, payload, self.clock.now_millis());
        let stored = self.store.enqueue(&operation).await?;
        tracing::debug!(
            operation_id = %stored.id,
            seq = stored.seq,
            kind = %stored.kind,
            collection = %stored.collection,
            "Enqueued operation"
        );
        Ok(stored)
    }

    /// Oldest operations in enqueue order
    pub async fn oldest(&self, limit: usize) -> Result<Vec<PendingOperation>> {
        self.store.oldest_operations(limit).await
    }

    /// Number of queued operations
    pub async fn len(&self) -> Result<usize> {
        self.store.pending_count().await
    }

    /// Whether nothing is waiting
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
