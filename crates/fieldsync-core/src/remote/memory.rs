//! In-process remote service with fault injection.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{RemoteError, RemoteResult, RemoteService};
use crate::clock::{Clock, SystemClock};
use crate::util::{id_field, millis_to_rfc3339, timestamp_field_millis};

/// A call received by [`InMemoryRemote`], recorded whether or not it succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// `insert`
    Insert {
        /// Target collection
        collection: String,
        /// Row id from the payload, if any
        id: Option<String>,
    },
    /// `update_by_id`
    Update {
        /// Target collection
        collection: String,
        /// Target row
        id: String,
    },
    /// `delete_by_id`
    Delete {
        /// Target collection
        collection: String,
        /// Target row
        id: String,
    },
    /// `select_updated_since`
    Select {
        /// Source collection
        collection: String,
        /// Lower bound passed by the caller
        since: Option<i64>,
    },
}

impl RemoteCall {
    /// Whether this call mutates remote state
    pub const fn is_write(&self) -> bool {
        !matches!(self, Self::Select { .. })
    }

    /// Collection the call addressed
    pub fn collection(&self) -> &str {
        match self {
            Self::Insert { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. }
            | Self::Select { collection, .. } => collection,
        }
    }
}

#[derive(Debug, Clone)]
struct Fault {
    collection: Option<String>,
    remaining: Option<u32>,
    error: RemoteError,
}

impl Fault {
    fn matches(&self, collection: &str) -> bool {
        self.collection.as_deref().is_none_or(|c| c == collection)
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, BTreeMap<String, Value>>,
    calls: Vec<RemoteCall>,
    write_faults: Vec<Fault>,
    select_faults: Vec<Fault>,
    latency: Duration,
}

/// Remote service backed by in-memory tables.
///
/// Writes stamp `updated_at` with the remote's clock, so sharing a
/// [`ManualClock`](crate::clock::ManualClock) with the engine gives fully
/// deterministic pulls.
#[derive(Clone)]
pub struct InMemoryRemote {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    id_field: String,
    updated_at_field: String,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    /// Empty remote using the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty remote stamping rows with `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
            id_field: "id".to_string(),
            updated_at_field: "updated_at".to_string(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Fail the next `count` writes with `error`
    pub fn fail_next_writes(&self, count: u32, error: RemoteError) {
        self.state().write_faults.push(Fault {
            collection: None,
            remaining: Some(count),
            error,
        });
    }

    /// Fail every write until [`Self::clear_faults`] is called
    pub fn fail_all_writes(&self, error: RemoteError) {
        self.state().write_faults.push(Fault {
            collection: None,
            remaining: None,
            error,
        });
    }

    /// Fail every write to one collection
    pub fn fail_writes_to(&self, collection: &str, error: RemoteError) {
        self.state().write_faults.push(Fault {
            collection: Some(collection.to_string()),
            remaining: None,
            error,
        });
    }

    /// Fail the next `count` selects with `error`
    pub fn fail_next_selects(&self, count: u32, error: RemoteError) {
        self.state().select_faults.push(Fault {
            collection: None,
            remaining: Some(count),
            error,
        });
    }

    /// Fail every select from one collection
    pub fn fail_selects_from(&self, collection: &str, error: RemoteError) {
        self.state().select_faults.push(Fault {
            collection: Some(collection.to_string()),
            remaining: None,
            error,
        });
    }

    /// Remove every injected fault
    pub fn clear_faults(&self) {
        let mut state = self.state();
        state.write_faults.clear();
        state.select_faults.clear();
    }

    /// Put a row directly into a table, bypassing faults and the call log.
    ///
    /// Rows without `updated_at` are stamped with the current time.
    pub fn seed_row(&self, collection: &str, row: Value) -> Option<String> {
        let id = id_field(&row, &self.id_field)?;
        let updated_at = timestamp_field_millis(&row, &self.updated_at_field);
        let row = self.stamp(row, updated_at);
        self.state()
            .tables
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), row);
        Some(id)
    }

    /// Rows of a collection ordered by id
    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.state()
            .tables
            .get(collection)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One row by id
    pub fn row(&self, collection: &str, id: &str) -> Option<Value> {
        self.state()
            .tables
            .get(collection)
            .and_then(|table| table.get(id).cloned())
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    /// Number of write calls received so far
    pub fn write_call_count(&self) -> usize {
        self.state().calls.iter().filter(|call| call.is_write()).count()
    }

    /// Forget the call log
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn stamp(&self, row: Value, updated_at: Option<i64>) -> Value {
        let mut object = match row {
            Value::Object(object) => object,
            other => {
                let mut object = Map::new();
                object.insert("value".to_string(), other);
                object
            }
        };
        let millis = updated_at.unwrap_or_else(|| self.clock.now_millis());
        object.insert(
            self.updated_at_field.clone(),
            Value::String(millis_to_rfc3339(millis)),
        );
        Value::Object(object)
    }

    /// Log the call, then consume a matching fault if one is armed.
    async fn begin(&self, call: RemoteCall) -> RemoteResult<()> {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        let collection = call.collection().to_string();
        let faults = if call.is_write() {
            &mut state.write_faults
        } else {
            &mut state.select_faults
        };

        let mut injected = None;
        if let Some(index) = faults.iter().position(|fault| fault.matches(&collection)) {
            let fault = &mut faults[index];
            injected = Some(fault.error.clone());
            if let Some(remaining) = fault.remaining.as_mut() {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    faults.remove(index);
                }
            }
        }

        state.calls.push(call);
        injected.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl RemoteService for InMemoryRemote {
    async fn insert(&self, collection: &str, payload: &Value) -> RemoteResult<()> {
        let id = id_field(payload, &self.id_field);
        self.begin(RemoteCall::Insert {
            collection: collection.to_string(),
            id: id.clone(),
        })
        .await?;

        let id = id.unwrap_or_else(|| Uuid::now_v7().to_string());
        let mut row = self.stamp(payload.clone(), None);
        if let Value::Object(object) = &mut row {
            object
                .entry(self.id_field.clone())
                .or_insert_with(|| Value::String(id.clone()));
        }

        let mut state = self.state();
        let table = state.tables.entry(collection.to_string()).or_default();
        if table.contains_key(&id) {
            return Err(RemoteError::Rejected {
                status: 409,
                message: format!("duplicate key value violates unique constraint ({id})"),
            });
        }
        table.insert(id, row);
        Ok(())
    }

    async fn update_by_id(&self, collection: &str, id: &str, payload: &Value) -> RemoteResult<()> {
        self.begin(RemoteCall::Update {
            collection: collection.to_string(),
            id: id.to_string(),
        })
        .await?;

        let now = self.clock.now_millis();
        let updated_at_field = self.updated_at_field.clone();
        let mut state = self.state();
        // PATCH semantics: filter matching nothing is not an error
        if let Some(Value::Object(existing)) = state
            .tables
            .get_mut(collection)
            .and_then(|table| table.get_mut(id))
        {
            if let Value::Object(changes) = payload {
                for (key, value) in changes {
                    existing.insert(key.clone(), value.clone());
                }
            }
            existing.insert(updated_at_field, Value::String(millis_to_rfc3339(now)));
        }
        Ok(())
    }

    async fn delete_by_id(&self, collection: &str, id: &str) -> RemoteResult<()> {
        self.begin(RemoteCall::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        })
        .await?;

        if let Some(table) = self.state().tables.get_mut(collection) {
            table.remove(id);
        }
        Ok(())
    }

    async fn select_updated_since(
        &self,
        collection: &str,
        since: Option<i64>,
    ) -> RemoteResult<Vec<Value>> {
        self.begin(RemoteCall::Select {
            collection: collection.to_string(),
            since,
        })
        .await?;

        let state = self.state();
        let mut rows: Vec<(i64, Value)> = state
            .tables
            .get(collection)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter_map(|row| {
                let updated_at = timestamp_field_millis(row, &self.updated_at_field)?;
                since
                    .is_none_or(|since| updated_at >= since)
                    .then(|| (updated_at, row.clone()))
            })
            .collect();
        rows.sort_by_key(|(updated_at, _)| *updated_at);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn remote_at(millis: i64) -> (InMemoryRemote, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(millis));
        (InMemoryRemote::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn insert_stamps_updated_at_and_rejects_duplicates() {
        let (remote, _clock) = remote_at(1_000);
        remote.insert("orders", &json!({"id": "o1"})).await.unwrap();

        let row = remote.row("orders", "o1").unwrap();
        assert_eq!(timestamp_field_millis(&row, "updated_at"), Some(1_000));

        let err = remote
            .insert("orders", &json!({"id": "o1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn update_merges_and_restamps() {
        let (remote, clock) = remote_at(1_000);
        remote
            .insert("orders", &json!({"id": "o1", "total": 5, "note": "a"}))
            .await
            .unwrap();
        clock.set(2_000);
        remote
            .update_by_id("orders", "o1", &json!({"total": 7}))
            .await
            .unwrap();

        let row = remote.row("orders", "o1").unwrap();
        assert_eq!(row["total"], json!(7));
        assert_eq!(row["note"], json!("a"));
        assert_eq!(timestamp_field_millis(&row, "updated_at"), Some(2_000));

        remote
            .update_by_id("orders", "missing", &json!({"total": 1}))
            .await
            .unwrap();
        assert!(remote.row("orders", "missing").is_none());
    }

    #[tokio::test]
    async fn select_includes_rows_stamped_at_since() {
        let (remote, clock) = remote_at(1_000);
        remote.insert("orders", &json!({"id": "c"})).await.unwrap();
        clock.set(2_000);
        remote.insert("orders", &json!({"id": "b"})).await.unwrap();
        clock.set(3_000);
        remote.insert("orders", &json!({"id": "a"})).await.unwrap();

        let all = remote.select_updated_since("orders", None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|row| row["id"].clone()).collect();
        assert_eq!(ids, vec![json!("c"), json!("b"), json!("a")]);

        let newer = remote
            .select_updated_since("orders", Some(2_000))
            .await
            .unwrap();
        let ids: Vec<_> = newer.iter().map(|row| row["id"].clone()).collect();
        assert_eq!(ids, vec![json!("b"), json!("a")]);
    }

    #[tokio::test]
    async fn counted_faults_expire() {
        let remote = InMemoryRemote::new();
        remote.fail_next_writes(2, RemoteError::Timeout);

        assert!(remote.insert("orders", &json!({"id": "1"})).await.is_err());
        assert!(remote.insert("orders", &json!({"id": "1"})).await.is_err());
        assert!(remote.insert("orders", &json!({"id": "1"})).await.is_ok());
        assert_eq!(remote.write_call_count(), 3);
    }

    #[tokio::test]
    async fn collection_faults_leave_other_collections_alone() {
        let remote = InMemoryRemote::new();
        remote.fail_writes_to("orders", RemoteError::Network("down".into()));
        remote.fail_selects_from("markets", RemoteError::Timeout);

        assert!(remote.delete_by_id("orders", "1").await.is_err());
        assert!(remote.delete_by_id("markets", "1").await.is_ok());
        assert!(remote.select_updated_since("orders", None).await.is_ok());
        assert!(remote.select_updated_since("markets", None).await.is_err());

        remote.clear_faults();
        assert!(remote.delete_by_id("orders", "1").await.is_ok());
    }

    #[tokio::test]
    async fn seed_row_bypasses_call_log() {
        let remote = InMemoryRemote::new();
        let id = remote.seed_row(
            "markets",
            json!({"id": 9, "name": "Kumasi", "updated_at": "2026-01-01T00:00:00Z"}),
        );

        assert_eq!(id.as_deref(), Some("9"));
        assert!(remote.calls().is_empty());
        assert_eq!(
            remote.row("markets", "9").unwrap()["updated_at"],
            json!("2026-01-01T00:00:00.000Z")
        );
    }
}
