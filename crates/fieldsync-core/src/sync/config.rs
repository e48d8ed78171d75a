//! Engine configuration.

use super::BackoffPolicy;

/// Settings for a [`SyncEngine`](super::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Collections mirrored into the local cache by the pull phase
    pub tracked_collections: Vec<String>,
    /// Payload field holding the row id for update/delete
    pub id_field: String,
    /// Row field holding the remote last-modified time
    pub updated_at_field: String,
    /// Retry schedule and ceiling
    pub backoff: BackoffPolicy,
    /// Quarantine permanent remote errors on first failure
    pub fail_fast_on_permanent: bool,
    /// Trigger a background sync after each enqueue
    pub auto_sync: bool,
}

impl SyncConfig {
    /// Default configuration with no tracked collections
    pub fn new() -> Self {
        Self {
            tracked_collections: Vec::new(),
            id_field: "id".to_string(),
            updated_at_field: "updated_at".to_string(),
            backoff: BackoffPolicy::default(),
            fail_fast_on_permanent: false,
            auto_sync: true,
        }
    }

    /// Sets the collections pulled into the cache.
    #[must_use]
    pub fn with_tracked_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked_collections = collections.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the id and last-modified field names.
    #[must_use]
    pub fn with_fields(mut self, id_field: impl Into<String>, updated_at: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self.updated_at_field = updated_at.into();
        self
    }

    /// Sets the retry schedule.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Quarantine permanent errors immediately.
    #[must_use]
    pub const fn with_fail_fast_on_permanent(mut self, enabled: bool) -> Self {
        self.fail_fast_on_permanent = enabled;
        self
    }

    /// Enables or disables the background trigger after enqueue.
    #[must_use]
    pub const fn with_auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync = enabled;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
