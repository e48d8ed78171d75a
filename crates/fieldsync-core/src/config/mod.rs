//! Client configuration file and environment overrides.
//!
//! A `ClientConfig` is read from a JSON file, then environment variables
//! override individual fields. The result is split into the remote endpoint
//! settings and the engine settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::remote::PostgrestConfig;
use crate::sync::{BackoffPolicy, SyncConfig};
use crate::util::{is_collection_name, is_http_url, normalize_text_option};

pub const ENV_REMOTE_URL: &str = "FIELDSYNC_REMOTE_URL";
pub const ENV_API_KEY: &str = "FIELDSYNC_API_KEY";
pub const ENV_ACCESS_TOKEN: &str = "FIELDSYNC_ACCESS_TOKEN";
pub const ENV_COLLECTIONS: &str = "FIELDSYNC_COLLECTIONS";

/// Client settings as stored on disk.
///
/// Unset fields fall back to the engine and transport defaults.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub id_field: Option<String>,
    #[serde(default)]
    pub updated_at_field: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub base_delay_secs: Option<u64>,
    #[serde(default)]
    pub max_delay_secs: Option<u64>,
    #[serde(default)]
    pub fail_fast_on_permanent: bool,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("remote_url", &self.remote_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("collections", &self.collections)
            .field("id_field", &self.id_field)
            .field("updated_at_field", &self.updated_at_field)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("base_delay_secs", &self.base_delay_secs)
            .field("max_delay_secs", &self.max_delay_secs)
            .field("fail_fast_on_permanent", &self.fail_fast_on_permanent)
            .finish()
    }
}

impl ClientConfig {
    /// Parse a configuration document.
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))
    }

    /// Read a configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(payload) => Self::parse(&payload)
                .map_err(|error| Error::Config(format!("{}: {error}", path.display()))),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at {}", path.display());
                Ok(Self::default())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Override fields from `lookup`, typically the process environment.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = normalize_text_option(lookup(ENV_REMOTE_URL)) {
            self.remote_url = Some(url);
        }
        if let Some(key) = normalize_text_option(lookup(ENV_API_KEY)) {
            self.api_key = Some(key);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_ACCESS_TOKEN)) {
            self.access_token = Some(token);
        }
        if let Some(collections) = normalize_text_option(lookup(ENV_COLLECTIONS)) {
            self.collections = collections
                .split(',')
                .filter_map(|name| normalize_text_option(Some(name.to_string())))
                .collect();
        }
        self
    }

    /// Override fields from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Remote endpoint settings, or `None` when no remote URL is configured.
    pub fn remote_config(&self) -> Result<Option<PostgrestConfig>> {
        let Some(url) = normalize_text_option(self.remote_url.clone()) else {
            return Ok(None);
        };
        if !is_http_url(&url) {
            return Err(Error::Config(
                "remote_url must include http:// or https://".to_string(),
            ));
        }
        let api_key = normalize_text_option(self.api_key.clone()).ok_or_else(|| {
            Error::Config(format!(
                "api_key is required when remote_url is set (or set {ENV_API_KEY})"
            ))
        })?;

        let mut config = PostgrestConfig::new(url, api_key).with_columns(
            self.id_field(),
            self.updated_at_field(),
        );
        if let Some(token) = normalize_text_option(self.access_token.clone()) {
            config = config.with_access_token(token);
        }
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs.max(1)));
        }
        Ok(Some(config))
    }

    /// Engine settings.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        for collection in &self.collections {
            if !is_collection_name(collection) {
                return Err(Error::Config(format!(
                    "collection '{collection}' must be a plain identifier"
                )));
            }
        }

        let mut backoff = BackoffPolicy::new(self.max_retries.unwrap_or(5).max(1));
        if let Some(secs) = self.base_delay_secs {
            backoff = backoff.with_base_delay(Duration::from_secs(secs));
        }
        if let Some(secs) = self.max_delay_secs {
            backoff = backoff.with_max_delay(Duration::from_secs(secs));
        }

        Ok(SyncConfig::new()
            .with_tracked_collections(self.collections.iter().cloned())
            .with_fields(self.id_field(), self.updated_at_field())
            .with_backoff(backoff)
            .with_fail_fast_on_permanent(self.fail_fast_on_permanent))
    }

    fn id_field(&self) -> String {
        normalize_text_option(self.id_field.clone()).unwrap_or_else(|| "id".to_string())
    }

    fn updated_at_field(&self) -> String {
        normalize_text_option(self.updated_at_field.clone())
            .unwrap_or_else(|| "updated_at".to_string())
    }
}
