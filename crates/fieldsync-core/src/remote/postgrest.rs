//! PostgREST (Supabase-style) remote collection client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteError, RemoteResult, RemoteService};
use crate::error::{Error, Result};
use crate::util::{compact_text, is_collection_name, is_http_url, millis_to_rfc3339, normalize_text_option};

const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Connection settings for a PostgREST endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgrestConfig {
    /// Project URL, e.g. `https://project.supabase.co`
    pub base_url: String,
    /// Public API key sent in the `apikey` header
    pub api_key: String,
    /// User access token; the API key is used as bearer when absent
    pub access_token: Option<String>,
    /// Primary key column
    pub id_column: String,
    /// Last-modified column used by pulls
    pub updated_at_column: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl PostgrestConfig {
    /// Create a configuration with default column names and timeout
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            access_token: None,
            id_column: "id".to_string(),
            updated_at_column: "updated_at".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Authenticate requests with a user access token
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = normalize_text_option(Some(token.into()));
        self
    }

    /// Override the primary key and last-modified column names
    #[must_use]
    pub fn with_columns(mut self, id_column: impl Into<String>, updated_at: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self.updated_at_column = updated_at.into();
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for PostgrestConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PostgrestConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("id_column", &self.id_column)
            .field("updated_at_column", &self.updated_at_column)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Remote service speaking the PostgREST dialect over HTTPS
#[derive(Clone)]
pub struct PostgrestRemote {
    rest_url: String,
    config: PostgrestConfig,
    client: reqwest::Client,
}

impl PostgrestRemote {
    /// Build a client, validating the endpoint and column names.
    pub fn new(config: PostgrestConfig) -> Result<Self> {
        let base_url = normalize_text_option(Some(config.base_url.clone()))
            .ok_or_else(|| Error::Config("remote base URL must not be empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(Error::Config(
                "remote base URL must include http:// or https://".to_string(),
            ));
        }
        if normalize_text_option(Some(config.api_key.clone())).is_none() {
            return Err(Error::Config("remote API key must not be empty".to_string()));
        }
        for column in [&config.id_column, &config.updated_at_column] {
            if !is_collection_name(column) {
                return Err(Error::Config(format!("invalid column name '{column}'")));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            rest_url: format!("{}/rest/v1", base_url.trim_end_matches('/')),
            config,
            client,
        })
    }

    fn collection_url(&self, collection: &str) -> RemoteResult<String> {
        if is_collection_name(collection) {
            Ok(format!("{}/{collection}", self.rest_url))
        } else {
            Err(RemoteError::InvalidOperation(format!(
                "invalid collection name '{collection}'"
            )))
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(bearer)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    fn id_filter(&self, id: &str) -> [(String, String); 1] {
        [(self.config.id_column.clone(), format!("eq.{id}"))]
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(
            status.as_u16(),
            parse_api_error(&body),
        ))
    }
}

#[async_trait]
impl RemoteService for PostgrestRemote {
    async fn insert(&self, collection: &str, payload: &Value) -> RemoteResult<()> {
        let url = self.collection_url(collection)?;
        tracing::debug!(collection, "POST {url}");

        let request = self
            .client
            .post(url)
            .header("Prefer", "return=minimal")
            .json(payload);
        self.send(request).await?;
        Ok(())
    }

    async fn update_by_id(&self, collection: &str, id: &str, payload: &Value) -> RemoteResult<()> {
        let url = self.collection_url(collection)?;
        tracing::debug!(collection, id, "PATCH {url}");

        let request = self
            .client
            .patch(url)
            .query(&self.id_filter(id))
            .header("Prefer", "return=minimal")
            .json(payload);
        self.send(request).await?;
        Ok(())
    }

    async fn delete_by_id(&self, collection: &str, id: &str) -> RemoteResult<()> {
        let url = self.collection_url(collection)?;
        tracing::debug!(collection, id, "DELETE {url}");

        let request = self
            .client
            .delete(url)
            .query(&self.id_filter(id))
            .header("Prefer", "return=minimal");
        self.send(request).await?;
        Ok(())
    }

    async fn select_updated_since(
        &self,
        collection: &str,
        since: Option<i64>,
    ) -> RemoteResult<Vec<Value>> {
        let url = self.collection_url(collection)?;
        let column = &self.config.updated_at_column;

        let mut query = vec![
            ("select".to_string(), "*".to_string()),
            ("order".to_string(), format!("{column}.asc")),
        ];
        if let Some(since) = since {
            query.push((column.clone(), format!("gte.{}", millis_to_rfc3339(since))));
        }
        tracing::debug!(collection, ?since, "GET {url}");

        let response = self.send(self.client.get(url).query(&query)).await?;
        let rows = response.json::<Vec<Value>>().await?;
        Ok(rows)
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    error: Option<String>,
    code: Option<String>,
}

fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return match payload.code {
                Some(code) => format!("{} [{}]", message.trim(), code.trim()),
                None => message.trim().to_string(),
            };
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed
    }
}
