//! Meilisearch API Client
//!
//! # Creating new api client
//!
//! - [new](MeiliClient::new) - create new client for a url and key
//! - [with_config](MeiliClient::with_config) - create client with custom configuration
//! - [with_client](MeiliClient::with_client) - create client with configuration and custom reqwest client
//!
//! # Configuration
//!
//! - [get_config](MeiliClient::get_config) - returns configuration
//! - [http_metrics](MeiliClient::http_metrics) - request counters
//!

use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};
use tracing::debug;

use crate::{
    MEILI_DEFAULT_URL, Result,
    auth::ApiKey,
    config::{MAX_RETRIES, MEILI_API_KEY_ENV, MEILI_URL_ENV},
    documents::Document,
    error::MeiliError,
    http_client::{HttpClient, HttpMetricsSnapshot, HttpRequest},
    indexes::{IndexInfo, IndexList, IndexStats},
    settings::{SettingCategory, Settings},
    tasks::{Task, TaskHandle},
};

/// Configuration for the Meilisearch client.
///
/// ```rust,no_run
/// use meili::prelude::*;
/// # fn create_client() -> Result<MeiliClient, MeiliError> {
/// let config = ClientConfig::default()
///     .base_url("https://search.example.com")
///     .api_key("my-admin-key");
/// let client = MeiliClient::with_config(config)?;
/// # Ok(client)
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base url for all HTTP requests.
    /// If not provided in config, url is determined by:
    /// * The environment variable `MEILI_URL`, if defined, or
    /// * "http://127.0.0.1:7700" `meili::MEILI_DEFAULT_URL`
    pub base_url: String,

    /// Api key sent as a bearer token. Defaults to the environment variable
    /// `MEILI_API_KEY`, if defined.
    pub api_key: Option<ApiKey>,

    /// Retries for idempotent requests that hit connection errors or timeouts.
    pub max_retries: u32,

    /// Per-request timeout. None uses reqwest's default (no timeout).
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var(MEILI_URL_ENV).unwrap_or_else(|_| MEILI_DEFAULT_URL.to_string()),
            api_key: std::env::var(MEILI_API_KEY_ENV).ok().map(ApiKey::new),
            max_retries: MAX_RETRIES,
            timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..self
        }
    }

    pub fn api_key(self, api_key: impl Into<ApiKey>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..self
        }
    }

    pub fn max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }
}

/// Async client for the Meilisearch HTTP API.
#[derive(Debug, Clone)]
pub struct MeiliClient {
    pub(crate) client: Arc<HttpClient>,
    pub(crate) config: ClientConfig,
}

impl MeiliClient {
    /// Creates a client for `base_url`, authenticating with `api_key`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Self::with_config(ClientConfig::default().base_url(base_url).api_key(api_key))
    }

    /// Creates a new client with the provided configuration.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Self::with_client(builder, config)
    }

    /// Creates a client from a `reqwest::ClientBuilder` and configuration.
    /// ClientBuilder can be customized with timeouts, proxies, dns servers, user_agent, etc.
    pub fn with_client(builder: reqwest::ClientBuilder, config: ClientConfig) -> Result<Self> {
        debug!(url=?config.base_url, "new client");
        let base_url = config.base_url.trim();
        if base_url.is_empty() {
            return Err(MeiliError::Validation {
                message: "base url is empty".into(),
            });
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(MeiliError::Validation {
                message: format!("base url must start with http:// or https://: {base_url}"),
            });
        }
        let client = HttpClient::new(builder, &config.base_url, config.max_retries)?;
        if let Some(key) = config.api_key.as_ref().filter(|key| !key.is_empty()) {
            client.set_api_key(key);
        }
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    /// Returns the configuration.
    pub fn get_config(&self) -> &ClientConfig {
        &self.config
    }

    /// Base url with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        &self.client.base_url
    }

    /// Replaces the api key used for subsequent requests.
    pub fn set_api_key(&self, api_key: &ApiKey) {
        self.client.set_api_key(api_key);
    }

    /// Sends subsequent requests without an Authorization header.
    pub fn clear_api_key(&self) {
        self.client.clear_api_key();
    }

    /// Returns a snapshot of current HTTP metrics.
    pub fn http_metrics(&self) -> HttpMetricsSnapshot {
        self.client.metrics_snapshot()
    }

    pub async fn list_indexes(&self, limit: usize) -> Result<IndexList> {
        self.client
            .send(HttpRequest::paged("/indexes", 0, limit))
            .await
    }

    pub async fn get_index(&self, uid: &str) -> Result<Option<IndexInfo>> {
        match self.client.get_request(&format!("/indexes/{uid}")).await {
            Ok(info) => Ok(Some(info)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn create_index(&self, uid: &str, primary_key: Option<&str>) -> Result<TaskHandle> {
        let mut body = json!({ "uid": uid });
        if let Some(primary_key) = primary_key {
            body["primaryKey"] = Value::String(primary_key.to_string());
        }
        self.client.post_request("/indexes", &body).await
    }

    pub async fn delete_index(&self, uid: &str) -> Result<TaskHandle> {
        self.client.delete_request(&format!("/indexes/{uid}")).await
    }

    pub async fn update_primary_key(&self, uid: &str, primary_key: &str) -> Result<TaskHandle> {
        self.client
            .patch_request(
                &format!("/indexes/{uid}"),
                &json!({ "primaryKey": primary_key }),
            )
            .await
    }

    pub async fn get_settings(&self, uid: &str) -> Result<Settings> {
        self.client
            .get_request(&format!("/indexes/{uid}/settings"))
            .await
    }

    pub async fn update_settings(&self, uid: &str, settings: &Settings) -> Result<TaskHandle> {
        self.client
            .patch_request(&format!("/indexes/{uid}/settings"), settings)
            .await
    }

    pub async fn update_setting(
        &self,
        uid: &str,
        category: SettingCategory,
        value: &Value,
    ) -> Result<TaskHandle> {
        self.client
            .put_request(&format!("/indexes/{uid}/settings/{}", category.path()), value)
            .await
    }

    pub async fn get_stats(&self, uid: &str) -> Result<IndexStats> {
        self.client
            .get_request(&format!("/indexes/{uid}/stats"))
            .await
    }

    pub async fn documents_page(&self, uid: &str, offset: usize, limit: usize) -> Result<Value> {
        self.client
            .send(HttpRequest::paged(
                &format!("/indexes/{uid}/documents"),
                offset,
                limit,
            ))
            .await
    }

    pub async fn add_documents(&self, uid: &str, documents: &[Document]) -> Result<TaskHandle> {
        self.client
            .post_request(&format!("/indexes/{uid}/documents"), documents)
            .await
    }

    pub async fn get_task(&self, task_uid: u64) -> Result<Task> {
        self.client.get_request(&format!("/tasks/{task_uid}")).await
    }
}
