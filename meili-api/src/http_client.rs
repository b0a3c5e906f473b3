//! HttpClient middleware used by MeiliClient
//!
//! Responsible for
//!  - handing all HTTP api requests
//!  - logging/tracing
//!  - retries and backoff (for timeouts and connection errors)
//!  - mapping http status codes to `MeiliError`

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{ClientBuilder, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use snafu::prelude::*;
use tracing::{debug, error, trace, warn};

use crate::{Result, auth::ApiKey, error::*};

/// HTTP metrics tracked using atomic counters for thread-safe access.
/// These counters are cumulative and never reset during the client's lifetime.
#[derive(Debug, Default)]
pub struct HttpMetrics {
    /// Total number of HTTP requests sent to the server
    total_requests: AtomicU64,
    /// Total number of successful responses (2xx status codes)
    successful_responses: AtomicU64,
    /// Total number of error responses (non-2xx status codes)
    errors: AtomicU64,
    /// Total number of retry attempts (connection failures, timeouts)
    retries: AtomicU64,
    /// Total bytes sent in request bodies
    bytes_sent: AtomicU64,
    /// Total bytes received in response bodies
    bytes_received: AtomicU64,
}

impl HttpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of current metrics as plain u64 values
    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_responses: self.successful_responses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    fn increment_requests(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_success(&self) {
        self.successful_responses.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of HTTP metrics with plain u64 values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpMetricsSnapshot {
    /// Total number of HTTP requests sent to the server
    pub total_requests: u64,
    /// Total number of successful responses (2xx status codes)
    pub successful_responses: u64,
    /// Total number of error responses (non-2xx status codes)
    pub errors: u64,
    /// Total number of retry attempts
    pub retries: u64,
    /// Total bytes sent in request bodies
    pub bytes_sent: u64,
    /// Total bytes received in response bodies
    pub bytes_received: u64,
}

impl std::fmt::Display for HttpMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requests={} success={} errors={} retries={} sent={} recv={}",
            self.total_requests,
            self.successful_responses,
            self.errors,
            self.retries,
            format_bytes(self.bytes_sent),
            format_bytes(self.bytes_received),
        )
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// status codes where it's ok to retry and backoff
fn retry_for_status(code: StatusCode) -> bool {
    match code {
      StatusCode::TOO_MANY_REQUESTS /* 429 */ |
      StatusCode::GATEWAY_TIMEOUT /* 504 */ |
      StatusCode::REQUEST_TIMEOUT /* 408 */ => true,
      _ => false,
    }
}

#[derive(Clone, Default)]
pub(crate) struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("body", &self.body.as_ref().map_or(0, Bytes::len))
            .finish()
    }
}

impl HttpRequest {
    /// GET request with offset/limit query parameters.
    pub(crate) fn paged(path: &str, offset: usize, limit: usize) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: vec![
                ("offset".to_string(), offset.to_string()),
                ("limit".to_string(), limit.to_string()),
            ],
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    pub client: reqwest::Client,

    /// Base URL for API requests (e.g., "http://localhost:7700"), without trailing slash
    pub base_url: String,

    pub api_key: Arc<Mutex<Option<ApiKey>>>,

    max_retries: u32,

    /// HTTP request/response metrics
    pub metrics: Arc<HttpMetrics>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder, base_url: &str, max_retries: u32) -> Result<Self> {
        let client = builder.build().context(HttpSnafu {
            method: "client-init",
            url: "",
        })?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            api_key: Arc::new(Mutex::new(None)),
            max_retries,
            metrics: Arc::new(HttpMetrics::new()),
        })
    }

    /// Returns a snapshot of current HTTP metrics
    pub fn metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Sets the API key for authenticated requests.
    pub fn set_api_key(&self, api_key: &ApiKey) {
        let mut write_key = self.api_key.lock();
        *write_key = Some(api_key.clone());
    }

    /// Clears the api key if set.
    pub fn clear_api_key(&self) {
        let mut write_key = self.api_key.lock();
        *write_key = None;
    }

    pub(crate) async fn get_request<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let req = HttpRequest {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        };
        self.send(req).await
    }

    pub(crate) async fn delete_request<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let req = HttpRequest {
            method: Method::DELETE,
            path: path.into(),
            query: Vec::new(),
            body: None,
        };
        self.send(req).await
    }

    pub(crate) async fn post_request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(with_body(Method::POST, path, body)?).await
    }

    pub(crate) async fn patch_request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(with_body(Method::PATCH, path, body)?).await
    }

    pub(crate) async fn put_request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(with_body(Method::PUT, path, body)?).await
    }

    /// This function handles all meilisearch rest api requests (http: get,post,put,patch,delete)
    /// - retries up to N(=3) times for connection failures or server timeout,
    ///   for idempotent methods only
    /// - maps http error codes into MeiliErrors
    /// - deserializes json response body into return type T
    pub(crate) async fn send<T: DeserializeOwned>(&self, req: HttpRequest) -> Result<T> {
        let mut attempt = 0u32;

        let full_url = format!("{}{}", self.base_url, req.path);
        let mut req_builder = self
            .client
            .request(req.method.clone(), &full_url)
            .query(&req.query);
        if req.body.is_some() {
            req_builder = req_builder.header(reqwest::header::CONTENT_TYPE, "application/json");
        }
        if let Some(key) = self.api_key.lock().as_ref() {
            req_builder = key.set_auth_header(req_builder);
        }

        // debug log (if tracing enabled)
        log_request(&req_builder, req.body.as_ref());

        let body_size = req.body.as_ref().map_or(0, |b| b.len() as u64);

        loop {
            let request = req_builder
                .try_clone()
                .ok_or_else(|| {
                    // try_clone with no body should never return None
                    MeiliError::Other {
                        message: "reqwest::RequestBuilder internal error".into(),
                    }
                })?
                .body(req.body.clone().unwrap_or_default());

            self.metrics.increment_requests();
            self.metrics.add_bytes_sent(body_size);

            match request.send().await {
                Ok(response) => {
                    let code = response.status();
                    match code {
                        // 2xx, including 202 (task enqueued)
                        ok if ok.is_success() => {
                            // If we fail to fully read the response, don't retry. The server might
                            // believe the request succeeded, and the request may not be idempotent.
                            let body = response.bytes().await.context(HttpSnafu {
                                method: req.method.to_string(),
                                url: req.path.clone(),
                            })?;
                            self.metrics.increment_success();
                            self.metrics.add_bytes_received(body.len() as u64);

                            log_response(&req.path, &body);

                            // deserialization failure should not be retried
                            return deserialize_json(&body);
                        }
                        StatusCode::BAD_REQUEST /* 400 */ => {
                            self.metrics.increment_errors();
                            let message = response.text().await.unwrap_or_else(|_| "BadRequest".into());
                            debug!(?code, ?message, ?req, "http");
                            return Err(MeiliError::Validation { message });
                        }
                        StatusCode::NOT_FOUND /* 404 */ | StatusCode::GONE /* 410 */ => {
                            self.metrics.increment_errors();
                            let message = response.text().await.unwrap_or_default();
                            // 404 is an expected answer for index existence checks
                            debug!(?code, ?message, ?req, "http");
                            return Err(MeiliError::NotFound {
                                kind: "resource".into(),
                                key: req.path,
                                message,
                            });
                        }
                        StatusCode::UNAUTHORIZED /* 401 */ => {
                            self.metrics.increment_errors();
                            let message = response.text().await.unwrap_or_default();
                            error!(?code, ?message, ?req, "http");
                            return Err(MeiliError::Unauthorized);
                        }
                        StatusCode::FORBIDDEN /* 403 */ => {
                            self.metrics.increment_errors();
                            let message = response.text().await.unwrap_or_default();
                            error!(?code, ?message, ?req, "http");
                            return Err(MeiliError::Forbidden);
                        }
                        _ => {
                            let message = response.text().await.unwrap_or_default();
                            error!(?code, ?req, message, attempt, "http");
                            self.metrics.increment_errors();
                            if attempt < self.max_retries
                                && retry_for_status(code)
                                && is_idempotent_method(&req.method)
                            {
                                log_and_backoff(attempt, code.to_string()).await;
                                self.metrics.increment_retries();
                                attempt += 1;
                                continue;
                            }
                            return Err(MeiliError::ApiError {
                                code: code.as_u16(),
                                method: req.method.to_string(),
                                url: req.path,
                                message,
                            });
                        }
                    }
                }
                Err(e) => {
                    error!(source=?e, ?req, "http");
                    if (e.is_connect() || e.is_timeout())
                        && is_idempotent_method(&req.method)
                        && attempt < self.max_retries
                    {
                        log_and_backoff(attempt, e.to_string()).await;
                        self.metrics.increment_retries();
                        attempt += 1;
                        continue;
                    }
                    // Other non-recoverable errors (e.g., DNS error, invalid URL, etc.)
                    self.metrics.increment_errors();
                    return Err(MeiliError::Http {
                        method: req.method.to_string(),
                        url: req.path,
                        source: e,
                    });
                }
            }
        }
    }
}

fn with_body<B: Serialize + ?Sized>(method: Method, path: &str, body: &B) -> Result<HttpRequest> {
    Ok(HttpRequest {
        method,
        path: path.into(),
        query: Vec::new(),
        body: Some(Bytes::from(
            serde_json::to_vec(body).context(SerializationSnafu)?,
        )),
    })
}

/// Strips trailing slashes so paths can be appended directly.
pub(crate) fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

// dump request
// requires RUST_LOG=meili::http_json=trace
fn log_request(builder: &reqwest::RequestBuilder, body: Option<&Bytes>) {
    if tracing::enabled!(target: "meili::http_json", tracing::Level::TRACE)
        && let Some(req) = builder.try_clone().and_then(|b| b.build().ok())
    {
        let method = req.method().as_str();
        let url = req.url();
        let body = body
            .map(|b| String::from_utf8_lossy(b).to_string())
            .unwrap_or_default();
        // don't log headers so we don't leak api key
        trace!(target: "meili::http_json", "{method} url={url} body={body}");
    }
}

// dump json response, for debugging
fn log_response(path: &str, body: &Bytes) {
    if tracing::enabled!(target: "meili::http_json", tracing::Level::TRACE) {
        trace!(target: "meili::http_json", "Response path={path} body={}",
            String::from_utf8_lossy(body)
        );
    }
}

// deserialize, reporting errors with 'serde_path_to_error', which provides
// detailed json path to the error
fn deserialize_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let mut deserializer = serde_json::Deserializer::from_slice(body);
    match serde_path_to_error::deserialize(&mut deserializer) {
        Ok(value) => Ok(value),
        Err(err) => {
            error!("Deserialization failed at {}: {}", err.path(), err);
            Err(MeiliError::Deserialization {
                source: err.into_inner(),
            })
        }
    }
}

// log attempt and sleep for exponential backoff
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
async fn log_and_backoff(attempt: u32, err: String) {
    // exponential backoff: 1s, 2s, 4s, with jitter
    let base_delay = 2u64.pow(attempt);
    let jitter = f64::from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    ) / 1_000_000_000.0;
    let jittered_delay = ((base_delay as f64) * (0.5 + jitter)).round() as u64;
    let delay = jittered_delay.max(1);
    warn!("Recoverable error {err}. Attempt {attempt}. Waiting {delay}s before retry");
    tokio::time::sleep(Duration::from_secs(delay)).await;
}

fn is_idempotent_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

#[cfg(test)]
mod tests {
    use reqwest::{Method, StatusCode};

    use super::*;

    #[test]
    fn test_retry_for_status() {
        assert!(retry_for_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(retry_for_status(StatusCode::REQUEST_TIMEOUT));
        assert!(retry_for_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!retry_for_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn post_and_patch_are_not_retried() {
        assert!(!is_idempotent_method(&Method::POST));
        assert!(!is_idempotent_method(&Method::PATCH));
        assert!(is_idempotent_method(&Method::PUT));
        assert!(is_idempotent_method(&Method::DELETE));
    }

    #[test]
    fn base_url_trailing_slash_removed() {
        assert_eq!(
            normalize_base_url("http://localhost:7700/"),
            "http://localhost:7700"
        );
        assert_eq!(
            normalize_base_url(" https://search.example.com// "),
            "https://search.example.com"
        );
    }

    #[test]
    fn paged_request_sets_offset_and_limit() {
        let req = HttpRequest::paged("/indexes/movies/documents", 2000, 1000);
        assert_eq!(req.method, Method::GET);
        assert!(req.query.contains(&("offset".to_string(), "2000".to_string())));
        assert!(req.query.contains(&("limit".to_string(), "1000".to_string())));
    }

    /// Serves one http response on a local port and returns the base url.
    async fn serve_once(response: String) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    #[test_log::test]
    async fn not_found_keeps_response_body() {
        const BODY: &str = r#"{"message":"Index `gone` not found.","code":"index_not_found"}"#;
        let base_url = serve_once(format!(
            "HTTP/1.1 404 Not Found\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{BODY}",
            BODY.len()
        ))
        .await;
        let client = HttpClient::new(reqwest::Client::builder().no_proxy(), &base_url, 0).unwrap();

        let err = client
            .get_request::<serde_json::Value>("/indexes/gone/documents")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.body_text(), BODY);
        assert!(err.to_string().contains("index_not_found"), "{err}");
        assert_eq!(client.metrics_snapshot().errors, 1);
    }

    #[test]
    fn metrics_display() {
        let snapshot = HttpMetricsSnapshot {
            total_requests: 3,
            successful_responses: 2,
            errors: 1,
            retries: 0,
            bytes_sent: 10,
            bytes_received: 2048,
        };
        assert_eq!(
            snapshot.to_string(),
            "requests=3 success=2 errors=1 retries=0 sent=10B recv=2.0KB"
        );
    }
}
