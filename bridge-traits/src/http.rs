//! HTTP Client Abstraction
//!
//! Provides async fetch operations with bounded timeouts and an optional
//! retry policy. The presentation core only ever reads content (manifests,
//! audio envelopes, slide bodies), so the surface is deliberately small.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{BridgeError, Result};

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    /// Convenience constructor for the common case.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Parse response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON deserialization failed: {}", e))
        })
    }

    /// Get response body as UTF-8 string
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid UTF-8: {}", e)))
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (1 = no retry)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// A single-attempt policy. Dialogue content fetches use this: a missing
    /// manifest or envelope is an answer, not a condition to wait out.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Async HTTP client trait
///
/// Abstracts fetch operations so the core can run against any host transport.
/// Implementations should handle TLS, connection pooling, and honoring the
/// per-request timeout.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
///
/// async fn fetch_text(client: &dyn HttpClient) -> Result<String> {
///     let request = HttpRequest::get("https://example.com/deck/metadata.json");
///     let response = client.execute(request).await?;
///     response.text()
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails
    /// - TLS validation fails
    /// - Request times out
    /// - Maximum retries exceeded
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Execute an HTTP request with an explicit retry policy
    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        // Default implementation ignores the policy; implementations with a
        // real transport override this with backoff logic.
        let _ = policy;
        self.execute(request).await
    }
}

// ============================================================================
// StaticHttpClient (reference implementation for tests and development)
// ============================================================================

struct CannedResponse {
    status: u16,
    body: Bytes,
}

/// An in-memory [`HttpClient`] serving canned responses, for tests and
/// headless development.
///
/// URLs with no registered response fail with a transport error, which lets
/// tests distinguish "server said 404" from "network unreachable". A URL can
/// also be held open via [`StaticHttpClient::hold`] so a test can control
/// exactly when an in-flight fetch resolves.
#[derive(Default)]
pub struct StaticHttpClient {
    routes: Mutex<HashMap<String, CannedResponse>>,
    gates: Mutex<HashMap<String, watch::Receiver<bool>>>,
    requests: Mutex<Vec<String>>,
}

/// Opens the gate created by [`StaticHttpClient::hold`].
pub struct ReleaseHandle {
    tx: watch::Sender<bool>,
}

impl ReleaseHandle {
    /// Let all fetches waiting on this URL proceed.
    pub fn release(self) {
        self.tx.send_replace(true);
    }
}

impl StaticHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a canned response for a URL.
    pub fn insert(&self, url: impl Into<String>, status: u16, body: impl Into<Bytes>) {
        self.routes.lock().unwrap().insert(
            url.into(),
            CannedResponse {
                status,
                body: body.into(),
            },
        );
    }

    /// Register a canned JSON response for a URL.
    pub fn insert_json(&self, url: impl Into<String>, status: u16, value: &serde_json::Value) {
        self.insert(url, status, value.to_string());
    }

    /// Hold fetches of `url` until the returned handle is released.
    pub fn hold(&self, url: impl Into<String>) -> ReleaseHandle {
        let (tx, rx) = watch::channel(false);
        self.gates.lock().unwrap().insert(url.into(), rx);
        ReleaseHandle { tx }
    }

    /// URLs fetched so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for StaticHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.url.clone());

        let gate = self.gates.lock().unwrap().get(&request.url).cloned();
        if let Some(mut rx) = gate {
            rx.wait_for(|open| *open)
                .await
                .map_err(|_| BridgeError::OperationFailed("gate dropped".to_string()))?;
        }

        let routes = self.routes.lock().unwrap();
        match routes.get(&request.url) {
            Some(canned) => Ok(HttpResponse {
                status: canned.status,
                headers: HashMap::new(),
                body: canned.body.clone(),
            }),
            None => Err(BridgeError::OperationFailed(format!(
                "no route for {}",
                request.url
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_request_builder() {
        let request = HttpRequest::get("https://example.com")
            .header("Accept", "application/json")
            .timeout(Duration::from_secs(30));

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.url, "https://example.com");
        assert_eq!(
            request.headers.get("Accept"),
            Some(&"application/json".to_string())
        );
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn http_response_status_checks() {
        let response = HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from("test"),
        };

        assert!(response.is_success());
        assert!(!response.is_client_error());
        assert!(!response.is_server_error());
    }

    #[test]
    fn retry_policy_none_is_single_attempt() {
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }

    #[tokio::test]
    async fn static_client_serves_canned_response() {
        let client = StaticHttpClient::new();
        client.insert("https://example.com/a.json", 200, r#"{"ok":true}"#);

        let response = client
            .execute(HttpRequest::get("https://example.com/a.json"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text().unwrap(), r#"{"ok":true}"#);
        assert_eq!(client.requests(), vec!["https://example.com/a.json"]);
    }

    #[tokio::test]
    async fn static_client_unregistered_url_is_transport_error() {
        let client = StaticHttpClient::new();
        let err = client
            .execute(HttpRequest::get("https://example.com/missing"))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn static_client_hold_defers_response() {
        let client = std::sync::Arc::new(StaticHttpClient::new());
        client.insert("https://example.com/slow", 200, "late");
        let gate = client.hold("https://example.com/slow");

        let fetcher = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .execute(HttpRequest::get("https://example.com/slow"))
                    .await
            })
        };

        // The fetch is in flight but cannot resolve until released.
        tokio::task::yield_now().await;
        assert!(!fetcher.is_finished());

        gate.release();
        let response = fetcher.await.unwrap().unwrap();
        assert_eq!(response.text().unwrap(), "late");
    }
}
