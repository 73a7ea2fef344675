//! `call_api` request shaping, retry loop, and coalescing wiring (spec §4.1).

use catalog_core::error::http_status;
use catalog_core::{ApiError, ErrorKind, NetworkStatistics};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::cancellation::{CancellationContext, CancellationToken};
use super::coalescing::CoalescingTable;
use super::retry::RetrySettings;
use super::transport::{Method, NetworkRequest, NetworkResponse, Transport};

/// Supplies the bearer token for `Authorization` headers. An empty token is
/// treated as an `AUTH` failure without invoking the transport (spec §4.1).
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Supplies an `apiKey` query parameter, which takes precedence over a
/// bearer token (spec §4.1).
pub trait ApiKeyProvider: Send + Sync {
    fn api_key(&self) -> Option<String>;
}

/// A single `call_api` invocation, already carrying everything needed to
/// shape the outbound request.
#[derive(Clone)]
pub struct ApiRequest {
    pub base_url: String,
    pub path: String,
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: bytes::Bytes,
    pub content_type: Option<String>,
}

/// Wraps a [`Transport`] with retry/backoff, request coalescing, and
/// cancellation, per spec §4.1.
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    retry: RetrySettings,
    coalescing: Arc<CoalescingTable>,
    default_headers: BTreeMap<String, String>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    api_key_provider: Option<Arc<dyn ApiKeyProvider>>,
}

impl HttpClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, retry: RetrySettings) -> Self {
        Self {
            transport,
            retry,
            coalescing: Arc::new(CoalescingTable::new()),
            default_headers: BTreeMap::new(),
            token_provider: None,
            api_key_provider: None,
        }
    }

    #[must_use]
    pub fn with_default_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.default_headers = headers;
        self
    }

    #[must_use]
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_api_key_provider(mut self, provider: Arc<dyn ApiKeyProvider>) -> Self {
        self.api_key_provider = Some(provider);
        self
    }

    fn shape(&self, request: &ApiRequest) -> Result<NetworkRequest, ApiError> {
        let mut query = request.query.clone();

        let mut headers = self.default_headers.clone();
        for (k, v) in &request.headers {
            headers.insert(k.clone(), v.clone());
        }
        if let Some(content_type) = &request.content_type {
            if !content_type.is_empty() {
                headers.insert("Content-Type".to_string(), content_type.clone());
            }
        }

        if let Some(api_key_provider) = &self.api_key_provider {
            if let Some(api_key) = api_key_provider.api_key() {
                query.push(("apiKey".to_string(), api_key));
            }
        } else if let Some(token_provider) = &self.token_provider {
            match token_provider.token() {
                Some(token) if !token.is_empty() => {
                    headers.insert("Authorization".to_string(), format!("Bearer {token}"));
                }
                _ => return Err(ApiError::new(ErrorKind::AuthenticationError, http_status::AUTH, "empty bearer token")),
            }
        }

        let mut url = format!("{}{}", request.base_url, request.path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&urlencode_query(&query));
        }

        Ok(NetworkRequest {
            method: request.method,
            url,
            headers,
            body: request.body.clone(),
        })
    }

    /// Executes `request`, retrying per [`RetrySettings`] and coalescing
    /// concurrent identical GETs, until success, exhaustion, timeout, or
    /// cancellation.
    pub async fn call_api(
        &self,
        request: ApiRequest,
        cancel: CancellationContext,
    ) -> Result<(i32, BTreeMap<String, String>, bytes::Bytes, NetworkStatistics), ApiError> {
        let shaped = match self.shape(&request) {
            Ok(shaped) => shaped,
            Err(err) => return Err(err),
        };

        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ApiError::cancelled());
            }
            if started.elapsed() > Duration::from_secs(self.retry.timeout_sec) {
                return Err(ApiError::new(ErrorKind::NetworkConnection, http_status::TIMEOUT, "retry budget exceeded"));
            }

            let response =
                CoalescingTable::send(&self.coalescing, Arc::clone(&self.transport), shaped.clone(), cancel.token())
                    .await;

            if response.is_success() {
                return Ok((response.status, response.headers, response.body, response.stats));
            }

            let retryable = self.retry.should_retry(&response) && attempt < self.retry.max_attempts;
            if !retryable {
                return Err(response_to_error(response));
            }

            debug!(attempt, status = response.status, "retrying call_api");
            let backoff = self.retry.backoff_for_attempt(attempt);
            tokio::select! {
                biased;
                () = cancel.token().cancelled() => {
                    return Err(ApiError::cancelled());
                }
                () = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

fn response_to_error(response: NetworkResponse) -> ApiError {
    let message = String::from_utf8_lossy(&response.body).into_owned();
    if response.status < 0 {
        warn!(status = response.status, "transport-level failure");
    }
    ApiError::from_http(response.status, message)
}

fn urlencode_query(query: &[(String, String)]) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedTransport {
        responses: std::sync::Mutex<Vec<NetworkResponse>>,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, _request: NetworkRequest, _cancel: CancellationToken) -> NetworkResponse {
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn ok_response() -> NetworkResponse {
        NetworkResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: bytes::Bytes::from_static(b"{}"),
            stats: NetworkStatistics::default(),
        }
    }

    fn server_error() -> NetworkResponse {
        NetworkResponse {
            status: 503,
            headers: BTreeMap::new(),
            body: bytes::Bytes::from_static(b"unavailable"),
            stats: NetworkStatistics::default(),
        }
    }

    fn request() -> ApiRequest {
        ApiRequest {
            base_url: "https://example.test".to_string(),
            path: "/v1/thing".to_string(),
            method: Method::Get,
            query: vec![],
            headers: BTreeMap::new(),
            body: bytes::Bytes::new(),
            content_type: None,
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let transport = Arc::new(FixedTransport {
            responses: std::sync::Mutex::new(vec![server_error(), server_error(), ok_response()]),
        });
        let mut retry = RetrySettings::default();
        retry.initial_backdown_ms = 1;
        let client = HttpClient::new(transport, retry);
        let result = client.call_api(request(), CancellationContext::new()).await.unwrap();
        assert_eq!(result.0, 200);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let transport = Arc::new(FixedTransport {
            responses: std::sync::Mutex::new(vec![server_error(), server_error(), server_error()]),
        });
        let mut retry = RetrySettings::default();
        retry.max_attempts = 3;
        retry.initial_backdown_ms = 1;
        let client = HttpClient::new(transport, retry);
        let err = client.call_api(request(), CancellationContext::new()).await.unwrap_err();
        assert_eq!(err.kind, catalog_core::ErrorKind::ServiceUnavailable);
    }

    #[tokio::test]
    async fn empty_bearer_token_fails_without_calling_transport() {
        struct Empty;
        impl TokenProvider for Empty {
            fn token(&self) -> Option<String> {
                Some(String::new())
            }
        }
        let transport = Arc::new(FixedTransport {
            responses: std::sync::Mutex::new(vec![]),
        });
        let client = HttpClient::new(transport, RetrySettings::default()).with_token_provider(Arc::new(Empty));
        let err = client.call_api(request(), CancellationContext::new()).await.unwrap_err();
        assert_eq!(err.kind, catalog_core::ErrorKind::AuthenticationError);
    }

    #[test]
    fn api_key_is_appended_to_query_string() {
        struct Fixed;
        impl ApiKeyProvider for Fixed {
            fn api_key(&self) -> Option<String> {
                Some("secret".to_string())
            }
        }
        let transport: Arc<dyn Transport> = Arc::new(FixedTransport {
            responses: std::sync::Mutex::new(vec![]),
        });
        let client = HttpClient::new(transport, RetrySettings::default()).with_api_key_provider(Arc::new(Fixed));
        let shaped = client.shape(&request()).unwrap();
        assert!(shaped.url.contains("apiKey=secret"));
    }
}
