//! Pluggable HTTP transport (spec §4.1, §9).
//!
//! The retry/coalescing/cancellation logic in [`super::client`] is written
//! against this trait rather than against `reqwest` directly, so it can be
//! exercised with a mock transport in tests.

use async_trait::async_trait;
use bytes::Bytes;
use catalog_core::NetworkStatistics;
use std::collections::BTreeMap;

use super::cancellation::CancellationToken;

/// HTTP method. A small closed set -- this SDK only issues GETs and the
/// occasional form-encoded POST for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A network request, already fully shaped (URL, headers, body) by
/// [`super::client::HttpClient`].
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

/// A network response, or the transport-error encoding of a failure
/// (spec §4.1: `status` is either an HTTP code or a negative transport
/// error code).
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub status: i32,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub stats: NetworkStatistics,
}

impl NetworkResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstraction over the concrete HTTP stack. `reqwest`-backed in
/// production ([`ReqwestTransport`]); swappable for tests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Executes a single request. Transport-level failures (DNS, TCP
    /// reset, timeout) must be reported as a [`NetworkResponse`] with a
    /// negative `status` (see `catalog_core::error::http_status`), not as
    /// an `Err`, so the retry loop can inspect it uniformly.
    async fn send(&self, request: NetworkRequest, cancel: CancellationToken) -> NetworkResponse;
}

/// `reqwest`-backed [`Transport`] implementation.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: NetworkRequest, cancel: CancellationToken) -> NetworkResponse {
        use catalog_core::error::http_status;

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let uploaded = request.body.len() as u64;
        let send_fut = builder.send();

        tokio::select! {
            biased;
            () = cancel.cancelled() => NetworkResponse {
                status: http_status::CANCELLED,
                headers: BTreeMap::new(),
                body: Bytes::new(),
                stats: NetworkStatistics { bytes_uploaded: uploaded, bytes_downloaded: 0 },
            },
            result = send_fut => match result {
                Ok(response) => {
                    let status = i32::from(response.status().as_u16());
                    let headers = response
                        .headers()
                        .iter()
                        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                        .collect();
                    match response.bytes().await {
                        Ok(body) => NetworkResponse {
                            status,
                            headers,
                            stats: NetworkStatistics {
                                bytes_uploaded: uploaded,
                                bytes_downloaded: body.len() as u64,
                            },
                            body,
                        },
                        Err(_) => NetworkResponse {
                            status: http_status::IO,
                            headers: BTreeMap::new(),
                            body: Bytes::new(),
                            stats: NetworkStatistics { bytes_uploaded: uploaded, bytes_downloaded: 0 },
                        },
                    }
                }
                Err(err) => {
                    let status = if err.is_timeout() {
                        http_status::TIMEOUT
                    } else if err.is_connect() {
                        http_status::OFFLINE
                    } else {
                        http_status::IO
                    };
                    NetworkResponse {
                        status,
                        headers: BTreeMap::new(),
                        body: Bytes::new(),
                        stats: NetworkStatistics { bytes_uploaded: uploaded, bytes_downloaded: 0 },
                    }
                }
            },
        }
    }
}
