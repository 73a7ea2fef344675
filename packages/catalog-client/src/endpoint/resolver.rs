//! `(catalog, api, version) -> base_url` resolution with TTL and stale-on-error
//! grace (spec §4.2).

use async_trait::async_trait;
use bytes::Bytes;
use catalog_core::error::http_status;
use catalog_core::messages::LookupResult;
use catalog_core::{ApiError, Hrn};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::http::cancellation::CancellationContext;
use crate::http::{ApiRequest, HttpClient, Method};

/// Performs the actual lookup request. Implemented by a thin wrapper over
/// [`crate::http::HttpClient`] in production; swappable in tests.
#[async_trait]
pub trait LookupService: Send + Sync {
    async fn lookup(&self, catalog: &Hrn, api: &str, version: &str) -> Result<String, ApiError>;
}

/// Production [`LookupService`]: resolves `(catalog, api, version)` against
/// the catalog-scoped lookup endpoint, `GET
/// /lookup/v1/resources/{hrn}/apis/{api}/{version}` (spec §6). Every API
/// name this client ever looks up (`metadata`, `query`, `blob`) belongs to
/// one specific catalog, so the platform-wide `/lookup/v1/platform/...`
/// endpoint, meant for services not scoped to a catalog, has no caller here.
pub struct HttpLookupService {
    http: Arc<HttpClient>,
    lookup_base_url: String,
}

impl HttpLookupService {
    #[must_use]
    pub fn new(http: Arc<HttpClient>, lookup_base_url: impl Into<String>) -> Self {
        Self {
            http,
            lookup_base_url: lookup_base_url.into(),
        }
    }
}

#[async_trait]
impl LookupService for HttpLookupService {
    async fn lookup(&self, catalog: &Hrn, api: &str, version: &str) -> Result<String, ApiError> {
        let request = ApiRequest {
            base_url: self.lookup_base_url.clone(),
            path: format!("/lookup/v1/resources/{}/apis/{api}/{version}", catalog.as_str()),
            method: Method::Get,
            query: vec![],
            headers: BTreeMap::new(),
            body: Bytes::new(),
            content_type: None,
        };
        let (_, _, body, _) = self.http.call_api(request, CancellationContext::new()).await?;
        let result: LookupResult =
            serde_json::from_slice(&body).map_err(|err| ApiError::invalid_argument(format!("malformed lookup response: {err}")))?;
        Ok(result.base_url)
    }
}

#[derive(Clone)]
struct Entry {
    base_url: String,
    fetched_at: Instant,
}

type Key = (String, String, String);

/// Caches endpoint lookups with a TTL, serving a stale entry on transport
/// error rather than failing outright, and coalescing concurrent misses for
/// the same key (spec §4.2).
pub struct EndpointResolver<L: LookupService> {
    lookup: Arc<L>,
    ttl: Duration,
    entries: DashMap<Key, Entry>,
    in_flight: DashMap<Key, Arc<AsyncMutex<()>>>,
}

impl<L: LookupService> EndpointResolver<L> {
    #[must_use]
    pub fn new(lookup: Arc<L>, ttl: Duration) -> Self {
        Self {
            lookup,
            ttl,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Resolves `(catalog, api, version)` to a base URL, refreshing on TTL
    /// expiry and falling back to a stale cached value if the refresh fails
    /// with a transport error.
    pub async fn resolve(&self, catalog: &Hrn, api: &str, version: &str) -> Result<String, ApiError> {
        let key: Key = (catalog.as_str().to_string(), api.to_string(), version.to_string());

        if let Some(entry) = self.entries.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.base_url.clone());
            }
        }

        let key_lock = Arc::clone(
            self.in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .value(),
        );
        let _guard = key_lock.lock().await;

        if let Some(entry) = self.entries.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.base_url.clone());
            }
        }

        match self.lookup.lookup(catalog, api, version).await {
            Ok(base_url) => {
                self.entries.insert(
                    key,
                    Entry {
                        base_url: base_url.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(base_url)
            }
            Err(err) if err.status < 0 || err.status == http_status::UNKNOWN => {
                if let Some(entry) = self.entries.get(&key) {
                    debug!(api, version, "endpoint lookup failed, serving stale entry");
                    return Ok(entry.base_url.clone());
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

/// Object-safe facade over [`EndpointResolver<L>`], so repositories can
/// hold `Arc<dyn EndpointResolving>` instead of propagating the
/// `LookupService` type parameter everywhere.
#[async_trait]
pub trait EndpointResolving: Send + Sync {
    async fn resolve(&self, catalog: &Hrn, api: &str, version: &str) -> Result<String, ApiError>;
}

#[async_trait]
impl<L: LookupService> EndpointResolving for EndpointResolver<L> {
    async fn resolve(&self, catalog: &Hrn, api: &str, version: &str) -> Result<String, ApiError> {
        EndpointResolver::resolve(self, catalog, api, version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingLookup {
        calls: AtomicU32,
        fail_after: u32,
    }

    #[async_trait]
    impl LookupService for CountingLookup {
        async fn lookup(&self, _catalog: &Hrn, _api: &str, _version: &str) -> Result<String, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_after {
                return Err(ApiError::new(
                    catalog_core::ErrorKind::NetworkConnection,
                    http_status::IO,
                    "offline",
                ));
            }
            Ok(format!("https://base-{n}.example.test"))
        }
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let lookup = Arc::new(CountingLookup {
            calls: AtomicU32::new(0),
            fail_after: 100,
        });
        let resolver = EndpointResolver::new(Arc::clone(&lookup), Duration::from_secs(60));
        let catalog = Hrn::new("hrn:here:data::org:catalog");
        let first = resolver.resolve(&catalog, "metadata", "v1").await.unwrap();
        let second = resolver.resolve(&catalog, "metadata", "v1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn serves_stale_entry_on_transport_error() {
        let lookup = Arc::new(CountingLookup {
            calls: AtomicU32::new(0),
            fail_after: 1,
        });
        let resolver = EndpointResolver::new(Arc::clone(&lookup), Duration::from_millis(1));
        let catalog = Hrn::new("hrn:here:data::org:catalog");
        let first = resolver.resolve(&catalog, "metadata", "v1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = resolver.resolve(&catalog, "metadata", "v1").await.unwrap();
        assert_eq!(first, second);
    }
}
