//! Request coalescing (spec §4.1, §9).
//!
//! Concurrent identical GETs (same method, URL, and headers other than
//! `Authorization`) share a single transport call. Each caller subscribes
//! to a `broadcast` channel fed by whichever task is actually performing
//! the network call; the underlying call is cancelled only once every
//! subscriber has unsubscribed.

use catalog_core::error::http_status;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::cancellation::{CancellationContext, CancellationToken};
use super::transport::{Method, NetworkRequest, NetworkResponse, Transport};

/// Canonical fingerprint for the coalescing table: method + URL + sorted
/// headers, with `Authorization` excluded (spec §3: "coalesced responses
/// are broadcast by copying response bytes per subscriber"; §4.1:
/// "Coalescing excludes `Authorization` from the fingerprint").
#[must_use]
pub fn fingerprint(request: &NetworkRequest) -> String {
    let mut headers: Vec<(&String, &String)> = request
        .headers
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("authorization"))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(b.0));
    let mut out = String::new();
    out.push_str(request.method.as_str());
    out.push('\0');
    out.push_str(&request.url);
    for (k, v) in headers {
        out.push('\0');
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

/// Whether a request is eligible for coalescing: GET with an empty body
/// (spec §4.1: "Requests with non-empty body are never merged").
#[must_use]
pub fn is_coalescable(request: &NetworkRequest) -> bool {
    request.method == Method::Get && request.body.is_empty()
}

struct PendingEntry {
    sender: broadcast::Sender<NetworkResponse>,
    subscriber_count: AtomicUsize,
    cancel_ctx: CancellationContext,
}

/// Shared table of in-flight coalescable requests.
#[derive(Default)]
pub struct CoalescingTable {
    entries: DashMap<String, Arc<PendingEntry>>,
}

impl CoalescingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `request`, coalescing with any identical in-flight request.
    /// `caller_cancel` cancels only this caller's subscription; the
    /// underlying transport call is cancelled only when the last
    /// subscriber drops off.
    pub async fn send(
        table: &Arc<Self>,
        transport: Arc<dyn Transport>,
        request: NetworkRequest,
        caller_cancel: CancellationToken,
    ) -> NetworkResponse {
        if !is_coalescable(&request) {
            return transport.send(request, caller_cancel).await;
        }

        let key = fingerprint(&request);
        let (entry, is_new) = match table.entries.get(&key) {
            Some(existing) => {
                existing.subscriber_count.fetch_add(1, Ordering::AcqRel);
                (Arc::clone(existing.value()), false)
            }
            None => {
                let (sender, _) = broadcast::channel(1);
                let entry = Arc::new(PendingEntry {
                    sender,
                    subscriber_count: AtomicUsize::new(1),
                    cancel_ctx: CancellationContext::new(),
                });
                table.entries.insert(key.clone(), Arc::clone(&entry));
                (entry, true)
            }
        };

        if is_new {
            let table = Arc::clone(table);
            let key = key.clone();
            let entry = Arc::clone(&entry);
            let transport = Arc::clone(&transport);
            let token = entry.cancel_ctx.token();
            tokio::spawn(async move {
                let response = transport.send(request, token).await;
                let _ = entry.sender.send(response);
                table.entries.remove(&key);
            });
        }

        let mut receiver = entry.sender.subscribe();
        tokio::select! {
            biased;
            () = caller_cancel.cancelled() => {
                let remaining = entry.subscriber_count.fetch_sub(1, Ordering::AcqRel) - 1;
                if remaining == 0 {
                    entry.cancel_ctx.cancel();
                }
                NetworkResponse {
                    status: http_status::CANCELLED,
                    headers: std::collections::BTreeMap::new(),
                    body: bytes::Bytes::new(),
                    stats: catalog_core::NetworkStatistics::default(),
                }
            }
            received = receiver.recv() => {
                entry.subscriber_count.fetch_sub(1, Ordering::AcqRel);
                match received {
                    Ok(response) => response,
                    Err(_) => NetworkResponse {
                        status: http_status::UNKNOWN,
                        headers: std::collections::BTreeMap::new(),
                        body: bytes::Bytes::new(),
                        stats: catalog_core::NetworkStatistics::default(),
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::cancellation::CancellationContext;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct CountingTransport {
        calls: Arc<AtomicU32>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _request: NetworkRequest, _cancel: CancellationToken) -> NetworkResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            NetworkResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: bytes::Bytes::from_static(b"content"),
                stats: catalog_core::NetworkStatistics::default(),
            }
        }
    }

    fn get_request(url: &str) -> NetworkRequest {
        NetworkRequest {
            method: Method::Get,
            url: url.to_string(),
            headers: BTreeMap::new(),
            body: bytes::Bytes::new(),
        }
    }

    #[tokio::test]
    async fn three_concurrent_identical_gets_coalesce_to_one_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport: Arc<dyn Transport> = Arc::new(CountingTransport {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(50),
        });
        let table = Arc::new(CoalescingTable::new());

        let mut handles = Vec::new();
        for _ in 0..3 {
            let table = Arc::clone(&table);
            let transport = Arc::clone(&transport);
            let ctx = CancellationContext::new();
            handles.push(tokio::spawn(async move {
                CoalescingTable::send(&table, transport, get_request("https://x/y"), ctx.token()).await
            }));
        }

        let mut bodies = Vec::new();
        for h in handles {
            bodies.push(h.await.unwrap().body);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for body in bodies {
            assert_eq!(body, bytes::Bytes::from_static(b"content"));
        }
    }

    #[tokio::test]
    async fn requests_with_body_are_never_coalesced() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport: Arc<dyn Transport> = Arc::new(CountingTransport {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(1),
        });
        let table = Arc::new(CoalescingTable::new());

        let mut req = get_request("https://x/y");
        req.method = Method::Post;
        req.body = bytes::Bytes::from_static(b"payload");

        let ctx = CancellationContext::new();
        let _ = CoalescingTable::send(&table, Arc::clone(&transport), req.clone(), ctx.token()).await;
        let _ = CoalescingTable::send(&table, transport, req, ctx.token()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn different_urls_do_not_coalesce() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport: Arc<dyn Transport> = Arc::new(CountingTransport {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(1),
        });
        let table = Arc::new(CoalescingTable::new());
        let ctx = CancellationContext::new();

        let _ = CoalescingTable::send(&table, Arc::clone(&transport), get_request("https://x/a"), ctx.token()).await;
        let _ = CoalescingTable::send(&table, transport, get_request("https://x/b"), ctx.token()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
