//! Per-resource-name serialization with cancellation and shared-error
//! broadcast (spec §4.3's "named mutex", §4.7).

use catalog_core::ApiError;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::http::cancellation::CancellationToken;

struct NamedEntry {
    mutex: Arc<AsyncMutex<()>>,
    shared_error: SyncMutex<Option<ApiError>>,
}

/// `name -> {mutex, shared_error}` storage. Entries are created lazily and
/// kept alive for the process lifetime of the storage -- pruning an idle
/// entry would race a concurrent `lock()` discovering it, so this mirrors
/// the source SDK's refcounted-but-never-shrunk map.
#[derive(Default)]
pub struct NamedMutexStorage {
    entries: DashMap<String, Arc<NamedEntry>>,
}

impl NamedMutexStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, name: &str) -> Arc<NamedEntry> {
        Arc::clone(
            self.entries
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(NamedEntry {
                        mutex: Arc::new(AsyncMutex::new(())),
                        shared_error: SyncMutex::new(None),
                    })
                })
                .value(),
        )
    }

    /// Acquires the named mutex, integrating with `cancel`: returns
    /// `Err(cancelled)` without holding the lock if already (or while)
    /// cancelled before acquisition (spec §4.7). The returned guard holds
    /// the lock until dropped.
    pub async fn lock(&self, name: &str, cancel: CancellationToken) -> Result<NamedMutexGuard, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::cancelled());
        }
        let entry = self.entry(name);
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ApiError::cancelled()),
            permit = Arc::clone(&entry.mutex).lock_owned() => permit,
        };

        if let Some(shared) = entry.shared_error.lock().clone() {
            return Err(shared);
        }

        Ok(NamedMutexGuard {
            name: name.to_string(),
            entry,
            _permit: permit,
        })
    }

    /// Publishes a shared error on `name`'s entry so that other callers
    /// currently waiting on (or about to acquire) this name observe the
    /// same failure instead of redoing the work (spec §4.7).
    pub fn publish_error(&self, name: &str, error: ApiError) {
        let entry = self.entry(name);
        *entry.shared_error.lock() = Some(error);
    }

    pub fn clear_error(&self, name: &str) {
        if let Some(entry) = self.entries.get(name) {
            *entry.shared_error.lock() = None;
        }
    }
}

/// Held while the caller's critical section under `name` is active;
/// releases the named mutex when dropped.
pub struct NamedMutexGuard {
    name: String,
    entry: Arc<NamedEntry>,
    _permit: OwnedMutexGuard<()>,
}

impl NamedMutexGuard {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn publish_error(&self, error: ApiError) {
        *self.entry.shared_error.lock() = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::cancellation::CancellationContext;

    #[tokio::test]
    async fn concurrent_locks_on_same_name_serialize() {
        let storage = Arc::new(NamedMutexStorage::new());
        let order = Arc::new(SyncMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let storage = Arc::clone(&storage);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let ctx = CancellationContext::new();
                let _guard = storage.lock("resource", ctx.token()).await.unwrap();
                order.lock().push(i);
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(order.lock().len(), 4);
    }

    #[tokio::test]
    async fn shared_error_propagates_to_later_lockers() {
        let storage = NamedMutexStorage::new();
        let ctx = CancellationContext::new();
        storage.publish_error("resource", ApiError::not_found("gone"));
        let err = storage.lock("resource", ctx.token()).await.unwrap_err();
        assert!(matches!(err.kind, catalog_core::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn cancelled_before_lock_returns_without_acquiring() {
        let storage = NamedMutexStorage::new();
        let ctx = CancellationContext::new();
        ctx.cancel();
        let err = storage.lock("resource", ctx.token()).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
