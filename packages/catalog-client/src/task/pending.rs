//! Shared registry of in-flight task contexts, for bulk cancellation on
//! shutdown (spec §4.7).

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::http::cancellation::{CancellationContext, CancellationToken};

struct Entry {
    ctx: CancellationContext,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

/// Registry of every task currently running. `cancel_all` cancels every
/// member's context; `cancel_all_and_wait` additionally blocks until each
/// has finished its callback.
#[derive(Default)]
pub struct PendingRequests {
    entries: DashMap<Uuid, Entry>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new in-flight task, returning the token it should poll
    /// for cancellation and a guard that deregisters it (and signals
    /// completion to any waiter) when dropped.
    pub fn register(self: &Arc<Self>) -> (CancellationToken, PendingGuard) {
        let ctx = CancellationContext::new();
        let token = ctx.token();
        let (done_tx, done_rx) = oneshot::channel();
        let id = Uuid::new_v4();
        self.entries.insert(
            id,
            Entry {
                ctx,
                done_rx: Mutex::new(Some(done_rx)),
            },
        );
        (
            token,
            PendingGuard {
                id,
                registry: Arc::clone(self),
                done_tx: Some(done_tx),
            },
        )
    }

    pub fn cancel_all(&self) {
        for entry in &self.entries {
            entry.ctx.cancel();
        }
    }

    /// Cancels every pending task, then waits for each to report
    /// completion. Per spec §4.7, callers must not hold any lock the
    /// cancelled tasks might need to re-enter while awaiting this.
    pub async fn cancel_all_and_wait(&self) {
        self.cancel_all();
        let receivers: Vec<oneshot::Receiver<()>> = self
            .entries
            .iter()
            .filter_map(|entry| entry.done_rx.lock().take())
            .collect();
        for rx in receivers {
            let _ = rx.await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deregisters its task on drop and wakes anyone blocked in
/// `cancel_all_and_wait`.
pub struct PendingGuard {
    id: Uuid,
    registry: Arc<PendingRequests>,
    done_tx: Option<oneshot::Sender<()>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.done_tx.take() {
            let _ = tx.send(());
        }
        self.registry.entries.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_all_and_wait_blocks_until_guard_drops() {
        let registry = PendingRequests::new();
        let (token, guard) = registry.register();
        assert_eq!(registry.len(), 1);

        let registry2 = Arc::clone(&registry);
        let waiter = tokio::spawn(async move {
            registry2.cancel_all_and_wait().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(token.is_cancelled());
        drop(guard);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(registry.is_empty());
    }
}
