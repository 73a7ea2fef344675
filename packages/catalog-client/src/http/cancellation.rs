//! Cooperative cancellation (spec §4.1, §5, §9).
//!
//! A [`CancellationContext`] is the owning handle an API caller holds;
//! [`CancellationToken`] is the `Clone`-able, `Send + Sync` handle threaded
//! through tasks so they can poll (`is_cancelled`) or await (`cancelled`)
//! cancellation at each suspension point.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    on_cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Cheaply cloneable handle used by tasks to observe cancellation.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the context is cancelled. Intended for use in
    /// `tokio::select!` alongside the actual work future, per spec §5's
    /// "tasks poll `is_cancelled()` at each suspension boundary" rule
    /// generalized to an async-await callback style.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

/// Owning handle for a cancellable operation. `cancel()` sets the flag,
/// wakes every waiter, and invokes the armed callback (if any) exactly
/// once (spec §5: "`cancel()` sets `cancelled` and invokes the armed
/// function exactly once").
#[derive(Clone)]
pub struct CancellationContext {
    inner: Arc<Inner>,
}

impl CancellationContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the context. Idempotent: a second call is a no-op.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let callback = self.inner.on_cancel.lock().take();
        self.inner.notify.notify_waiters();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// "Install-or-run-immediately-if-already-cancelled" (spec §9):
    /// installs `on_cancel` to run the next time this context is
    /// cancelled, or runs it immediately if already cancelled.
    pub fn execute_or_cancelled<F>(&self, on_cancel: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_cancelled() {
            on_cancel();
            return;
        }
        let mut slot = self.inner.on_cancel.lock();
        if self.is_cancelled() {
            drop(slot);
            on_cancel();
            return;
        }
        *slot = Some(Box::new(on_cancel));
    }
}

impl Default for CancellationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn cancel_is_idempotent_and_runs_callback_once() {
        let ctx = CancellationContext::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        ctx.execute_or_cancelled(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        ctx.cancel();
        ctx.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn execute_or_cancelled_runs_immediately_if_already_cancelled() {
        let ctx = CancellationContext::new();
        ctx.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        ctx.execute_or_cancelled(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn token_cancelled_future_resolves_after_cancel() {
        let ctx = CancellationContext::new();
        let token = ctx.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });
        ctx.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("did not resolve in time")
            .unwrap();
    }

    #[test]
    fn token_reflects_context_state() {
        let ctx = CancellationContext::new();
        let token = ctx.token();
        assert!(!token.is_cancelled());
        ctx.cancel();
        assert!(token.is_cancelled());
    }
}
