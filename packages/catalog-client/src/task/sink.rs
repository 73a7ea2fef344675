//! Priority-ordered task scheduler (spec §4.7).
//!
//! Wraps a small pool of `tokio` worker tasks. Jobs are ordered by
//! priority (higher first), FIFO within a priority tier.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

use super::pending::PendingRequests;
use crate::http::cancellation::{CancellationContext, CancellationToken};

/// Scheduling priority (spec §4.7): higher numeric value runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low = 100,
    Normal = 500,
    High = 1000,
}

struct QueuedTask {
    priority: Priority,
    seq: u64,
    cancel: CancellationToken,
    job: BoxFuture<'static, ()>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedTask {}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority first; within a
        // priority, lower `seq` (older) should pop first, so we reverse
        // the sequence comparison.
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A user-provided thread pool abstraction (spec §4.7: "wraps a
/// user-provided thread pool, or runs inline if none"). The `tokio`
/// runtime's own executor plays this role here; `worker_count` controls
/// how many jobs run concurrently.
pub struct TaskSink {
    queue: Arc<Mutex<BinaryHeap<QueuedTask>>>,
    notify: Arc<Notify>,
    seq: AtomicU64,
    closed: Arc<AtomicBool>,
    pending: Arc<PendingRequests>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskSink {
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        let queue = Arc::new(Mutex::new(BinaryHeap::new()));
        let notify = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));
        let pending = PendingRequests::new();

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let queue = Arc::clone(&queue);
                let notify = Arc::clone(&notify);
                let closed = Arc::clone(&closed);
                tokio::spawn(async move { worker_loop(queue, notify, closed).await })
            })
            .collect();

        Self {
            queue,
            notify,
            seq: AtomicU64::new(0),
            closed,
            pending,
            workers,
        }
    }

    /// Submits `job` (which must internally invoke its own callback) at
    /// `priority`. If `context` is `None`, a fresh one is created. Returns
    /// the token the caller can use to cancel the task before or during
    /// execution.
    pub fn add_task<F>(&self, job: F, priority: Priority, context: Option<CancellationContext>) -> CancellationToken
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let ctx = context.unwrap_or_default();
        let (guard_token, guard) = self.pending.register();
        let external_token = ctx.token();

        if self.closed.load(AtomicOrdering::Acquire) {
            ctx.cancel();
            return external_token;
        }

        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let wrapped: BoxFuture<'static, ()> = Box::pin(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                () = ctx.token().cancelled() => {}
                () = job => {}
            }
        });

        self.queue.lock().push(QueuedTask {
            priority,
            seq,
            cancel: guard_token,
            job: wrapped,
        });
        self.notify.notify_one();
        external_token
    }

    #[must_use]
    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// Marks the sink closed (rejecting new tasks), then -- without
    /// holding any lock -- cancels every pending task and waits for them
    /// to drain (spec §4.7: avoids deadlock on re-entrant `add_task`).
    pub async fn shutdown(self) {
        self.closed.store(true, AtomicOrdering::Release);
        self.notify.notify_waiters();
        self.pending.cancel_all_and_wait().await;
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(queue: Arc<Mutex<BinaryHeap<QueuedTask>>>, notify: Arc<Notify>, closed: Arc<AtomicBool>) {
    loop {
        let task = queue.lock().pop();
        match task {
            Some(task) => {
                if task.cancel.is_cancelled() {
                    continue;
                }
                task.job.await;
            }
            None => {
                if closed.load(AtomicOrdering::Acquire) {
                    return;
                }
                notify.notified().await;
            }
        }
    }
}

#[allow(dead_code)]
fn log_priority_drop(priority: Priority) {
    warn!(?priority, "task dropped without running");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Mutex as AsyncMutex;

    #[tokio::test]
    async fn higher_priority_tasks_run_first() {
        let sink = TaskSink::new(1);
        let order = Arc::new(AsyncMutex::new(Vec::new()));
        let started = Arc::new(Notify::new());

        // Block the single worker until all three tasks are enqueued.
        let gate = Arc::new(AsyncMutex::new(()));
        let gate_permit = gate.lock().await;
        {
            let gate = Arc::clone(&gate);
            let started = Arc::clone(&started);
            sink.add_task(
                async move {
                    started.notify_one();
                    let _g = gate.lock().await;
                },
                Priority::Low,
                None,
            );
        }
        started.notified().await;

        for (label, priority) in [("normal", Priority::Normal), ("high", Priority::High), ("low2", Priority::Low)] {
            let order = Arc::clone(&order);
            sink.add_task(
                async move {
                    order.lock().await.push(label);
                },
                priority,
                None,
            );
        }

        drop(gate_permit);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let order = order.lock().await.clone();
        assert_eq!(order, vec!["high", "normal", "low2"]);
    }

    #[tokio::test]
    async fn cancelling_before_run_skips_job() {
        let sink = TaskSink::new(0);
        let ran = Arc::new(AtomicU32::new(0));
        let ran2 = Arc::clone(&ran);
        let ctx = CancellationContext::new();
        ctx.cancel();
        sink.add_task(
            async move {
                ran2.fetch_add(1, AtomicOrdering::SeqCst);
            },
            Priority::Normal,
            Some(ctx),
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
    }
}
