use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

/// Unbounded multi-producer multi-consumer queue feeding the workers.
///
/// Push and pop never block. Consumers that find it empty park on
/// [`WorkQueue::wait_for_work`], which wakes on the next push or on close
/// and is bounded by an idle timeout so a missed wake-up only costs latency.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: SegQueue<T>,
    closed: AtomicBool,
    work_available: Notify,
    drained: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: SegQueue::new(),
            closed: AtomicBool::new(false),
            work_available: Notify::new(),
            drained: Notify::new(),
        }
    }

    pub fn push(&self, item: T) {
        self.items.push(item);
        self.work_available.notify_one();
    }

    pub fn pop(&self) -> Option<T> {
        let item = self.items.pop();
        if item.is_some() && self.items.is_empty() {
            self.drained.notify_waiters();
        }
        item
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Marks input as finished and wakes every parked consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.work_available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Parks until a push or close, or until `idle_wait` elapses.
    pub async fn wait_for_work(&self, idle_wait: Duration) {
        let _ = timeout(idle_wait, self.work_available.notified()).await;
    }

    /// Resolves when a pop empties the queue.
    pub async fn drained(&self) {
        self.drained.notified().await;
    }
}
