//! Worker pool supervision for `BulkEngine`.
//!
//! Workers are started lazily: every call to [`WorkerPool::ensure_workers`]
//! prunes finished tasks and tops the pool up while queued work exists and
//! capacity remains. The handle list is the only locked state and the lock is
//! never held across worker setup or execution.

use crate::connection::Connection;
use crate::work::worker::{Worker, WorkerShared};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

pub(crate) struct WorkerHandle {
    pub id: usize,
    pub handle: JoinHandle<()>,
}

pub(crate) struct WorkerPool<C: Connection> {
    max_workers: usize,
    shared: WorkerShared<C>,
    workers: Mutex<Vec<WorkerHandle>>,
    next_id: AtomicUsize,
}

impl<C: Connection> WorkerPool<C> {
    pub(crate) fn new(max_workers: usize, shared: WorkerShared<C>) -> Self {
        Self {
            max_workers: max_workers.max(1),
            shared,
            workers: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    pub(crate) fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Live worker tasks after pruning the finished ones.
    pub(crate) fn active_workers(&self) -> usize {
        let mut workers = self.lock_workers();
        workers.retain(|worker| !worker.handle.is_finished());
        workers.len()
    }

    /// Starts up to one worker per queued item while the pool has capacity
    /// and no stop was requested. Returns how many were started.
    pub(crate) fn ensure_workers(&self) -> usize {
        let slots = {
            let mut workers = self.lock_workers();
            workers.retain(|worker| !worker.handle.is_finished());
            self.max_workers
                .saturating_sub(workers.len())
                .min(self.shared.queue().len())
        };

        let mut started = Vec::with_capacity(slots);
        for _ in 0..slots {
            if self.shared.stop().is_halted() {
                break;
            }
            started.push(self.spawn_worker());
        }

        let count = started.len();
        if count > 0 {
            let mut workers = self.lock_workers();
            workers.extend(started);
            tracing::debug!(
                started = count,
                active = workers.len(),
                max = self.max_workers,
                "worker pool grown"
            );
        }
        count
    }

    /// Hands the current handles to the caller for joining.
    pub(crate) fn take_handles(&self) -> Vec<WorkerHandle> {
        std::mem::take(&mut *self.lock_workers())
    }

    pub(crate) fn abort_all(&self) {
        let workers = self.take_handles();
        if workers.is_empty() {
            return;
        }
        tracing::debug!(workers = workers.len(), "aborting worker tasks");
        for worker in workers {
            worker.handle.abort();
        }
    }

    /// Spawns one worker task. The connection lease is acquired inside the
    /// task, never on the caller's.
    fn spawn_worker(&self) -> WorkerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = self.shared.clone();
        let outputs = self.shared.outputs().clone();
        let telemetry = self.shared.telemetry().clone();

        let handle = tokio::spawn(async move {
            let run = async move { Worker::start(id, shared).await.run().await };
            if let Err(panic_payload) = AssertUnwindSafe(run).catch_unwind().await {
                let panic_msg = panic_message(panic_payload.as_ref());
                tracing::error!(worker = id, panic = %panic_msg, "worker task panicked");
                telemetry.record_worker_panic();
                outputs.warning(format!("Worker {id} stopped unexpectedly: {panic_msg}"));
            }
        });

        WorkerHandle { id, handle }
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
