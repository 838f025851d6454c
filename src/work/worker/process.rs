use crate::connection::{Connection, ConnectionLease};
use crate::runtime::stop::StopSignal;
use crate::runtime::telemetry::Telemetry;
use crate::work::batch::Batcher;
use crate::work::item::WorkItem;
use crate::work::queue::WorkQueue;
use std::sync::Arc;
use std::time::Duration;

use super::execute::ItemExecutor;
use super::shared::WorkerShared;

/// One execution loop bound to one connection lease and one private batcher.
pub struct Worker<C: Connection> {
    pub id: usize,
    pub(super) queue: Arc<WorkQueue<WorkItem<C>>>,
    pub(super) batcher: Option<Batcher<WorkItem<C>>>,
    pub(super) executor: ItemExecutor<C>,
    pub(super) stop: StopSignal,
    pub(super) telemetry: Arc<Telemetry>,
    pub(super) idle_wait: Duration,
}

impl<C: Connection> Worker<C> {
    /// Builds a worker and acquires its connection lease. Batching is off when
    /// the configured batch size is 1.
    ///
    /// Runs on the worker's own task so a slow clone never holds up the
    /// driver.
    pub async fn start(id: usize, shared: WorkerShared<C>) -> Self {
        let WorkerShared {
            base,
            queue,
            outputs,
            counters,
            telemetry,
            stop,
            policy,
            batch_size,
            idle_wait,
            activity,
        } = shared;

        let lease = ConnectionLease::acquire(&base, id, &outputs, &telemetry).await;
        let batcher = (batch_size > 1).then(|| Batcher::new(batch_size));

        Self {
            id,
            queue,
            batcher,
            executor: ItemExecutor {
                worker_id: id,
                lease,
                outputs,
                counters,
                telemetry: Arc::clone(&telemetry),
                stop: stop.clone(),
                policy,
                activity,
            },
            stop,
            telemetry,
            idle_wait,
        }
    }

    pub fn uses_shared_connection(&self) -> bool {
        self.executor.lease.is_shared()
    }

    /// Pulls items until the queue is empty and closed, then flushes the
    /// private batch. A stop or cancellation ends the loop at once without
    /// flushing.
    #[tracing::instrument(name = "worker", skip_all, fields(worker = self.id))]
    pub async fn run(mut self) {
        let _active = self.telemetry.enter_worker();
        tracing::debug!(worker = self.id, "worker task started");

        loop {
            if self.stop.is_halted() {
                tracing::debug!(worker = self.id, "stop observed; exiting worker loop");
                return;
            }

            // Read the flag before popping so a push racing with close is
            // never left behind.
            let closed = self.queue.is_closed();
            match self.queue.pop() {
                Some(item) => {
                    if self.stop.is_halted() {
                        tracing::debug!(worker = self.id, "stop observed before execute");
                        return;
                    }
                    self.execute(item).await;
                }
                None if closed => break,
                None => {
                    tokio::select! {
                        _ = self.queue.wait_for_work(self.idle_wait) => {}
                        _ = self.stop.halted() => {}
                    }
                }
            }
        }

        if let Some(batcher) = self.batcher.as_mut() {
            if !batcher.is_empty() {
                tracing::debug!(
                    worker = self.id,
                    pending = batcher.len(),
                    "input closed; flushing partial batch"
                );
            }
            batcher.flush(&self.executor).await;
        }
        tracing::debug!(worker = self.id, "worker drained; exiting");
    }

    async fn execute(&mut self, item: WorkItem<C>) {
        match self.batcher.as_mut() {
            Some(batcher) => batcher.queue_operation(item, &self.executor).await,
            None => self.executor.execute_item(item).await,
        }
    }
}
