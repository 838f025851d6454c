//! Bulk operation orchestration.
//!
//! `BulkEngine` is created once per bulk command. It owns the shared queue and
//! the output drain, and composes the focused submodules:
//! - `worker_pool` starts and prunes worker tasks.
//! - `lifecycle` runs the optional metrics reporter.
//! - `backoff` provides the retry timing workers apply inline.
//!
//! Only the task that owns the host calls into the engine, so every host
//! write happens on that task.

use super::backoff::RetryPolicy;
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::worker_pool::WorkerPool;
use crate::connection::Connection;
use crate::runtime::config::EngineConfig;
use crate::runtime::host::Host;
use crate::runtime::output::{OutputChannels, OutputDrain};
use crate::runtime::progress::ProgressCounters;
use crate::runtime::records::ProgressRecord;
use crate::runtime::stop::StopSignal;
use crate::runtime::telemetry::Telemetry;
use crate::work::item::WorkItem;
use crate::work::queue::WorkQueue;
use crate::work::worker::{WorkerShared, WorkerSharedParams};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// What a finished (or stopped) bulk run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompletionSummary {
    pub queued: u64,
    pub completed: u64,
    pub errors: u64,
    pub cancelled: bool,
}

pub struct BulkEngine<C: Connection> {
    config: EngineConfig,
    queue: Arc<WorkQueue<WorkItem<C>>>,
    drain: OutputDrain,
    counters: Arc<ProgressCounters>,
    telemetry: Arc<Telemetry>,
    stop: StopSignal,
    pool: WorkerPool<C>,
    lifecycle: Option<LifecycleHandles>,
}

impl<C: Connection> BulkEngine<C> {
    /// Creates an engine around the base connection. Workers clone it when
    /// they start; `cancel` is the driver's token and is never cancelled by
    /// the engine itself.
    pub fn new(config: EngineConfig, connection: C, cancel: CancellationToken) -> Self {
        Self::with_shared_connection(config, Arc::new(connection), cancel)
    }

    pub fn with_shared_connection(
        config: EngineConfig,
        connection: Arc<C>,
        cancel: CancellationToken,
    ) -> Self {
        let (outputs, drain) = OutputChannels::new();
        let queue = Arc::new(WorkQueue::new());
        let counters = Arc::new(ProgressCounters::new());
        let telemetry = Arc::new(Telemetry::default());
        let stop = StopSignal::new(&cancel);

        let shared = WorkerShared::new(WorkerSharedParams {
            base: connection,
            queue: Arc::clone(&queue),
            outputs,
            counters: Arc::clone(&counters),
            telemetry: Arc::clone(&telemetry),
            stop: stop.clone(),
            policy: RetryPolicy::from_config(&config),
            batch_size: config.batch_size(),
            idle_wait: config.idle_wait(),
            activity: Arc::from(config.activity()),
        });
        let pool = WorkerPool::new(config.max_degree_of_parallelism(), shared);

        tracing::debug!(
            max_workers = pool.max_workers(),
            batch_size = config.batch_size(),
            retries = config.retries(),
            "bulk engine created"
        );

        Self {
            config,
            queue,
            drain,
            counters,
            telemetry,
            stop,
            pool,
            lifecycle: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn counters(&self) -> Arc<ProgressCounters> {
        Arc::clone(&self.counters)
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Token cancelled when either the driver cancels or a stop is requested.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.stop.token()
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_halted()
    }

    /// Queues one item, makes sure workers are running, and drains pending
    /// output to the host. Returns `false` when a stop was already requested
    /// and the item was dropped.
    pub fn queue_operation<H>(&mut self, item: WorkItem<C>, host: &mut H) -> bool
    where
        H: Host + ?Sized,
    {
        self.observe_host_stop(host);
        if self.stop.is_halted() {
            tracing::debug!(item = %item.describe(), "stop requested; item not queued");
            return false;
        }

        let queued = self.counters.record_queued();
        self.queue.push(item);
        tracing::trace!(queued, "item queued");

        self.ensure_lifecycle();
        self.pool.ensure_workers();
        self.drain.drain(host);
        true
    }

    /// Asks the host for confirmation once, then queues the item only if the
    /// host agreed.
    pub fn queue_if_confirmed<H>(&mut self, item: WorkItem<C>, description: &str, host: &mut H) -> bool
    where
        H: Host + ?Sized,
    {
        if !host.should_process(description) {
            tracing::debug!(description, "host declined item");
            return false;
        }
        self.queue_operation(item, host)
    }

    /// Closes input and waits for the workers to finish everything queued,
    /// draining output every poll interval. On stop or cancellation the
    /// workers are aborted instead of joined and no terminal progress record
    /// is written.
    pub async fn wait_for_completion<H>(mut self, host: &mut H) -> CompletionSummary
    where
        H: Host + ?Sized,
    {
        self.counters.close_input();
        self.queue.close();
        tracing::debug!(
            queued = self.counters.queued(),
            pending = self.queue.len(),
            workers = self.pool.active_workers(),
            "input closed; waiting for queue to drain"
        );

        let mut ticker = time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.observe_host_stop(host);
            self.drain.drain(host);
            if self.stop.is_halted() || self.queue.is_empty() {
                break;
            }
            self.pool.ensure_workers();

            tokio::select! {
                _ = self.queue.drained() => {}
                _ = ticker.tick() => {}
                _ = self.stop.halted() => {}
            }
        }

        if !self.stop.is_halted() {
            self.join_workers(host, &mut ticker).await;
        }

        let cancelled = self.stop.is_halted();
        if cancelled {
            tracing::info!(
                completed = self.counters.completed(),
                queued = self.counters.queued(),
                "bulk run stopped; abandoning in-flight work"
            );
            self.pool.abort_all();
        }

        if let Some(lifecycle) = self.lifecycle.take() {
            lifecycle.shutdown().await;
        }

        self.drain.drain(host);

        let queued = self.counters.queued();
        let completed = self.counters.completed();
        if !cancelled && queued > 0 {
            if completed >= queued {
                host.write_progress(ProgressRecord::finished(self.config.activity(), queued));
            } else {
                let missing = queued - completed;
                tracing::warn!(queued, completed, missing, "bulk run ended with unfinished items");
                host.write_warning(&format!(
                    "{missing} of {queued} queued items ended without a result"
                ));
            }
        }

        let summary = CompletionSummary {
            queued,
            completed,
            errors: self.telemetry.errors(),
            cancelled,
        };
        tracing::info!(
            queued = summary.queued,
            completed = summary.completed,
            errors = summary.errors,
            cancelled = summary.cancelled,
            peak_workers = self.telemetry.peak_workers(),
            "bulk run finished"
        );
        summary
    }

    async fn join_workers<H>(&mut self, host: &mut H, ticker: &mut time::Interval)
    where
        H: Host + ?Sized,
    {
        let workers = self.pool.take_handles();
        if workers.is_empty() {
            return;
        }

        let ids: Vec<usize> = workers.iter().map(|worker| worker.id).collect();
        let aborts: Vec<_> = workers
            .iter()
            .map(|worker| worker.handle.abort_handle())
            .collect();
        let joined = join_all(workers.into_iter().map(|worker| worker.handle));
        tokio::pin!(joined);

        loop {
            tokio::select! {
                results = &mut joined => {
                    for (id, result) in ids.iter().zip(results) {
                        if let Err(err) = result {
                            tracing::warn!(worker = id, error = %err, "worker task terminated unexpectedly");
                        }
                    }
                    tracing::debug!(workers = ids.len(), "worker tasks joined");
                    return;
                }
                _ = ticker.tick() => {
                    self.observe_host_stop(host);
                    self.drain.drain(host);
                }
                _ = self.stop.halted() => {
                    for abort in &aborts {
                        abort.abort();
                    }
                    return;
                }
            }
        }
    }

    fn ensure_lifecycle(&mut self) {
        if self.lifecycle.is_some() {
            return;
        }
        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            stop: &self.stop,
            telemetry: Arc::clone(&self.telemetry),
            counters: Arc::clone(&self.counters),
            metrics_interval: self.config.metrics_interval(),
        });
        tracing::debug!(
            metrics_reporter = lifecycle.has_metrics_reporter(),
            "run lifecycle started"
        );
        self.lifecycle = Some(lifecycle);
    }

    fn observe_host_stop<H>(&self, host: &H)
    where
        H: Host + ?Sized,
    {
        if host.is_stopping() && !self.stop.is_stopping() {
            tracing::debug!("host reported stopping");
            self.stop.request_stop();
        }
    }
}

impl<C: Connection> Drop for BulkEngine<C> {
    fn drop(&mut self) {
        self.pool.abort_all();
    }
}
