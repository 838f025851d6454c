use crate::runtime::progress::ProgressCounters;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing what the worker pool has done so far.
#[derive(Default, Debug)]
pub struct Telemetry {
    batches_executed: AtomicU64,
    requests_executed: AtomicU64,
    retries: AtomicU64,
    errors: AtomicU64,
    absent_targets: AtomicU64,
    workers_started: AtomicU64,
    shared_connections: AtomicU64,
    worker_panics: AtomicU64,
    active_workers: AtomicUsize,
    peak_workers: AtomicUsize,
    largest_batch: AtomicUsize,
}

impl Telemetry {
    pub fn record_batch(&self, items: usize, requests: usize) {
        self.batches_executed.fetch_add(1, Ordering::Relaxed);
        self.requests_executed
            .fetch_add(requests as u64, Ordering::Relaxed);
        self.largest_batch.fetch_max(items, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_absent_target(&self) {
        self.absent_targets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shared_connection(&self) {
        self.shared_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_panic(&self) {
        self.worker_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a worker as running until the returned guard drops.
    pub fn enter_worker(self: &Arc<Self>) -> ActiveWorkerGuard {
        self.workers_started.fetch_add(1, Ordering::Relaxed);
        let active = self.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_workers.fetch_max(active, Ordering::SeqCst);
        ActiveWorkerGuard {
            telemetry: Arc::clone(self),
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            batches_executed: self.batches_executed.load(Ordering::Relaxed),
            requests_executed: self.requests_executed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            absent_targets: self.absent_targets.load(Ordering::Relaxed),
            workers_started: self.workers_started.load(Ordering::Relaxed),
            shared_connections: self.shared_connections.load(Ordering::Relaxed),
            worker_panics: self.worker_panics.load(Ordering::Relaxed),
            active_workers: self.active_workers(),
            peak_workers: self.peak_workers(),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
        }
    }

    pub fn batches_executed(&self) -> u64 {
        self.batches_executed.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn shared_connections(&self) -> u64 {
        self.shared_connections.load(Ordering::Relaxed)
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn peak_workers(&self) -> usize {
        self.peak_workers.load(Ordering::SeqCst)
    }
}

pub struct ActiveWorkerGuard {
    telemetry: Arc<Telemetry>,
}

impl Drop for ActiveWorkerGuard {
    fn drop(&mut self) {
        self.telemetry.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub batches_executed: u64,
    pub requests_executed: u64,
    pub retries: u64,
    pub errors: u64,
    pub absent_targets: u64,
    pub workers_started: u64,
    pub shared_connections: u64,
    pub worker_panics: u64,
    pub active_workers: usize,
    pub peak_workers: usize,
    pub largest_batch: usize,
}

/// Spawns a background task that periodically logs throughput, progress, and error counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    counters: Arc<ProgressCounters>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_completed = counters.completed();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "parabulk::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    let completed = counters.completed();
                    let delta = completed.saturating_sub(last_completed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "parabulk::metrics",
                        throughput = format!("{throughput:.2}"),
                        queued = counters.queued(),
                        completed,
                        percent = counters.percent_complete(),
                        active_workers = snapshot.active_workers,
                        batches = snapshot.batches_executed,
                        retries = snapshot.retries,
                        errors = snapshot.errors,
                        "bulk engine metrics snapshot"
                    );

                    last_completed = completed;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
