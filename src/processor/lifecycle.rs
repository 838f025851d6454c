//! Run-scoped background tasks for `BulkEngine`.

use crate::runtime::progress::ProgressCounters;
use crate::runtime::stop::StopSignal;
use crate::runtime::telemetry::{self, Telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct LifecycleHandles {
    run_token: CancellationToken,
    metrics_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub stop: &'a StopSignal,
    pub telemetry: Arc<Telemetry>,
    pub counters: Arc<ProgressCounters>,
    pub metrics_interval: Option<Duration>,
}

impl LifecycleHandles {
    /// Starts the metrics reporter when an interval is configured. The run
    /// token is a child of the stop token, so a stop also ends the reporter.
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            stop,
            telemetry,
            counters,
            metrics_interval,
        } = params;

        let run_token = stop.token().child_token();
        let metrics_handle = metrics_interval.map(|interval| {
            telemetry::spawn_metrics_reporter(telemetry, counters, run_token.clone(), interval)
        });

        Self {
            run_token,
            metrics_handle,
        }
    }

    pub(crate) fn has_metrics_reporter(&self) -> bool {
        self.metrics_handle.is_some()
    }

    pub(crate) async fn shutdown(mut self) {
        self.run_token.cancel();
        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
    }
}

impl Drop for LifecycleHandles {
    fn drop(&mut self) {
        self.run_token.cancel();
    }
}
