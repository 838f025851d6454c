use crate::connection::Connection;
use crate::processor::backoff::RetryPolicy;
use crate::runtime::output::OutputChannels;
use crate::runtime::progress::ProgressCounters;
use crate::runtime::stop::StopSignal;
use crate::runtime::telemetry::Telemetry;
use crate::work::item::WorkItem;
use crate::work::queue::WorkQueue;
use std::sync::Arc;
use std::time::Duration;

pub struct WorkerShared<C: Connection> {
    pub(super) base: Arc<C>,
    pub(super) queue: Arc<WorkQueue<WorkItem<C>>>,
    pub(super) outputs: OutputChannels,
    pub(super) counters: Arc<ProgressCounters>,
    pub(super) telemetry: Arc<Telemetry>,
    pub(super) stop: StopSignal,
    pub(super) policy: RetryPolicy,
    pub(super) batch_size: usize,
    pub(super) idle_wait: Duration,
    pub(super) activity: Arc<str>,
}

pub struct WorkerSharedParams<C: Connection> {
    pub base: Arc<C>,
    pub queue: Arc<WorkQueue<WorkItem<C>>>,
    pub outputs: OutputChannels,
    pub counters: Arc<ProgressCounters>,
    pub telemetry: Arc<Telemetry>,
    pub stop: StopSignal,
    pub policy: RetryPolicy,
    pub batch_size: usize,
    pub idle_wait: Duration,
    pub activity: Arc<str>,
}

impl<C: Connection> WorkerShared<C> {
    pub fn new(params: WorkerSharedParams<C>) -> Self {
        Self {
            base: params.base,
            queue: params.queue,
            outputs: params.outputs,
            counters: params.counters,
            telemetry: params.telemetry,
            stop: params.stop,
            policy: params.policy,
            batch_size: params.batch_size.max(1),
            idle_wait: params.idle_wait,
            activity: params.activity,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<WorkItem<C>>> {
        &self.queue
    }

    pub fn stop(&self) -> &StopSignal {
        &self.stop
    }

    pub fn outputs(&self) -> &OutputChannels {
        &self.outputs
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }
}

impl<C: Connection> Clone for WorkerShared<C> {
    fn clone(&self) -> Self {
        Self {
            base: Arc::clone(&self.base),
            queue: Arc::clone(&self.queue),
            outputs: self.outputs.clone(),
            counters: Arc::clone(&self.counters),
            telemetry: Arc::clone(&self.telemetry),
            stop: self.stop.clone(),
            policy: self.policy,
            batch_size: self.batch_size,
            idle_wait: self.idle_wait,
            activity: Arc::clone(&self.activity),
        }
    }
}
