use crate::connection::{BatchResponse, Connection, ConnectionLease, ExecuteError};
use crate::processor::backoff::{sleep_until_or_halted, RetryPolicy, RetryState};
use crate::processor::worker_pool::panic_message;
use crate::runtime::output::OutputChannels;
use crate::runtime::progress::ProgressCounters;
use crate::runtime::records::{ErrorCategory, ProgressRecord};
use crate::runtime::stop::StopSignal;
use crate::runtime::telemetry::Telemetry;
use crate::work::batch::BatchSink;
use crate::work::item::{RequestOutcome, WorkItem};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::time::Instant;

/// Executes work items on one worker's connection lease and turns every
/// outcome into host output.
pub(crate) struct ItemExecutor<C: Connection> {
    pub(super) worker_id: usize,
    pub(super) lease: ConnectionLease<C>,
    pub(super) outputs: OutputChannels,
    pub(super) counters: Arc<ProgressCounters>,
    pub(super) telemetry: Arc<Telemetry>,
    pub(super) stop: StopSignal,
    pub(super) policy: RetryPolicy,
    pub(super) activity: Arc<str>,
}

enum RetryDecision {
    Retry,
    Exhausted,
    Halted,
}

impl<C: Connection> ItemExecutor<C> {
    /// Runs the item's requests in order, retrying transient failures in
    /// place. Only requests that have not completed are re-sent.
    pub(crate) async fn execute_item(&self, mut item: WorkItem<C>) {
        item.arm_retries(self.policy.retries());

        loop {
            if self.stop.is_halted() {
                tracing::debug!(
                    worker = self.worker_id,
                    item = %item.describe(),
                    "stop observed; abandoning item"
                );
                return;
            }

            let request = match item.requests.front() {
                Some(pending) => pending.request.clone(),
                None => break,
            };

            item.retry.record_attempt();
            self.telemetry.record_request();
            let result = AssertUnwindSafe(self.lease.connection().execute(request))
                .catch_unwind()
                .await;
            let result = match result {
                Ok(result) => result,
                Err(payload) => {
                    let reason = self.connection_panicked(payload.as_ref());
                    let message = format!("{} failed: connection panicked: {reason}", item.describe());
                    self.fail_item(item, ErrorCategory::Fault, message);
                    return;
                }
            };

            match result {
                Ok(response) => self.complete_request(&mut item, RequestOutcome::Succeeded(response)),
                Err(err) if err.is_not_found() && item.ignore_absent() => {
                    self.skip_absent(&mut item);
                }
                Err(err) if err.is_transient() => {
                    let describe = item.describe();
                    match self.wait_for_retry(&mut item.retry, &err, &describe).await {
                        RetryDecision::Retry => continue,
                        RetryDecision::Halted => return,
                        RetryDecision::Exhausted => {
                            let message = format!(
                                "{describe} failed after {} attempts: {}",
                                item.retry.attempts(),
                                err.message()
                            );
                            self.fail_item(item, ErrorCategory::RetriesExhausted, message);
                            return;
                        }
                    }
                }
                Err(err) => {
                    let message = format!("{} failed: {}", item.describe(), err.message());
                    self.fail_item(item, terminal_category(&err), message);
                    return;
                }
            }
        }

        self.complete_item(&item);
    }

    /// Sends the remaining requests of every item as one combined call.
    ///
    /// A batch-level transient failure retries the whole batch; per-request
    /// failures inside a successful response are terminal for their item.
    pub(crate) async fn run_batch(&self, mut items: Vec<WorkItem<C>>) {
        if items.is_empty() {
            return;
        }

        let counts: Vec<usize> = items.iter().map(WorkItem::pending_requests).collect();
        let requests: Vec<C::Request> = items
            .iter()
            .flat_map(|item| item.requests.iter().map(|pending| pending.request.clone()))
            .collect();
        self.telemetry.record_batch(items.len(), requests.len());

        let describe = format!("batch of {} {} operations", items.len(), items[0].kind());
        let mut retry = RetryState::new(self.policy.retries());

        loop {
            if self.stop.is_halted() {
                tracing::debug!(
                    worker = self.worker_id,
                    items = items.len(),
                    "stop observed; abandoning batch"
                );
                return;
            }

            retry.record_attempt();
            for item in items.iter_mut() {
                item.retry.record_attempt();
            }

            tracing::debug!(
                worker = self.worker_id,
                batch_size = items.len(),
                requests = requests.len(),
                attempt = retry.attempts(),
                "executing batch"
            );
            let result = AssertUnwindSafe(self.lease.connection().execute_batch(requests.clone()))
                .catch_unwind()
                .await;
            let result = match result {
                Ok(result) => result,
                Err(payload) => {
                    let reason = self.connection_panicked(payload.as_ref());
                    for item in items {
                        let message = format!(
                            "{} failed: connection panicked during {describe}: {reason}",
                            item.describe()
                        );
                        self.fail_item(item, ErrorCategory::Fault, message);
                    }
                    return;
                }
            };

            match result {
                Ok(responses) => {
                    self.route_responses(items, &counts, responses);
                    return;
                }
                Err(err) if err.is_transient() => {
                    match self.wait_for_retry(&mut retry, &err, &describe).await {
                        RetryDecision::Retry => continue,
                        RetryDecision::Halted => return,
                        RetryDecision::Exhausted => {
                            for item in items {
                                let message = format!(
                                    "{} failed after {} batch attempts: {}",
                                    item.describe(),
                                    retry.attempts(),
                                    err.message()
                                );
                                self.fail_item(item, ErrorCategory::RetriesExhausted, message);
                            }
                            return;
                        }
                    }
                }
                Err(err) => {
                    for mut item in items {
                        if err.is_not_found() && item.ignore_absent() {
                            while !item.requests.is_empty() {
                                self.skip_absent(&mut item);
                            }
                            self.complete_item(&item);
                        } else {
                            let message = format!("{} failed: {}", item.describe(), err.message());
                            self.fail_item(item, terminal_category(&err), message);
                        }
                    }
                    return;
                }
            }
        }
    }

    fn route_responses(
        &self,
        items: Vec<WorkItem<C>>,
        counts: &[usize],
        responses: BatchResponse<C::Response>,
    ) {
        let mut responses = responses.into_iter();

        for (mut item, &count) in items.into_iter().zip(counts) {
            let chunk: Vec<_> = responses.by_ref().take(count).collect();
            let missing = chunk.len() < count;
            let mut failure = None;

            for response in chunk {
                match response {
                    Ok(value) => self.complete_request(&mut item, RequestOutcome::Succeeded(value)),
                    Err(err) if err.is_not_found() && item.ignore_absent() => {
                        self.skip_absent(&mut item);
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            match failure {
                Some(err) => {
                    let message = format!("{} failed: {}", item.describe(), err.message());
                    self.fail_item(item, terminal_category(&err), message);
                }
                None if missing => {
                    let message = format!(
                        "{} failed: batch response is missing {} entries",
                        item.describe(),
                        item.pending_requests()
                    );
                    self.fail_item(item, ErrorCategory::Fault, message);
                }
                None => self.complete_item(&item),
            }
        }

        let extra = responses.count();
        if extra > 0 {
            tracing::warn!(
                worker = self.worker_id,
                extra,
                "batch response carried more entries than requests"
            );
        }
    }

    async fn wait_for_retry(
        &self,
        retry: &mut RetryState,
        err: &ExecuteError,
        describe: &str,
    ) -> RetryDecision {
        let Some(deadline) = retry.schedule(&self.policy, err.retry_after()) else {
            return RetryDecision::Exhausted;
        };

        self.telemetry.record_retry();
        let backoff = deadline.saturating_duration_since(Instant::now());
        tracing::debug!(
            worker = self.worker_id,
            attempt = retry.attempts(),
            retries_remaining = retry.retries_remaining(),
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "transient failure; retrying in place"
        );
        self.outputs.verbose(format!(
            "Retrying {describe} in {}ms after attempt {}: {}",
            backoff.as_millis(),
            retry.attempts(),
            err.message()
        ));

        if sleep_until_or_halted(deadline, &self.stop).await {
            RetryDecision::Retry
        } else {
            RetryDecision::Halted
        }
    }

    /// Runs the request's completion callback. A panicking callback loses
    /// only its object; the request still counts as done.
    fn complete_request(&self, item: &mut WorkItem<C>, outcome: RequestOutcome<C::Response>) {
        let Some(pending) = item.requests.pop_front() else {
            return;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| pending.complete(outcome))) {
            Ok(Some(object)) => self.outputs.object(object),
            Ok(None) => {}
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(worker = self.worker_id, panic = %reason, "completion callback panicked");
                self.outputs.warning(format!(
                    "Completion callback for {} panicked: {reason}",
                    item.describe()
                ));
            }
        }
    }

    fn connection_panicked(&self, payload: &(dyn Any + Send)) -> String {
        let reason = panic_message(payload);
        tracing::error!(worker = self.worker_id, panic = %reason, "connection panicked during execute");
        reason
    }

    fn skip_absent(&self, item: &mut WorkItem<C>) {
        self.telemetry.record_absent_target();
        self.outputs
            .verbose(format!("{} skipped: target does not exist", item.describe()));
        self.complete_request(item, RequestOutcome::Absent);
    }

    fn complete_item(&self, item: &WorkItem<C>) {
        self.outputs.verbose(format!("Completed {}", item.describe()));
        self.record_progress();
    }

    fn fail_item(&self, item: WorkItem<C>, category: ErrorCategory, message: String) {
        tracing::debug!(
            worker = self.worker_id,
            category = %category,
            attempts = item.retry_state().attempts(),
            "{message}"
        );
        self.telemetry.record_error();
        self.outputs.error(item.error_record(category, message));
        self.record_progress();
    }

    fn record_progress(&self) {
        let completed = self.counters.record_completed(1);
        let total = self.counters.queued();
        self.outputs
            .progress(ProgressRecord::update(&self.activity, completed, total));
    }
}

impl<C: Connection> BatchSink<WorkItem<C>> for ItemExecutor<C> {
    fn execute_batch<'a>(&'a self, batch: Vec<WorkItem<C>>) -> BoxFuture<'a, ()> {
        Box::pin(self.run_batch(batch))
    }
}

fn terminal_category(err: &ExecuteError) -> ErrorCategory {
    if err.is_not_found() {
        ErrorCategory::NotFound
    } else {
        ErrorCategory::Fault
    }
}
