use crate::runtime::config::EngineConfig;
use crate::runtime::stop::StopSignal;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::{sleep_until, Instant};

/// Exponential retry timing shared by item and batch retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            retries,
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.retries(),
            config.initial_retry_delay(),
            config.max_retry_delay(),
        )
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay before retry number `retry` (1-based): `initial * 2^(retry-1)`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

/// Per-item (or per-batch) retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    retries_remaining: u32,
    attempts: u32,
    next_retry_time: Option<Instant>,
}

impl RetryState {
    pub fn new(retries: u32) -> Self {
        Self {
            retries_remaining: retries,
            attempts: 0,
            next_retry_time: None,
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    pub fn next_retry_time(&self) -> Option<Instant> {
        self.next_retry_time
    }

    /// Consumes one retry and returns when the next attempt may start, or
    /// `None` once the budget is spent. A service-provided `hint` wins when it
    /// is longer than the computed backoff.
    pub fn schedule(&mut self, policy: &RetryPolicy, hint: Option<Duration>) -> Option<Instant> {
        if self.retries_remaining == 0 {
            return None;
        }
        self.retries_remaining -= 1;

        let backoff = policy.delay_for(self.attempts.max(1));
        let delay = hint.map_or(backoff, |hint| hint.max(backoff));
        let at = Instant::now() + delay;
        self.next_retry_time = Some(at);
        Some(at)
    }
}

/// Waits until `deadline` unless the stop signal fires first. Returns
/// `false` when interrupted.
pub(crate) async fn sleep_until_or_halted(deadline: Instant, stop: &StopSignal) -> bool {
    if stop.is_halted() {
        return false;
    }

    if deadline <= Instant::now() {
        yield_now().await;
        return !stop.is_halted();
    }

    tokio::select! {
        _ = stop.halted() => false,
        _ = sleep_until(deadline) => true,
    }
}
