use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_RETRIES: u32 = 0;
const DEFAULT_INITIAL_RETRY_DELAY_SECS: u64 = 5;
const DEFAULT_MAX_RETRY_DELAY_SECS: u64 = 60;
const DEFAULT_IDLE_WAIT_MS: u64 = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_ACTIVITY: &str = "Bulk operation";

const ENV_MAX_DOP: &str = "PARABULK_MAX_DOP";
const ENV_BATCH_SIZE: &str = "PARABULK_BATCH_SIZE";
const ENV_RETRIES: &str = "PARABULK_RETRIES";
const ENV_INITIAL_RETRY_DELAY_MS: &str = "PARABULK_INITIAL_RETRY_DELAY_MS";

/// Runtime configuration for one bulk invocation.
///
/// All instances must be constructed via [`EngineConfig::builder`] or [`EngineConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    max_degree_of_parallelism: usize,
    batch_size: usize,
    retries: u32,
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
    idle_wait: Duration,
    poll_interval: Duration,
    metrics_interval: Option<Duration>,
    activity: String,
}

pub struct EngineConfigParams {
    pub max_degree_of_parallelism: usize,
    pub batch_size: usize,
    pub retries: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub idle_wait: Duration,
    pub poll_interval: Duration,
    pub metrics_interval: Option<Duration>,
    pub activity: String,
}

impl EngineConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: EngineConfigParams) -> Result<Self> {
        let EngineConfigParams {
            max_degree_of_parallelism,
            batch_size,
            retries,
            initial_retry_delay,
            max_retry_delay,
            idle_wait,
            poll_interval,
            metrics_interval,
            activity,
        } = params;

        let config = Self {
            max_degree_of_parallelism,
            batch_size,
            retries,
            initial_retry_delay,
            max_retry_delay,
            idle_wait,
            poll_interval,
            metrics_interval,
            activity: activity.trim().to_owned(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Upper bound on concurrently running workers.
    pub fn max_degree_of_parallelism(&self) -> usize {
        self.max_degree_of_parallelism
    }

    /// Items per combined request. `1` disables batching.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batching_enabled(&self) -> bool {
        self.batch_size > 1
    }

    /// Inline retries granted to each item (and each batch) after its first attempt.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay before the first retry; doubles on each subsequent retry.
    pub fn initial_retry_delay(&self) -> Duration {
        self.initial_retry_delay
    }

    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    /// Longest a worker sleeps on an empty queue before checking again.
    pub fn idle_wait(&self) -> Duration {
        self.idle_wait
    }

    /// Cadence at which `wait_for_completion` drains output while waiting.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn metrics_interval(&self) -> Option<Duration> {
        self.metrics_interval
    }

    /// Label carried by progress records.
    pub fn activity(&self) -> &str {
        &self.activity
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.max_degree_of_parallelism == 0 {
            bail!("max_degree_of_parallelism must be greater than 0");
        }

        if self.batch_size == 0 {
            bail!("batch_size must be greater than 0 (use 1 to disable batching)");
        }

        if self.initial_retry_delay > self.max_retry_delay {
            bail!(
                "initial_retry_delay ({:?}) must not exceed max_retry_delay ({:?})",
                self.initial_retry_delay,
                self.max_retry_delay
            );
        }

        if self.idle_wait.is_zero() {
            bail!("idle_wait must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if matches!(self.metrics_interval, Some(interval) if interval.is_zero()) {
            bail!("metrics_interval must be greater than 0 when set");
        }

        if self.activity.is_empty() {
            bail!("activity cannot be empty");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct EngineConfigBuilder {
    max_degree_of_parallelism: Option<usize>,
    batch_size: Option<usize>,
    retries: Option<u32>,
    initial_retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
    idle_wait: Option<Duration>,
    poll_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    activity: Option<String>,
}

impl EngineConfigBuilder {
    /// Seeds a builder from `PARABULK_*` environment variables. Unset
    /// variables keep their defaults; malformed ones are reported.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::default();
        if let Some(value) = env_value::<usize>(ENV_MAX_DOP)? {
            builder = builder.max_degree_of_parallelism(value);
        }
        if let Some(value) = env_value::<usize>(ENV_BATCH_SIZE)? {
            builder = builder.batch_size(value);
        }
        if let Some(value) = env_value::<u32>(ENV_RETRIES)? {
            builder = builder.retries(value);
        }
        if let Some(value) = env_value::<u64>(ENV_INITIAL_RETRY_DELAY_MS)? {
            builder = builder.initial_retry_delay(Duration::from_millis(value));
        }
        Ok(builder)
    }

    pub fn max_degree_of_parallelism(mut self, workers: usize) -> Self {
        self.max_degree_of_parallelism = Some(workers);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn initial_retry_delay(mut self, delay: Duration) -> Self {
        self.initial_retry_delay = Some(delay);
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    pub fn idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = Some(wait);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let initial_retry_delay = self
            .initial_retry_delay
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_INITIAL_RETRY_DELAY_SECS));
        let params = EngineConfigParams {
            max_degree_of_parallelism: self
                .max_degree_of_parallelism
                .unwrap_or_else(default_parallelism),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            retries: self.retries.unwrap_or(DEFAULT_RETRIES),
            initial_retry_delay,
            max_retry_delay: self.max_retry_delay.unwrap_or_else(|| {
                Duration::from_secs(DEFAULT_MAX_RETRY_DELAY_SECS).max(initial_retry_delay)
            }),
            idle_wait: self
                .idle_wait
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_IDLE_WAIT_MS)),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)),
            metrics_interval: self.metrics_interval,
            activity: self
                .activity
                .unwrap_or_else(|| DEFAULT_ACTIVITY.to_string()),
        };

        EngineConfig::new(params)
    }
}

/// Host processor count, or 1 when it cannot be determined.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

fn env_value<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("{name} must be a non-negative integer, got {raw:?}"))?;
            Ok(Some(value))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {name}")),
    }
}
