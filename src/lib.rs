pub mod connection;
pub mod processor;
pub mod runtime;
pub mod work;

pub use connection::{BatchResponse, CloneError, Connection, ConnectionLease, ExecuteError};
pub use processor::backoff::{RetryPolicy, RetryState};
pub use processor::engine::{BulkEngine, CompletionSummary};
pub use runtime::config::{
    default_parallelism, EngineConfig, EngineConfigBuilder, EngineConfigParams,
};
pub use runtime::host::Host;
pub use runtime::output::{DrainStats, LogLevel, LogMessage, OutputChannels, OutputDrain};
pub use runtime::progress::ProgressCounters;
pub use runtime::records::{
    percent, ErrorCategory, ErrorRecord, ProgressRecord, PROGRESS_ACTIVITY_ID,
};
pub use runtime::stop::StopSignal;
pub use runtime::telemetry::{
    init_tracing, spawn_metrics_reporter, Telemetry, TelemetrySnapshot, DEFAULT_METRICS_INTERVAL,
};
pub use work::batch::{BatchSink, Batchable, Batcher};
pub use work::item::{Completion, OperationKind, RequestOutcome, WorkItem, WorkItemBuilder};
pub use work::queue::WorkQueue;
pub use work::worker::Worker;
