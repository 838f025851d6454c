//! Processor orchestration covering the bulk engine, worker pool supervision,
//! run-scoped background tasks, and retry timing.

pub mod backoff;
pub mod engine;
pub(crate) mod lifecycle;
pub(crate) mod worker_pool;
