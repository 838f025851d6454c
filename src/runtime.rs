//! Runtime glue shared by the engine and its workers: configuration, the host
//! surface, output channels and draining, progress counters, stop signalling,
//! and telemetry.

pub mod config;
pub mod host;
pub mod output;
pub mod progress;
pub mod records;
pub mod stop;
pub mod telemetry;
