//! Worker module split across focused submodules:
//! - `shared`: state handed to every worker (queue, outputs, counters, retry policy)
//! - `execute`: request execution, inline retries, and result emission
//! - `process`: worker struct plus the run loop
//! - `tests`: worker unit tests

mod execute;
mod process;
mod shared;


pub use process::Worker;
pub use shared::{WorkerShared, WorkerSharedParams};
