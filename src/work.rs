//! Work-side primitives: the work item model, the shared input queue, the
//! per-worker batcher, and the worker run loop.

pub mod batch;
pub mod item;
pub mod queue;
pub mod worker;
