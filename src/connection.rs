//! Connection plumbing consumed by workers: the opaque request/response
//! surface, the execution error taxonomy, clone capability, and the
//! per-worker lease that remembers whether a handle is owned or shared.

pub mod client;
pub mod lease;

pub use client::{BatchResponse, CloneError, Connection, ExecuteError};
pub use lease::ConnectionLease;
