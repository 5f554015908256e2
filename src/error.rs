//! Error taxonomy (§7). Programmer-error invariants are asserted, not
//! returned as `Result` — the spec treats them as bugs, not operating
//! conditions. Only initialization failures are surfaced to the caller.

use thiserror::Error;

/// Failures that can occur during [`crate::engine::Executor::initialize`].
/// Runtime soft failures (a task function raising an error mid-chunk) never
/// reach this type; they are reported through the event ring instead
/// (§4.11, §7 "runtime soft failures").
#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to start the worker thread pool: {0}")]
    ThreadPoolStartFailed(String),

    #[error("failed to allocate the task-memory arena ({requested_bytes} bytes)")]
    TaskMemoryAllocationFailed { requested_bytes: usize },
}
