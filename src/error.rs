//! Error taxonomy for the task engine and its coordination primitives.
//!
//! Errors are cloneable so a single failure parked in a completion handle
//! can be observed by any number of readers.

use thiserror::Error;

/// Errors surfaced by pools, completion handles, barriers, gates and locks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// A bounded wait or acquire elapsed. The underlying operation keeps
    /// running unless the call site explicitly cancels on timeout.
    #[error("operation timed out")]
    Timeout,

    /// The task or wait was explicitly cancelled.
    #[error("task was cancelled")]
    Cancelled,

    /// A cooperative cancellation signal was observed during a blocking wait.
    #[error("wait interrupted by cancellation signal")]
    Interrupted,

    /// The task body panicked. The payload is captured here and the worker
    /// that ran the task survives.
    #[error("task execution failed: {0}")]
    ExecutionFailure(String),

    /// The barrier was reset, or a party timed out or was interrupted while
    /// others were waiting. The generation stays broken until `reset()`.
    #[error("barrier was broken while waiting")]
    BrokenBarrier,

    /// Lock misuse: unlock by a non-owner, re-acquire violating reentrancy
    /// rules, read-unlock with no readers held. Fatal to the call, not to
    /// the lock.
    #[error("lock state violation: {0}")]
    LockState(String),

    /// Submission was rejected because the pool has been shut down.
    #[error("pool is shut down")]
    PoolShutDown,

    /// `invoke_any` aggregate: every candidate task failed.
    #[error("all tasks failed; first error: {0}")]
    AllTasksFailed(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TaskError>;
