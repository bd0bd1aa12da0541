//! # Threadmill - Bounded Task-Execution Engine
//!
//! A thread-pool based task-execution engine with cooperative coordination
//! primitives. Work is submitted as plain closures, runs on a fixed,
//! single-worker or elastic pool of native threads, and every submission is
//! observed through a future-like completion handle. Alongside the pools
//! the crate provides the rendezvous primitives groups of workers use to
//! coordinate phases of execution independently of the task queue.
//!
//! ## Architecture
//!
//! - **Thread pool**: FIFO task queue plus N workers pulling from it.
//!   Fixed, single-worker and cached/elastic policies, graceful and
//!   cancelling shutdown, `invoke_all`/`invoke_any` batch calls.
//! - **Completion handles**: write-once result cells with blocking,
//!   bounded and non-blocking reads, cooperative cancellation and
//!   promise-style composition (`then_apply`, `on_failure`, `or_timeout`,
//!   `all_of`).
//! - **Scheduled pool**: time-ordered queue running tasks after a delay,
//!   at a fixed rate, or with a fixed delay between runs.
//! - **Rendezvous barrier / countdown gate**: reusable N-party barrier
//!   with a hand-off action, and a one-shot N-signal latch.
//! - **Locks**: owner-checked exclusive, reentrant (fair or unfair) and
//!   read/write locks, plus a monitor-style single-slot channel.
//!
//! Cancellation everywhere is cooperative: a [`CancelToken`] is a signal a
//! running task must observe; nothing is ever force-terminated.
//!
//! ## Example
//!
//! ```
//! use threadmill::ThreadPool;
//!
//! let pool = ThreadPool::fixed(4);
//!
//! let handle = pool.submit(|| 6 * 7).unwrap();
//! assert_eq!(handle.get().unwrap(), 42);
//! ```

pub mod barrier;
pub mod cancel;
pub mod error;
pub mod gate;
pub mod handle;
pub mod locks;
pub mod metrics;
pub mod pool;
pub mod scheduled;
pub mod slot;
mod task;
mod worker;

use serde::{Deserialize, Serialize};

/// Admission policy for [`locks::ReentrantLock`] wait queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Fairness {
    /// Strict FIFO: the longest-waiting thread acquires next. Bounds
    /// starvation at some cost in throughput.
    Fair,
    /// Any contender may acquire on release, including one that never
    /// queued. Higher throughput, no ordering guarantee.
    #[default]
    Unfair,
}

pub use barrier::{BarrierWait, RendezvousBarrier};
pub use cancel::CancelToken;
pub use error::{Result, TaskError};
pub use gate::CountdownGate;
pub use handle::{CompletionHandle, all_of};
pub use locks::{ExclusiveLock, ReentrantLock, SharedLock};
pub use pool::{PoolConfig, ThreadPool};
pub use scheduled::{ScheduledHandle, ScheduledPool};
pub use slot::SingleSlot;

#[cfg(feature = "metrics")]
pub use metrics::{MetricsSnapshot, PoolMetrics};
