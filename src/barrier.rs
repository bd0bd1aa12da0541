//! Reusable N-party rendezvous barrier.
//!
//! Parties call [`RendezvousBarrier::wait`] and block until all `N` have
//! arrived. The last arrival (the leader) runs the optional hand-off action
//! synchronously, then everyone is released and the barrier starts a fresh
//! generation. A timeout, an observed cancellation token, a panicking
//! hand-off, or an explicit [`reset`](RendezvousBarrier::reset) breaks the
//! current generation: every waiting party gets
//! [`TaskError::BrokenBarrier`], and the barrier stays broken until it is
//! reset.

use crate::cancel::{CancelToken, INTERRUPT_POLL};
use crate::error::{Result, TaskError};
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Successful barrier passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWait {
    /// Whether this party was the last arrival and ran the hand-off.
    pub is_leader: bool,
    /// Index of the generation that just completed.
    pub generation: u64,
}

struct Generation {
    id: u64,
    broken: AtomicBool,
}

impl Generation {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Generation {
            id,
            broken: AtomicBool::new(false),
        })
    }
}

struct BarrierState {
    arrived: usize,
    generation: Arc<Generation>,
}

/// A reusable synchronization point for a fixed-size cohort.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use threadmill::RendezvousBarrier;
///
/// let barrier = Arc::new(RendezvousBarrier::new(3));
/// for _ in 0..3 {
///     let barrier = barrier.clone();
///     std::thread::spawn(move || {
///         barrier.wait().unwrap();
///     });
/// }
/// ```
pub struct RendezvousBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cond: Condvar,
    action: Option<Box<dyn Fn() + Send + Sync>>,
}

impl RendezvousBarrier {
    /// Creates a barrier for `parties` participants.
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "a barrier needs at least one party");
        RendezvousBarrier {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: Generation::new(0),
            }),
            cond: Condvar::new(),
            action: None,
        }
    }

    /// Creates a barrier whose last arrival runs `action` before the
    /// cohort is released. The action runs exactly once per generation.
    pub fn with_action<F>(parties: usize, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut barrier = Self::new(parties);
        barrier.action = Some(Box::new(action));
        barrier
    }

    /// Arrives at the barrier and blocks until the cohort is complete.
    pub fn wait(&self) -> Result<BarrierWait> {
        self.wait_inner(None, None)
    }

    /// Bounded [`wait`](Self::wait). A timeout breaks the generation: the
    /// timed-out party gets [`TaskError::Timeout`], everyone else waiting
    /// gets [`TaskError::BrokenBarrier`].
    pub fn wait_timeout(&self, timeout: Duration) -> Result<BarrierWait> {
        self.wait_inner(Some(Instant::now() + timeout), None)
    }

    /// [`wait`](Self::wait) that aborts when `token` is cancelled,
    /// breaking the generation and returning [`TaskError::Interrupted`].
    pub fn wait_interruptibly(&self, token: &CancelToken) -> Result<BarrierWait> {
        self.wait_inner(None, Some(token))
    }

    /// Breaks the current generation — waiting parties fail with
    /// [`TaskError::BrokenBarrier`] — and starts a fresh, usable one.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        self.break_generation(&mut state);
        let next = state.generation.id + 1;
        state.generation = Generation::new(next);
        state.arrived = 0;
    }

    /// Number of parties required to trip the barrier.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Number of parties currently blocked in `wait`.
    pub fn waiting(&self) -> usize {
        self.state.lock().arrived
    }

    /// Whether the current generation is broken.
    pub fn is_broken(&self) -> bool {
        self.state
            .lock()
            .generation
            .broken
            .load(Ordering::Acquire)
    }

    fn wait_inner(
        &self,
        deadline: Option<Instant>,
        token: Option<&CancelToken>,
    ) -> Result<BarrierWait> {
        let mut state = self.state.lock();
        if state.generation.broken.load(Ordering::Acquire) {
            return Err(TaskError::BrokenBarrier);
        }
        let generation = state.generation.clone();
        state.arrived += 1;

        if state.arrived == self.parties {
            // Leader trips the generation: hand-off first, then release.
            if let Some(action) = &self.action {
                if catch_unwind(AssertUnwindSafe(|| action())).is_err() {
                    tracing::warn!("barrier hand-off action panicked; generation broken");
                    self.break_generation(&mut state);
                    return Err(TaskError::BrokenBarrier);
                }
            }
            state.arrived = 0;
            state.generation = Generation::new(generation.id + 1);
            self.cond.notify_all();
            return Ok(BarrierWait {
                is_leader: true,
                generation: generation.id,
            });
        }

        loop {
            if token.is_some() {
                self.cond.wait_for(&mut state, INTERRUPT_POLL);
            } else if let Some(deadline) = deadline {
                self.cond.wait_until(&mut state, deadline);
            } else {
                self.cond.wait(&mut state);
            }

            if generation.broken.load(Ordering::Acquire) {
                return Err(TaskError::BrokenBarrier);
            }
            if !Arc::ptr_eq(&state.generation, &generation) {
                return Ok(BarrierWait {
                    is_leader: false,
                    generation: generation.id,
                });
            }
            if let Some(token) = token {
                if token.is_cancelled() {
                    self.break_generation(&mut state);
                    return Err(TaskError::Interrupted);
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.break_generation(&mut state);
                    return Err(TaskError::Timeout);
                }
            }
        }
    }

    fn break_generation(&self, state: &mut BarrierState) {
        state.generation.broken.store(true, Ordering::Release);
        state.arrived = 0;
        self.cond.notify_all();
    }
}
