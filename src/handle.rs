//! Completion handles: one-shot, write-once result cells for submitted tasks.
//!
//! A handle starts *pending* and transitions exactly once to *completed*,
//! *failed* or *cancelled*. The transition is monotonic: once terminal, the
//! state never changes again and late writes are discarded. One writer (the
//! executing worker, or an external completer), any number of readers.

use crate::cancel::{CancelToken, INTERRUPT_POLL};
use crate::error::{Result, TaskError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Terminal outcome of a task.
pub(crate) enum Outcome<T> {
    Completed(T),
    Failed(TaskError),
    Cancelled,
}

enum State<T> {
    Pending { started: bool },
    Done(Outcome<T>),
}

type Callback<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

struct Cell<T> {
    state: State<T>,
    callbacks: Vec<Callback<T>>,
}

struct Inner<T> {
    cell: Mutex<Cell<T>>,
    cond: Condvar,
    token: CancelToken,
}

/// A future-like handle observing the result of a submitted task.
///
/// Cloning yields another view of the same result cell. Reading the value
/// requires `T: Clone` since many readers may retrieve it.
///
/// # Example
///
/// ```
/// use threadmill::ThreadPool;
///
/// let pool = ThreadPool::fixed(2);
/// let handle = pool.submit(|| 21 * 2).unwrap();
/// assert_eq!(handle.get().unwrap(), 42);
/// ```
pub struct CompletionHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CompletionHandle<T> {
    fn clone(&self) -> Self {
        CompletionHandle {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for CompletionHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

impl<T> CompletionHandle<T> {
    /// Creates an externally completable handle (a promise): it stays
    /// pending until `complete` or `fail` is called on it.
    pub fn new_incomplete() -> Self {
        Self::with_token(CancelToken::new())
    }

    pub(crate) fn with_token(token: CancelToken) -> Self {
        CompletionHandle {
            inner: Arc::new(Inner {
                cell: Mutex::new(Cell {
                    state: State::Pending { started: false },
                    callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
                token,
            }),
        }
    }

    /// The cancellation token associated with this handle's task.
    pub fn token(&self) -> &CancelToken {
        &self.inner.token
    }

    /// Completes the handle with a value. Returns false if it was already
    /// terminal (the value is discarded).
    pub fn complete(&self, value: T) -> bool {
        self.finish(Outcome::Completed(value))
    }

    /// Fails the handle with an error. Returns false if already terminal.
    pub fn fail(&self, error: TaskError) -> bool {
        self.finish(Outcome::Failed(error))
    }

    /// Whether the handle has reached a terminal state.
    pub fn is_done(&self) -> bool {
        matches!(self.inner.cell.lock().state, State::Done(_))
    }

    /// Whether the handle terminated as cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.inner.cell.lock().state,
            State::Done(Outcome::Cancelled)
        )
    }

    /// Attempts to cancel the task behind this handle.
    ///
    /// A task that has not started is cancelled outright. A running task
    /// leaves this handle cancelled immediately (its eventual result is
    /// discarded) and, when `interrupt_if_running` is set, has its
    /// cancellation token signalled — the body must observe the token to
    /// actually stop. Returns false if the handle was already terminal.
    pub fn cancel(&self, interrupt_if_running: bool) -> bool {
        let mut guard = self.inner.cell.lock();
        let cell = &mut *guard;
        let started = match cell.state {
            State::Done(_) => return false,
            State::Pending { started } => started,
        };
        cell.state = State::Done(Outcome::Cancelled);
        if started && interrupt_if_running {
            self.inner.token.cancel();
        }
        let callbacks = std::mem::take(&mut cell.callbacks);
        self.inner.cond.notify_all();
        if let State::Done(outcome) = &cell.state {
            for cb in callbacks {
                cb(outcome);
            }
        }
        true
    }

    /// Blocks until the handle is terminal, ignoring the outcome.
    pub fn wait_done(&self) {
        let mut cell = self.inner.cell.lock();
        while matches!(cell.state, State::Pending { .. }) {
            self.inner.cond.wait(&mut cell);
        }
    }

    /// Bounded `wait_done`. Returns whether the handle became terminal.
    pub fn wait_done_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cell = self.inner.cell.lock();
        while matches!(cell.state, State::Pending { .. }) {
            if self.inner.cond.wait_until(&mut cell, deadline).timed_out() {
                return matches!(cell.state, State::Done(_));
            }
        }
        true
    }

    /// Marks the task as started. Returns false if the handle already went
    /// terminal (a queued task cancelled before a worker claimed it).
    pub(crate) fn try_start(&self) -> bool {
        let mut cell = self.inner.cell.lock();
        match &mut cell.state {
            State::Pending { started } => {
                *started = true;
                true
            }
            State::Done(_) => false,
        }
    }

    /// Registers a callback to run once the handle is terminal. Runs
    /// immediately (on the calling thread) if it already is; otherwise on
    /// the thread that performs the terminal transition.
    pub(crate) fn register_callback(&self, cb: Callback<T>) {
        let mut guard = self.inner.cell.lock();
        let cell = &mut *guard;
        match &cell.state {
            State::Done(outcome) => cb(outcome),
            State::Pending { .. } => cell.callbacks.push(cb),
        }
    }

    fn finish(&self, outcome: Outcome<T>) -> bool {
        let mut guard = self.inner.cell.lock();
        let cell = &mut *guard;
        if matches!(cell.state, State::Done(_)) {
            return false;
        }
        cell.state = State::Done(outcome);
        let callbacks = std::mem::take(&mut cell.callbacks);
        self.inner.cond.notify_all();
        if let State::Done(outcome) = &cell.state {
            for cb in callbacks {
                cb(outcome);
            }
        }
        true
    }
}

impl<T: Clone> CompletionHandle<T> {
    /// Blocks until terminal, then returns the value or re-raises the
    /// failure. Unbounded.
    pub fn get(&self) -> Result<T> {
        let mut cell = self.inner.cell.lock();
        loop {
            if let State::Done(outcome) = &cell.state {
                return read_outcome(outcome);
            }
            self.inner.cond.wait(&mut cell);
        }
    }

    /// Bounded `get`. Fails with [`TaskError::Timeout`] if still pending at
    /// the deadline; the underlying task keeps running and a later
    /// unbounded `get` still observes its eventual result.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut cell = self.inner.cell.lock();
        loop {
            if let State::Done(outcome) = &cell.state {
                return read_outcome(outcome);
            }
            if self.inner.cond.wait_until(&mut cell, deadline).timed_out() {
                if let State::Done(outcome) = &cell.state {
                    return read_outcome(outcome);
                }
                return Err(TaskError::Timeout);
            }
        }
    }

    /// Blocking `get` that aborts with [`TaskError::Interrupted`] when the
    /// given token is cancelled.
    pub fn get_interruptibly(&self, token: &CancelToken) -> Result<T> {
        let mut cell = self.inner.cell.lock();
        loop {
            if let State::Done(outcome) = &cell.state {
                return read_outcome(outcome);
            }
            if token.is_cancelled() {
                return Err(TaskError::Interrupted);
            }
            self.inner.cond.wait_for(&mut cell, INTERRUPT_POLL);
        }
    }

    /// Non-blocking read: the result if terminal and successful, the given
    /// default if still pending, the parked error if failed or cancelled.
    pub fn poll(&self, default: T) -> Result<T> {
        let cell = self.inner.cell.lock();
        match &cell.state {
            State::Pending { .. } => Ok(default),
            State::Done(outcome) => read_outcome(outcome),
        }
    }
}

impl<T: Clone + Send + 'static> CompletionHandle<T> {
    /// Blocking read that panics on failure instead of returning an error.
    /// The unchecked sibling of `get`, for call sites that treat failure as
    /// a bug.
    pub fn join(&self) -> T {
        self.get()
            .unwrap_or_else(|e| panic!("completion handle failed: {e}"))
    }

    /// Returns a dependent handle completed with `f(value)` once this one
    /// completes. Failures and cancellations propagate unchanged. The
    /// transform runs on the thread that completes this handle.
    pub fn then_apply<U, F>(&self, f: F) -> CompletionHandle<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let derived = CompletionHandle::new_incomplete();
        let out = derived.clone();
        self.register_callback(Box::new(move |outcome| match outcome {
            Outcome::Completed(value) => {
                let value = value.clone();
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(value))) {
                    Ok(mapped) => {
                        out.complete(mapped);
                    }
                    Err(payload) => {
                        out.fail(TaskError::ExecutionFailure(panic_message(&payload)));
                    }
                }
            }
            Outcome::Failed(error) => {
                out.fail(error.clone());
            }
            Outcome::Cancelled => {
                out.finish(Outcome::Cancelled);
            }
        }));
        derived
    }

    /// Returns a dependent handle that recovers from failure: a successful
    /// value passes through, a failure (or cancellation, observed as
    /// [`TaskError::Cancelled`]) is replaced by `f(error)`.
    pub fn on_failure<F>(&self, f: F) -> CompletionHandle<T>
    where
        F: FnOnce(&TaskError) -> T + Send + 'static,
    {
        let derived = CompletionHandle::new_incomplete();
        let out = derived.clone();
        self.register_callback(Box::new(move |outcome| {
            let recovered = match outcome {
                Outcome::Completed(value) => {
                    out.complete(value.clone());
                    return;
                }
                Outcome::Failed(error) => {
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(error)))
                }
                Outcome::Cancelled => std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                    || f(&TaskError::Cancelled),
                )),
            };
            match recovered {
                Ok(value) => {
                    out.complete(value);
                }
                Err(payload) => {
                    out.fail(TaskError::ExecutionFailure(panic_message(&payload)));
                }
            }
        }));
        derived
    }

    /// Forces this handle into the failed state with [`TaskError::Timeout`]
    /// if it is still pending after `timeout`. A short-lived timer thread is
    /// armed per call; there is no shared background delayer.
    pub fn or_timeout(&self, timeout: Duration) -> CompletionHandle<T> {
        if !self.is_done() {
            let watched = self.clone();
            std::thread::spawn(move || {
                std::thread::sleep(timeout);
                watched.fail(TaskError::Timeout);
            });
        }
        self.clone()
    }
}

/// Returns a handle that completes once every input handle completes, or
/// fails as soon as any input fails — propagating only the first observed
/// failure (a cancelled input counts as [`TaskError::Cancelled`]). An empty
/// slice yields an already-completed handle.
pub fn all_of<T>(handles: &[CompletionHandle<T>]) -> CompletionHandle<()> {
    let combined = CompletionHandle::new_incomplete();
    if handles.is_empty() {
        combined.complete(());
        return combined;
    }
    let remaining = Arc::new(AtomicUsize::new(handles.len()));
    for handle in handles {
        let out = combined.clone();
        let remaining = remaining.clone();
        handle.register_callback(Box::new(move |outcome| match outcome {
            Outcome::Completed(_) => {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    out.complete(());
                }
            }
            Outcome::Failed(error) => {
                out.fail(error.clone());
            }
            Outcome::Cancelled => {
                out.fail(TaskError::Cancelled);
            }
        }));
    }
    combined
}

fn read_outcome<T: Clone>(outcome: &Outcome<T>) -> Result<T> {
    match outcome {
        Outcome::Completed(value) => Ok(value.clone()),
        Outcome::Failed(error) => Err(error.clone()),
        Outcome::Cancelled => Err(TaskError::Cancelled),
    }
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
