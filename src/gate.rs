//! One-shot countdown gate.
//!
//! A gate starts at `N` and opens permanently once `count_down` has been
//! called `N` times. Waiters block while the count is positive; once it
//! hits zero, current and future waits return immediately. Unlike the
//! barrier, the gate is not reusable.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A one-shot synchronization point released after `N` signals.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use threadmill::CountdownGate;
///
/// let gate = Arc::new(CountdownGate::new(2));
/// let opener = gate.clone();
/// std::thread::spawn(move || {
///     opener.count_down();
///     opener.count_down();
/// });
/// gate.wait(); // returns once both signals arrived
/// ```
pub struct CountdownGate {
    count: Mutex<usize>,
    cond: Condvar,
}

impl CountdownGate {
    /// Creates a gate requiring `count` signals to open.
    pub fn new(count: usize) -> Self {
        CountdownGate {
            count: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    /// Signals one completion. Decrementing past zero is a no-op; the call
    /// that reaches zero releases every waiter.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    /// Remaining signals before the gate opens.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Blocks until the gate is open.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.cond.wait(&mut count);
        }
    }

    /// Bounded wait. Returns whether the gate opened in time; the counting
    /// parties are never affected by a waiter's timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.cond.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}
