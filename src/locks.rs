//! Owner-checked mutual-exclusion locks.
//!
//! Unlike RAII guards, these locks expose explicit `lock`/`unlock` pairs so
//! they can enforce the owner contract: unlocking from a thread that does
//! not hold the lock is a [`TaskError::LockState`] error, fatal to the call
//! but not to the lock. Three variants:
//!
//! - [`ExclusiveLock`] — plain, non-reentrant exclusion. A second acquire
//!   by the owner is reported as an error rather than self-deadlocking.
//! - [`ReentrantLock`] — re-acquirable by its owner via a hold count, with
//!   a fair (strict FIFO ticket queue) or unfair (bargers welcome) mode.
//! - [`SharedLock`] — read/write lock with writer preference: once a
//!   writer is waiting, new readers block, bounding writer starvation.
//!
//! Deadlock avoidance across multiple locks is a caller responsibility;
//! acquire locks in a consistent order.

use crate::Fairness;
use crate::cancel::{CancelToken, INTERRUPT_POLL};
use crate::error::{Result, TaskError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

fn lock_state_err(message: &str) -> TaskError {
    TaskError::LockState(message.to_string())
}

/// A non-reentrant exclusive lock with owner checking.
///
/// # Example
///
/// ```
/// use threadmill::ExclusiveLock;
///
/// let lock = ExclusiveLock::new();
/// lock.lock().unwrap();
/// // ... touch the shared state ...
/// lock.unlock().unwrap();
/// ```
pub struct ExclusiveLock {
    owner: Mutex<Option<ThreadId>>,
    cond: Condvar,
}

impl ExclusiveLock {
    pub fn new() -> Self {
        ExclusiveLock {
            owner: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Blocks until the lock is acquired. Unbounded. Re-acquiring from the
    /// owning thread is an error, not a deadlock.
    pub fn lock(&self) -> Result<()> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if *owner == Some(me) {
            return Err(lock_state_err("exclusive lock is not reentrant"));
        }
        while owner.is_some() {
            self.cond.wait(&mut owner);
        }
        *owner = Some(me);
        Ok(())
    }

    /// Acquires without blocking; returns whether the lock was taken.
    pub fn try_lock(&self) -> bool {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return false;
        }
        *owner = Some(thread::current().id());
        true
    }

    /// Bounded blocking acquire. Returns whether the lock was taken.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut owner = self.owner.lock();
        if *owner == Some(me) {
            return Err(lock_state_err("exclusive lock is not reentrant"));
        }
        while owner.is_some() {
            if self.cond.wait_until(&mut owner, deadline).timed_out() && owner.is_some() {
                return Ok(false);
            }
        }
        *owner = Some(me);
        Ok(true)
    }

    /// Blocking acquire that aborts with [`TaskError::Interrupted`] when
    /// `token` is cancelled.
    pub fn lock_interruptibly(&self, token: &CancelToken) -> Result<()> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        if *owner == Some(me) {
            return Err(lock_state_err("exclusive lock is not reentrant"));
        }
        while owner.is_some() {
            if token.is_cancelled() {
                return Err(TaskError::Interrupted);
            }
            self.cond.wait_for(&mut owner, INTERRUPT_POLL);
        }
        *owner = Some(me);
        Ok(())
    }

    /// Releases the lock. Fails if the calling thread is not the owner.
    pub fn unlock(&self) -> Result<()> {
        let mut owner = self.owner.lock();
        if *owner != Some(thread::current().id()) {
            return Err(lock_state_err("unlock by non-owner"));
        }
        *owner = None;
        self.cond.notify_one();
        Ok(())
    }

    /// Whether any thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }
}

impl Default for ExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

struct ReentrantState {
    owner: Option<ThreadId>,
    holds: usize,
    /// Arrival tickets of waiting threads, FIFO. Only used in fair mode.
    queue: VecDeque<u64>,
    next_ticket: u64,
}

/// An exclusive lock re-acquirable by its current owner.
///
/// Each acquire by the owner bumps a hold count; the lock is free again
/// only when the count returns to zero. In [`Fairness::Fair`] mode the
/// longest-waiting thread acquires next; in [`Fairness::Unfair`] mode any
/// contender — including one that just released — may barge in, trading
/// starvation risk for throughput.
pub struct ReentrantLock {
    state: Mutex<ReentrantState>,
    cond: Condvar,
    fairness: Fairness,
}

impl ReentrantLock {
    pub fn new(fairness: Fairness) -> Self {
        ReentrantLock {
            state: Mutex::new(ReentrantState {
                owner: None,
                holds: 0,
                queue: VecDeque::new(),
                next_ticket: 0,
            }),
            cond: Condvar::new(),
            fairness,
        }
    }

    /// Blocks until the lock is acquired. Re-entry by the owner returns
    /// immediately with the hold count bumped.
    pub fn lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.holds += 1;
            return;
        }
        match self.fairness {
            Fairness::Fair => {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.queue.push_back(ticket);
                while state.owner.is_some() || state.queue.front() != Some(&ticket) {
                    self.cond.wait(&mut state);
                }
                state.queue.pop_front();
            }
            Fairness::Unfair => {
                while state.owner.is_some() {
                    self.cond.wait(&mut state);
                }
            }
        }
        state.owner = Some(me);
        state.holds = 1;
    }

    /// Acquires without blocking. In fair mode the attempt respects the
    /// wait queue and fails while anyone is queued ahead.
    pub fn try_lock(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.holds += 1;
            return true;
        }
        let free = state.owner.is_none()
            && (self.fairness == Fairness::Unfair || state.queue.is_empty());
        if free {
            state.owner = Some(me);
            state.holds = 1;
        }
        free
    }

    /// Bounded blocking acquire. Returns whether the lock was taken.
    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.holds += 1;
            return true;
        }
        match self.fairness {
            Fairness::Fair => {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.queue.push_back(ticket);
                while state.owner.is_some() || state.queue.front() != Some(&ticket) {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        let acquirable =
                            state.owner.is_none() && state.queue.front() == Some(&ticket);
                        if acquirable {
                            break;
                        }
                        state.queue.retain(|t| *t != ticket);
                        self.cond.notify_all();
                        return false;
                    }
                }
                state.queue.pop_front();
            }
            Fairness::Unfair => {
                while state.owner.is_some() {
                    if self.cond.wait_until(&mut state, deadline).timed_out()
                        && state.owner.is_some()
                    {
                        return false;
                    }
                }
            }
        }
        state.owner = Some(me);
        state.holds = 1;
        true
    }

    /// Blocking acquire that aborts with [`TaskError::Interrupted`] when
    /// `token` is cancelled.
    pub fn lock_interruptibly(&self, token: &CancelToken) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.holds += 1;
            return Ok(());
        }
        match self.fairness {
            Fairness::Fair => {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.queue.push_back(ticket);
                while state.owner.is_some() || state.queue.front() != Some(&ticket) {
                    if token.is_cancelled() {
                        state.queue.retain(|t| *t != ticket);
                        self.cond.notify_all();
                        return Err(TaskError::Interrupted);
                    }
                    self.cond.wait_for(&mut state, INTERRUPT_POLL);
                }
                state.queue.pop_front();
            }
            Fairness::Unfair => {
                while state.owner.is_some() {
                    if token.is_cancelled() {
                        return Err(TaskError::Interrupted);
                    }
                    self.cond.wait_for(&mut state, INTERRUPT_POLL);
                }
            }
        }
        state.owner = Some(me);
        state.holds = 1;
        Ok(())
    }

    /// Releases one hold. The lock frees (and a waiter is admitted) only
    /// when the count reaches zero. Fails for non-owners.
    pub fn unlock(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.owner != Some(thread::current().id()) {
            return Err(lock_state_err("unlock by non-owner"));
        }
        state.holds -= 1;
        if state.holds == 0 {
            state.owner = None;
            self.cond.notify_all();
        }
        Ok(())
    }

    /// The calling thread's hold count (zero if it is not the owner).
    pub fn hold_count(&self) -> usize {
        let state = self.state.lock();
        if state.owner == Some(thread::current().id()) {
            state.holds
        } else {
            0
        }
    }

    pub fn fairness(&self) -> Fairness {
        self.fairness
    }
}

struct SharedState {
    readers: usize,
    writer: Option<ThreadId>,
    waiting_writers: usize,
}

/// A read/write lock: many concurrent readers, one exclusive writer.
///
/// Writer preference: once a writer is waiting, new read acquires block
/// until the writer has come and gone. Readers and the writer are never
/// both active. Lock downgrading (taking the read lock while holding the
/// write lock) is not supported and is reported as an error.
pub struct SharedLock {
    state: Mutex<SharedState>,
    readers_cond: Condvar,
    writers_cond: Condvar,
}

impl SharedLock {
    pub fn new() -> Self {
        SharedLock {
            state: Mutex::new(SharedState {
                readers: 0,
                writer: None,
                waiting_writers: 0,
            }),
            readers_cond: Condvar::new(),
            writers_cond: Condvar::new(),
        }
    }

    /// Acquires shared read access. Blocks while a writer holds the lock
    /// or is waiting for it.
    pub fn read_lock(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.writer == Some(me) {
            return Err(lock_state_err("read while holding the write lock"));
        }
        while state.writer.is_some() || state.waiting_writers > 0 {
            self.readers_cond.wait(&mut state);
        }
        state.readers += 1;
        Ok(())
    }

    /// Non-blocking read acquire.
    pub fn try_read_lock(&self) -> bool {
        let mut state = self.state.lock();
        if state.writer.is_some() || state.waiting_writers > 0 {
            return false;
        }
        state.readers += 1;
        true
    }

    /// Bounded read acquire. Returns whether read access was granted.
    pub fn try_read_lock_for(&self, timeout: Duration) -> Result<bool> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if state.writer == Some(me) {
            return Err(lock_state_err("read while holding the write lock"));
        }
        while state.writer.is_some() || state.waiting_writers > 0 {
            if self.readers_cond.wait_until(&mut state, deadline).timed_out()
                && (state.writer.is_some() || state.waiting_writers > 0)
            {
                return Ok(false);
            }
        }
        state.readers += 1;
        Ok(true)
    }

    /// Releases one reader. Fails if no readers are active.
    pub fn read_unlock(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.readers == 0 {
            return Err(lock_state_err("read unlock with no readers active"));
        }
        state.readers -= 1;
        if state.readers == 0 {
            self.writers_cond.notify_one();
        }
        Ok(())
    }

    /// Acquires exclusive write access. Blocks until all readers have left
    /// and no other writer is active.
    pub fn write_lock(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.writer == Some(me) {
            return Err(lock_state_err("write lock is not reentrant"));
        }
        state.waiting_writers += 1;
        while state.readers > 0 || state.writer.is_some() {
            self.writers_cond.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = Some(me);
        Ok(())
    }

    /// Non-blocking write acquire.
    pub fn try_write_lock(&self) -> bool {
        let mut state = self.state.lock();
        if state.readers > 0 || state.writer.is_some() {
            return false;
        }
        state.writer = Some(thread::current().id());
        true
    }

    /// Bounded write acquire. Returns whether write access was granted.
    pub fn try_write_lock_for(&self, timeout: Duration) -> Result<bool> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if state.writer == Some(me) {
            return Err(lock_state_err("write lock is not reentrant"));
        }
        state.waiting_writers += 1;
        while state.readers > 0 || state.writer.is_some() {
            if self.writers_cond.wait_until(&mut state, deadline).timed_out()
                && (state.readers > 0 || state.writer.is_some())
            {
                state.waiting_writers -= 1;
                if state.waiting_writers == 0 {
                    self.readers_cond.notify_all();
                }
                return Ok(false);
            }
        }
        state.waiting_writers -= 1;
        state.writer = Some(me);
        Ok(true)
    }

    /// Releases the write lock. Fails for non-owners.
    pub fn write_unlock(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.writer != Some(thread::current().id()) {
            return Err(lock_state_err("write unlock by non-owner"));
        }
        state.writer = None;
        if state.waiting_writers > 0 {
            self.writers_cond.notify_one();
        } else {
            self.readers_cond.notify_all();
        }
        Ok(())
    }

    /// Number of readers currently holding the lock.
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers
    }

    /// Whether a writer currently holds the lock.
    pub fn has_writer(&self) -> bool {
        self.state.lock().writer.is_some()
    }
}

impl Default for SharedLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_exclusive_lock_basic() {
        let lock = ExclusiveLock::new();
        lock.lock().unwrap();
        assert!(lock.is_locked());
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_exclusive_lock_rejects_owner_reacquire() {
        let lock = ExclusiveLock::new();
        lock.lock().unwrap();
        assert!(matches!(lock.lock(), Err(TaskError::LockState(_))));
        lock.unlock().unwrap();
    }

    #[test]
    fn test_unlock_by_non_owner_fails() {
        let lock = Arc::new(ExclusiveLock::new());
        lock.lock().unwrap();
        let intruder = lock.clone();
        let result = thread::spawn(move || intruder.unlock()).join().unwrap();
        assert!(matches!(result, Err(TaskError::LockState(_))));
        // the lock is still held and usable
        assert!(lock.is_locked());
        lock.unlock().unwrap();
    }

    #[test]
    fn test_exclusive_try_lock_for_times_out() {
        let lock = Arc::new(ExclusiveLock::new());
        lock.lock().unwrap();
        let contender = lock.clone();
        let acquired = thread::spawn(move || {
            contender.try_lock_for(Duration::from_millis(20)).unwrap()
        })
        .join()
        .unwrap();
        assert!(!acquired);
        lock.unlock().unwrap();
    }

    #[test]
    fn test_lock_interruptibly_aborts() {
        let lock = Arc::new(ExclusiveLock::new());
        lock.lock().unwrap();
        let token = CancelToken::new();
        let contender = lock.clone();
        let contender_token = token.clone();
        let waiter = thread::spawn(move || contender.lock_interruptibly(&contender_token));
        thread::sleep(Duration::from_millis(10));
        token.cancel();
        assert_eq!(waiter.join().unwrap(), Err(TaskError::Interrupted));
        lock.unlock().unwrap();
    }

    #[test]
    fn test_reentrant_lock_needs_matching_unlocks() {
        let lock = Arc::new(ReentrantLock::new(Fairness::Unfair));
        lock.lock();
        lock.lock();
        assert_eq!(lock.hold_count(), 2);

        let contender = lock.clone();
        let acquired = Arc::new(AtomicBool::new(false));
        let saw = acquired.clone();
        let waiter = thread::spawn(move || {
            contender.lock();
            saw.store(true, Ordering::SeqCst);
            contender.unlock().unwrap();
        });

        lock.unlock().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst), "freed after one unlock");
        lock.unlock().unwrap();
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fair_lock_grants_in_arrival_order() {
        let lock = Arc::new(ReentrantLock::new(Fairness::Fair));
        let order = Arc::new(Mutex::new(Vec::new()));
        lock.lock();

        let mut joins = Vec::new();
        for i in 0..4 {
            let lock = lock.clone();
            let order = order.clone();
            joins.push(thread::spawn(move || {
                lock.lock();
                order.lock().push(i);
                lock.unlock().unwrap();
            }));
            // let each contender enqueue before the next arrives
            thread::sleep(Duration::from_millis(20));
        }

        lock.unlock().unwrap();
        for join in joins {
            join.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_shared_lock_allows_concurrent_readers() {
        let lock = Arc::new(SharedLock::new());
        lock.read_lock().unwrap();
        let second = lock.clone();
        let ok = thread::spawn(move || {
            let ok = second.try_read_lock();
            if ok {
                second.read_unlock().unwrap();
            }
            ok
        })
        .join()
        .unwrap();
        assert!(ok);
        assert!(lock.reader_count() >= 1);
        lock.read_unlock().unwrap();
    }

    #[test]
    fn test_writer_excludes_readers() {
        let lock = Arc::new(SharedLock::new());
        lock.write_lock().unwrap();
        assert!(!lock.try_read_lock());
        let contender = lock.clone();
        let granted = thread::spawn(move || {
            contender.try_read_lock_for(Duration::from_millis(20)).unwrap()
        })
        .join()
        .unwrap();
        assert!(!granted);
        lock.write_unlock().unwrap();
        assert!(lock.try_read_lock());
        lock.read_unlock().unwrap();
    }

    #[test]
    fn test_waiting_writer_blocks_new_readers() {
        let lock = Arc::new(SharedLock::new());
        lock.read_lock().unwrap();

        let writer_lock = lock.clone();
        let writer = thread::spawn(move || {
            writer_lock.write_lock().unwrap();
            writer_lock.write_unlock().unwrap();
        });
        // wait until the writer is queued
        while {
            let waiting = lock.state.lock().waiting_writers;
            waiting == 0
        } {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(!lock.try_read_lock(), "new readers must wait behind a writer");
        lock.read_unlock().unwrap();
        writer.join().unwrap();
    }

    #[test]
    fn test_read_unlock_without_hold_fails() {
        let lock = SharedLock::new();
        assert!(matches!(lock.read_unlock(), Err(TaskError::LockState(_))));
    }
}
