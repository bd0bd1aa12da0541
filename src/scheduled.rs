//! Delayed and periodic task execution.
//!
//! The scheduled pool keeps a time-ordered heap keyed by next-fire instant
//! (not a FIFO) and a set of workers that sleep until the head entry is
//! due. Periodic entries re-arm themselves; the two flavors differ in when:
//!
//! - fixed-rate re-arms at dispatch time for `fire_at + period`, so the
//!   nominal schedule never drifts. With two or more workers an overrunning
//!   execution may overlap its successor; a single-worker pool serializes
//!   and late firings queue up back-to-back. Nominal fire order is
//!   preserved either way.
//! - fixed-delay re-arms after the run finishes for `now + delay`, so an
//!   entry never overlaps itself.

use crate::cancel::CancelToken;
use crate::error::{Result, TaskError};
use crate::handle::CompletionHandle;
use crate::task::{Job, wrap_task};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Handle to a periodic schedule. Cancelling stops future firings; an
/// execution already in flight finishes on its own.
#[derive(Clone)]
pub struct ScheduledHandle {
    token: CancelToken,
}

impl ScheduledHandle {
    /// Stops future firings of the periodic task.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the schedule has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Clone)]
struct PeriodicTask {
    run: Arc<dyn Fn() + Send + Sync>,
    token: CancelToken,
}

enum EntryKind {
    Once(Job),
    FixedRate { period: Duration, task: PeriodicTask },
    FixedDelay { delay: Duration, task: PeriodicTask },
}

struct Entry {
    fire_at: Instant,
    seq: u64,
    kind: EntryKind,
}

// Min-heap by (fire_at, seq) on top of std's max-heap. The sequence number
// breaks ties so equal fire times pop in arming order.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for Entry {}

struct SchedQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct SchedShared {
    queue: Mutex<SchedQueue>,
    cond: Condvar,
    live: Mutex<usize>,
    all_exited: Condvar,
}

/// A pool executing tasks after a delay, or periodically.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use threadmill::ScheduledPool;
///
/// let pool = ScheduledPool::new(2);
/// let handle = pool
///     .schedule(|| "fired", Duration::from_millis(100))
///     .unwrap();
/// assert_eq!(handle.get().unwrap(), "fired");
/// ```
pub struct ScheduledPool {
    shared: Arc<SchedShared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ScheduledPool {
    /// Creates a scheduled pool with the given number of workers.
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "a scheduled pool needs at least one worker");
        let shared = Arc::new(SchedShared {
            queue: Mutex::new(SchedQueue {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
            live: Mutex::new(workers),
            all_exited: Condvar::new(),
        });
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let shared = shared.clone();
            handles.push(thread::spawn(move || {
                run_loop(&shared);
                let mut live = shared.live.lock();
                *live -= 1;
                if *live == 0 {
                    shared.all_exited.notify_all();
                }
            }));
        }
        ScheduledPool {
            shared,
            workers: Mutex::new(handles),
        }
    }

    /// Runs `task` once after `delay`. The returned handle can be read,
    /// timed out on, or cancelled like any other submission.
    pub fn schedule<T, F>(&self, task: F, delay: Duration) -> Result<CompletionHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (job, handle) = wrap_task(move |_token| task());
        self.push(Instant::now() + delay, EntryKind::Once(job))?;
        Ok(handle)
    }

    /// Runs `task` at `initial_delay`, then every `period` measured from
    /// the previous *nominal* fire time — an overrunning execution does not
    /// shift the schedule. See the module docs for the overlap policy. A
    /// panicking execution suppresses all further firings.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let task = PeriodicTask {
            run: Arc::new(task),
            token: CancelToken::new(),
        };
        let handle = ScheduledHandle {
            token: task.token.clone(),
        };
        self.push(
            Instant::now() + initial_delay,
            EntryKind::FixedRate { period, task },
        )?;
        Ok(handle)
    }

    /// Runs `task` at `initial_delay`, then again `delay` after the *end*
    /// of each run. Never overlaps itself. A panicking execution suppresses
    /// all further firings.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        task: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let task = PeriodicTask {
            run: Arc::new(task),
            token: CancelToken::new(),
        };
        let handle = ScheduledHandle {
            token: task.token.clone(),
        };
        self.push(
            Instant::now() + initial_delay,
            EntryKind::FixedDelay { delay, task },
        )?;
        Ok(handle)
    }

    /// Stops accepting new schedules and drops periodic entries. One-shot
    /// entries already armed still run at their due time. Returns
    /// immediately and never joins, so it is safe to call from inside a
    /// scheduled task.
    pub fn shutdown(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            return;
        }
        queue.shutdown = true;
        let one_shots: BinaryHeap<Entry> = queue
            .heap
            .drain()
            .filter(|entry| matches!(entry.kind, EntryKind::Once(_)))
            .collect();
        queue.heap = one_shots;
        self.shared.cond.notify_all();
        tracing::debug!("scheduled pool shut down");
    }

    /// Blocks up to `timeout` and reports whether every worker has exited.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = self.shared.live.lock();
        while *live > 0 {
            if self
                .shared
                .all_exited
                .wait_until(&mut live, deadline)
                .timed_out()
            {
                return *live == 0;
            }
        }
        true
    }

    fn push(&self, fire_at: Instant, kind: EntryKind) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            return Err(TaskError::PoolShutDown);
        }
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Entry { fire_at, seq, kind });
        self.shared.cond.notify_one();
        Ok(())
    }
}

impl Drop for ScheduledPool {
    fn drop(&mut self) {
        self.shutdown();
        for handle in self.workers.get_mut().drain(..) {
            if handle.join().is_err() {
                tracing::error!("scheduled worker thread panicked");
            }
        }
    }
}

fn run_loop(shared: &SchedShared) {
    loop {
        let mut queue = shared.queue.lock();
        let entry = loop {
            if queue.shutdown && queue.heap.is_empty() {
                return;
            }
            let now = Instant::now();
            match queue.heap.peek() {
                None => {
                    shared.cond.wait(&mut queue);
                }
                Some(head) if head.fire_at <= now => break queue.heap.pop().unwrap(),
                Some(head) => {
                    let due = head.fire_at;
                    shared.cond.wait_until(&mut queue, due);
                }
            }
        };
        drop(queue);
        dispatch(shared, entry);
    }
}

fn dispatch(shared: &SchedShared, entry: Entry) {
    match entry.kind {
        EntryKind::Once(job) => job.execute(),
        EntryKind::FixedRate { period, task } => {
            if task.token.is_cancelled() {
                return;
            }
            // Re-arm before running so an overrun cannot delay the nominal
            // schedule.
            rearm(
                shared,
                entry.fire_at + period,
                EntryKind::FixedRate {
                    period,
                    task: task.clone(),
                },
            );
            run_periodic(&task);
        }
        EntryKind::FixedDelay { delay, task } => {
            if task.token.is_cancelled() {
                return;
            }
            run_periodic(&task);
            if !task.token.is_cancelled() {
                rearm(
                    shared,
                    Instant::now() + delay,
                    EntryKind::FixedDelay { delay, task },
                );
            }
        }
    }
}

fn run_periodic(task: &PeriodicTask) {
    if catch_unwind(AssertUnwindSafe(|| (task.run)())).is_err() {
        tracing::warn!("periodic task panicked; further executions suppressed");
        task.token.cancel();
    }
}

fn rearm(shared: &SchedShared, fire_at: Instant, kind: EntryKind) {
    let mut queue = shared.queue.lock();
    // Periodic work does not continue past shutdown.
    if queue.shutdown {
        return;
    }
    let seq = queue.next_seq;
    queue.next_seq += 1;
    queue.heap.push(Entry { fire_at, seq, kind });
    shared.cond.notify_one();
}
