//! Worker thread implementation.
//!
//! Workers continuously pull jobs from the pool's queue and run them to
//! completion. The queue-empty receive is the only idle suspension point;
//! task failures are captured into the task's handle before they ever reach
//! the worker loop, so one bad task never takes a worker down.

use crate::cancel::CancelToken;
use crate::task::Job;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// State shared between a pool handle and its workers.
pub(crate) struct PoolShared {
    pub(crate) receiver: Receiver<Job>,
    /// Workers currently parked in a queue receive. Drives the elastic
    /// pool's spawn-on-demand decision.
    pub(crate) idle: AtomicUsize,
    /// Workers that have been spawned and not yet exited.
    pub(crate) live: Mutex<usize>,
    pub(crate) all_exited: Condvar,
    /// Cancellation tokens of tasks currently executing, for
    /// `shutdown_now` to signal.
    pub(crate) running: Mutex<Vec<CancelToken>>,
    next_worker_id: AtomicUsize,
}

impl PoolShared {
    pub(crate) fn new(receiver: Receiver<Job>) -> Self {
        PoolShared {
            receiver,
            idle: AtomicUsize::new(0),
            live: Mutex::new(0),
            all_exited: Condvar::new(),
            running: Mutex::new(Vec::new()),
            next_worker_id: AtomicUsize::new(0),
        }
    }
}

/// A worker thread bound to a pool for its lifetime.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a worker. With `idle_timeout` set the worker retires after
    /// that long without work (elastic pools); without it the worker lives
    /// until the queue disconnects.
    pub(crate) fn spawn(shared: Arc<PoolShared>, idle_timeout: Option<Duration>) -> Self {
        let id = shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let handle = thread::spawn(move || {
            match idle_timeout {
                Some(timeout) => Worker::run_loop_elastic(id, &shared, timeout),
                None => Worker::run_loop(id, &shared),
            }
            let mut live = shared.live.lock();
            *live -= 1;
            if *live == 0 {
                shared.all_exited.notify_all();
            }
        });
        Worker {
            id,
            handle: Some(handle),
        }
    }

    /// Fixed-pool loop: block on the queue until it disconnects.
    fn run_loop(id: usize, shared: &PoolShared) {
        loop {
            shared.idle.fetch_add(1, Ordering::SeqCst);
            let received = shared.receiver.recv();
            shared.idle.fetch_sub(1, Ordering::SeqCst);
            match received {
                Ok(job) => run_job(shared, job),
                Err(_) => break,
            }
        }
        tracing::debug!(worker = id, "worker exited");
    }

    /// Elastic-pool loop: same as the fixed loop, but a receive that times
    /// out retires the worker.
    fn run_loop_elastic(id: usize, shared: &PoolShared, idle_timeout: Duration) {
        loop {
            shared.idle.fetch_add(1, Ordering::SeqCst);
            let received = shared.receiver.recv_timeout(idle_timeout);
            shared.idle.fetch_sub(1, Ordering::SeqCst);
            match received {
                Ok(job) => run_job(shared, job),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    // Never retire while work is queued: a submit that saw
                    // this worker as idle would otherwise strand its task.
                    // Once the queue is observed empty here, any later
                    // submit sees idle == 0 and spawns a replacement.
                    if !shared.receiver.is_empty() {
                        continue;
                    }
                    tracing::debug!(worker = id, "idle worker retired");
                    break;
                }
            }
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker thread to finish.
    pub(crate) fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// Executes one job, keeping its cancellation token visible to
/// `shutdown_now` for the duration.
fn run_job(shared: &PoolShared, job: Job) {
    let token = job.token().clone();
    shared.running.lock().push(token.clone());
    job.execute();
    let mut running = shared.running.lock();
    if let Some(pos) = running.iter().position(|t| t.same(&token)) {
        running.swap_remove(pos);
    }
}
