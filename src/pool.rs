//! High-level thread pool interface.
//!
//! The pool is the primary entry point for scheduling work. It owns a FIFO
//! task queue and a set of workers pulling from it, and hands back a
//! [`CompletionHandle`] per submission. Three policies are supported:
//! fixed-size (N long-lived workers), single-worker (N = 1, serializing all
//! tasks in submission order) and cached/elastic (workers spawned on demand
//! and retired after an idle threshold).

use crate::cancel::CancelToken;
use crate::error::{Result, TaskError};
use crate::handle::{CompletionHandle, Outcome};
use crate::task::{Job, wrap_task};
use crate::worker::{PoolShared, Worker};
use crossbeam::channel::{Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for pool construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// How long an elastic worker waits for work before retiring.
    /// Ignored by fixed pools. Default: 60 seconds.
    pub idle_timeout: Duration,
    /// Daemon pools are not joined on drop: shutdown seals the queue and
    /// the workers are left to drain on their own while the process lives.
    /// Default: false (drop waits for the drain).
    pub daemon: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            idle_timeout: Duration::from_secs(60),
            daemon: false,
        }
    }
}

/// A task-execution pool with a FIFO queue and a completion handle per
/// submission.
///
/// # Example
///
/// ```
/// use threadmill::ThreadPool;
///
/// let pool = ThreadPool::fixed(4);
/// let handle = pool.submit(|| expensive_sum());
/// # fn expensive_sum() -> u64 { 7 }
/// assert_eq!(handle.unwrap().get().unwrap(), 7);
/// ```
pub struct ThreadPool {
    sender: Mutex<Option<Sender<Job>>>,
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<Worker>>,
    config: PoolConfig,
    elastic: bool,
    #[cfg(feature = "metrics")]
    metrics: Arc<crate::metrics::PoolMetrics>,
}

impl ThreadPool {
    /// Creates a pool with `workers` long-lived workers and an unbounded
    /// FIFO queue.
    pub fn fixed(workers: usize) -> Self {
        Self::fixed_with_config(workers, PoolConfig::default())
    }

    /// `fixed` with explicit configuration.
    pub fn fixed_with_config(workers: usize, config: PoolConfig) -> Self {
        assert!(workers > 0, "a fixed pool needs at least one worker");
        Self::build(workers, false, config)
    }

    /// Creates a single-worker pool: every task runs on the same worker in
    /// submission order.
    pub fn single() -> Self {
        Self::fixed(1)
    }

    /// Creates an elastic pool: a worker is spawned whenever a task is
    /// submitted and no worker is idle, and idle workers retire after the
    /// configured threshold (default 60 seconds).
    pub fn cached() -> Self {
        Self::cached_with_config(PoolConfig::default())
    }

    /// `cached` with explicit configuration.
    pub fn cached_with_config(config: PoolConfig) -> Self {
        Self::build(0, true, config)
    }

    fn build(initial_workers: usize, elastic: bool, config: PoolConfig) -> Self {
        let (sender, receiver) = unbounded();
        let pool = ThreadPool {
            sender: Mutex::new(Some(sender)),
            shared: Arc::new(PoolShared::new(receiver)),
            workers: Mutex::new(Vec::with_capacity(initial_workers)),
            config,
            elastic,
            #[cfg(feature = "metrics")]
            metrics: Arc::new(crate::metrics::PoolMetrics::new()),
        };
        *pool.shared.live.lock() = initial_workers;
        let mut workers = pool.workers.lock();
        for _ in 0..initial_workers {
            workers.push(Worker::spawn(pool.shared.clone(), None));
        }
        drop(workers);
        pool
    }

    /// Submits a task. Returns immediately with a pending handle; never
    /// blocks beyond the queue's internal synchronization.
    pub fn submit<T, F>(&self, task: F) -> Result<CompletionHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_cancellable(move |_token| task())
    }

    /// Submits a task whose body receives the task's [`CancelToken`].
    /// Cancellation is cooperative: the body decides where to observe the
    /// token and how to wind down.
    pub fn submit_cancellable<T, F>(&self, task: F) -> Result<CompletionHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        let (job, handle) = wrap_task(task);
        self.enqueue(job)?;
        #[cfg(feature = "metrics")]
        {
            self.metrics.task_submitted();
            let metrics = self.metrics.clone();
            handle.register_callback(Box::new(move |outcome: &Outcome<T>| match outcome {
                Outcome::Completed(_) => metrics.task_completed(),
                Outcome::Failed(_) => metrics.task_failed(),
                Outcome::Cancelled => metrics.task_cancelled(),
            }));
        }
        Ok(handle)
    }

    /// Submits every task, blocks until each one is terminal, and returns
    /// their handles in input order.
    pub fn invoke_all<T, F>(&self, tasks: Vec<F>) -> Result<Vec<CompletionHandle<T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let handles = tasks
            .into_iter()
            .map(|task| self.submit(task))
            .collect::<Result<Vec<_>>>()?;
        for handle in &handles {
            handle.wait_done();
        }
        Ok(handles)
    }

    /// `invoke_all` with a deadline: any task not terminal when the
    /// deadline elapses is cancelled (with interruption requested) and its
    /// handle reports the cancelled state.
    pub fn invoke_all_timeout<T, F>(
        &self,
        tasks: Vec<F>,
        timeout: Duration,
    ) -> Result<Vec<CompletionHandle<T>>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let handles = tasks
            .into_iter()
            .map(|task| self.submit(task))
            .collect::<Result<Vec<_>>>()?;
        for handle in &handles {
            let now = Instant::now();
            if now >= deadline || !handle.wait_done_timeout(deadline - now) {
                handle.cancel(true);
            }
        }
        Ok(handles)
    }

    /// Submits every task, returns the value of the first one to succeed
    /// and cancels the rest. Fails with [`TaskError::AllTasksFailed`] when
    /// no task succeeds.
    pub fn invoke_any<T, F>(&self, tasks: Vec<F>) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.invoke_any_inner(tasks, None)
    }

    /// `invoke_any` with a deadline: fails with [`TaskError::Timeout`] (and
    /// cancels everything) if nothing succeeded in time.
    pub fn invoke_any_timeout<T, F>(&self, tasks: Vec<F>, timeout: Duration) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.invoke_any_inner(tasks, Some(Instant::now() + timeout))
    }

    fn invoke_any_inner<T, F>(&self, tasks: Vec<F>, deadline: Option<Instant>) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if tasks.is_empty() {
            return Err(TaskError::AllTasksFailed("no tasks provided".into()));
        }
        let total = tasks.len();
        let race: Arc<(Mutex<AnyRace<T>>, Condvar)> =
            Arc::new((Mutex::new(AnyRace::default()), Condvar::new()));
        let handles = tasks
            .into_iter()
            .map(|task| self.submit(task))
            .collect::<Result<Vec<_>>>()?;
        for handle in &handles {
            let race = race.clone();
            handle.register_callback(Box::new(move |outcome: &Outcome<T>| {
                let (state, cond) = &*race;
                let mut state = state.lock();
                match outcome {
                    Outcome::Completed(value) => {
                        if state.winner.is_none() {
                            state.winner = Some(value.clone());
                        }
                    }
                    Outcome::Failed(error) => {
                        state.failures += 1;
                        if state.first_error.is_none() {
                            state.first_error = Some(error.clone());
                        }
                    }
                    Outcome::Cancelled => {
                        state.failures += 1;
                        if state.first_error.is_none() {
                            state.first_error = Some(TaskError::Cancelled);
                        }
                    }
                }
                cond.notify_all();
            }));
        }

        let (state, cond) = &*race;
        let mut state = state.lock();
        loop {
            if let Some(winner) = state.winner.take() {
                drop(state);
                for handle in &handles {
                    handle.cancel(true);
                }
                return Ok(winner);
            }
            if state.failures >= total {
                let first = state
                    .first_error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                return Err(TaskError::AllTasksFailed(first));
            }
            match deadline {
                Some(deadline) => {
                    if cond.wait_until(&mut state, deadline).timed_out() {
                        if let Some(winner) = state.winner.take() {
                            drop(state);
                            for handle in &handles {
                                handle.cancel(true);
                            }
                            return Ok(winner);
                        }
                        drop(state);
                        for handle in &handles {
                            handle.cancel(true);
                        }
                        return Err(TaskError::Timeout);
                    }
                }
                None => cond.wait(&mut state),
            }
        }
    }

    /// Stops accepting submissions. Queued and in-flight tasks drain
    /// asynchronously; returns immediately.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            tracing::debug!("pool shut down, queue sealed");
        }
    }

    /// `shutdown`, plus a best-effort cancellation sweep: queued tasks are
    /// marked cancelled without running, and the cancellation token of
    /// every in-flight task is signalled. Nothing is force-terminated — a
    /// running task stops only where it observes its token.
    pub fn shutdown_now(&self) {
        self.shutdown();
        let mut discarded = 0usize;
        for job in self.shared.receiver.try_iter() {
            job.discard();
            discarded += 1;
        }
        let running = self.shared.running.lock();
        for token in running.iter() {
            token.cancel();
        }
        tracing::debug!(
            discarded,
            interrupted = running.len(),
            "shutdown_now cancellation sweep"
        );
    }

    /// Blocks up to `timeout` and reports whether every worker has exited.
    /// Workers exit once the pool is shut down and the queue is drained
    /// (or, for elastic workers, once they retire idle).
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

    /// Number of currently live workers.
    pub fn worker_count(&self) -> usize {
        *self.shared.live.lock()
    }

    /// Number of tasks sitting in the queue, not yet claimed by a worker.
    pub fn queued_tasks(&self) -> usize {
        self.shared.receiver.len()
    }

    /// Whether `shutdown` (or `shutdown_now`) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Pool metrics, when the `metrics` feature is enabled.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> &crate::metrics::PoolMetrics {
        &self.metrics
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(TaskError::PoolShutDown)?;
        sender.send(job).map_err(|_| TaskError::PoolShutDown)?;
        drop(guard);
        if self.elastic && self.shared.idle.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            self.spawn_worker();
        }
        Ok(())
    }

    fn spawn_worker(&self) {
        *self.shared.live.lock() += 1;
        let worker = Worker::spawn(self.shared.clone(), Some(self.config.idle_timeout));
        self.workers.lock().push(worker);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
        if self.config.daemon {
            return;
        }
        for worker in self.workers.get_mut().drain(..) {
            let id = worker.id();
            if worker.join().is_err() {
                tracing::error!(worker = id, "worker thread panicked");
            }
        }
    }
}

struct AnyRace<T> {
    winner: Option<T>,
    failures: usize,
    first_error: Option<TaskError>,
}

impl<T> Default for AnyRace<T> {
    fn default() -> Self {
        AnyRace {
            winner: None,
            failures: 0,
            first_error: None,
        }
    }
}
