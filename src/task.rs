//! Task definitions and the wiring between a task and its handle.
//!
//! A [`Job`] is an opaque unit of work owned by the queue until exactly one
//! worker claims it. The closure inside is pre-wired to its completion
//! handle: it marks the task started, runs the body under a panic guard and
//! publishes the outcome, so workers never see a task's failure.

use crate::cancel::CancelToken;
use crate::error::TaskError;
use crate::handle::{CompletionHandle, panic_message};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// A unit of work queued for execution.
pub(crate) struct Job {
    work: Box<dyn FnOnce() + Send + 'static>,
    discard: Box<dyn FnOnce() + Send + 'static>,
    token: CancelToken,
}

impl Job {
    /// Runs the job to completion on the calling worker.
    pub(crate) fn execute(self) {
        (self.work)();
    }

    /// Marks the job cancelled without running it. Used when draining a
    /// queue on `shutdown_now`.
    pub(crate) fn discard(self) {
        (self.discard)();
    }

    /// The cancellation token shared with the job's handle.
    pub(crate) fn token(&self) -> &CancelToken {
        &self.token
    }
}

/// Builds a queueable job and the handle observing it. The body receives
/// the task's cancellation token; non-cancellable submissions simply ignore
/// it.
pub(crate) fn wrap_task<T, F>(body: F) -> (Job, CompletionHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(&CancelToken) -> T + Send + 'static,
{
    let token = CancelToken::new();
    let handle = CompletionHandle::with_token(token.clone());

    let publish = handle.clone();
    let task_token = token.clone();
    let work = Box::new(move || {
        if !publish.try_start() {
            // cancelled while queued
            return;
        }
        match catch_unwind(AssertUnwindSafe(|| body(&task_token))) {
            Ok(value) => {
                publish.complete(value);
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::warn!(error = %message, "task panicked; failure parked in its handle");
                publish.fail(TaskError::ExecutionFailure(message));
            }
        }
    });

    let unrun = handle.clone();
    let discard = Box::new(move || {
        unrun.cancel(false);
    });

    (
        Job {
            work,
            discard,
            token,
        },
        handle,
    )
}
