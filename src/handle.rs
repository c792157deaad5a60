use super::{
    errors::TaskError,
    result::{run_catching, TaskResult},
};
use parking_lot::{Condvar, Mutex};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

type TaskFn = Box<dyn FnOnce(Option<TaskError>) -> bool + Send + 'static>;

/// Type-erased unit of work owned by the pool.
pub struct Task(TaskFn);

impl Task {
    /// Runs the task. Returns `true` when the closure produced a value.
    #[inline]
    pub(crate) fn run(self) -> bool {
        (self.0)(None)
    }

    /// Resolves the task's handle with `reason` without running it.
    pub(crate) fn abandon(self, reason: TaskError) {
        (self.0)(Some(reason));
    }
}

type Callback<T> = Box<dyn FnOnce(TaskResult<T>) + Send + 'static>;

struct Slot<T> {
    outcome: Option<TaskResult<T>>,
    resolved: bool,
    waker: Option<Waker>,
    callback: Option<Callback<T>>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn resolve(&self, result: TaskResult<T>) {
        let mut slot = self.slot.lock();
        if slot.resolved {
            return;
        }
        slot.resolved = true;

        if let Some(callback) = slot.callback.take() {
            drop(slot);
            callback(result);
            return;
        }

        slot.outcome = Some(result);
        let waker = slot.waker.take();
        drop(slot);

        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Write side of a [`SubmissionHandle`]. Resolves the handle exactly once;
/// dropping it unresolved resolves the handle with [`TaskError::Discarded`].
pub(crate) struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(mut self, result: TaskResult<T>) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(result);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(Err(TaskError::Discarded));
        }
    }
}

/// Creates a connected completer/handle pair.
pub(crate) fn channel<T>() -> (Completer<T>, SubmissionHandle<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            outcome: None,
            resolved: false,
            waker: None,
            callback: None,
        }),
        ready: Condvar::new(),
    });
    let completer = Completer {
        shared: Some(shared.clone()),
    };
    let handle = SubmissionHandle {
        shared,
        cancel_token: CancellationToken::new(),
    };
    (completer, handle)
}

/// Wraps a fallible closure into a [`Task`] plus the handle observing it.
pub(crate) fn task_with_handle<T, F>(f: F) -> (Task, SubmissionHandle<T>)
where
    T: Send + 'static,
    F: FnOnce() -> TaskResult<T> + Send + 'static,
{
    let (completer, handle) = channel();
    let task = task_from(completer, handle.cancel_token.clone(), f);
    (task, handle)
}

/// Builds a [`Task`] that resolves an existing completer.
///
/// The task checks `token` right before running; a task cancelled while
/// queued resolves as [`TaskError::Cancelled`].
pub(crate) fn task_from<T, F>(completer: Completer<T>, token: CancellationToken, f: F) -> Task
where
    T: Send + 'static,
    F: FnOnce() -> TaskResult<T> + Send + 'static,
{
    Task(Box::new(move |abandoned: Option<TaskError>| {
        if let Some(reason) = abandoned {
            completer.complete(Err(reason));
            return false;
        }
        if token.is_cancelled() {
            completer.complete(Err(TaskError::Cancelled));
            return false;
        }
        let result = run_catching(f);
        let ok = result.is_ok();
        if let Err(e) = &result {
            debug!(error = %e, "task finished without a value");
        }
        completer.complete(result);
        ok
    }))
}

/// Caller-side view of a submitted task.
///
/// Resolved exactly once. Waiting with a deadline that passes yields
/// [`TaskError::TimedOut`]; the task itself may still run to completion.
pub struct SubmissionHandle<T> {
    shared: Arc<Shared<T>>,
    cancel_token: CancellationToken,
}

impl<T> SubmissionHandle<T> {
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Marks the task as cancelled. Has an effect only if it has not started.
    #[inline]
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.slot.lock().resolved
    }

    /// Blocks the current thread until the task resolves.
    pub fn wait(self) -> TaskResult<T> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(outcome) = slot.outcome.take() {
                return outcome;
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// Blocks for at most `timeout`. `Duration::ZERO` only takes an outcome
    /// that is already available. A timeout past the clock's range waits
    /// without a deadline.
    pub fn wait_timeout(self, timeout: Duration) -> TaskResult<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(outcome) = slot.outcome.take() {
                return outcome;
            }
            if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.outcome.take().unwrap_or(Err(TaskError::TimedOut));
            }
        }
    }

    pub async fn await_timeout(self, timeout: Duration) -> TaskResult<T> {
        tokio::time::timeout(timeout, self)
            .await
            .unwrap_or(Err(TaskError::TimedOut))
    }

    /// Hands the outcome to `callback` instead of storing it. Runs the
    /// callback inline if the handle is already resolved, otherwise on the
    /// thread that resolves it.
    pub(crate) fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(TaskResult<T>) + Send + 'static,
    {
        let mut slot = self.shared.slot.lock();
        match slot.outcome.take() {
            Some(outcome) => {
                drop(slot);
                callback(outcome);
            }
            None => slot.callback = Some(Box::new(callback)),
        }
    }
}

impl<T> Future for SubmissionHandle<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        match slot.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for SubmissionHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionHandle")
            .field("finished", &self.is_finished())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
