//! Result composition on top of [`SubmissionHandle`]s.
//!
//! Combinators own no threads. Once their inputs are ready they submit the
//! derived computation to a pool, so that pool's sizing and backpressure
//! rules apply to it like to any other task.

use super::{
    handle::{channel, task_from, Completer, SubmissionHandle},
    pool::ThreadPool,
    result::TaskResult,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Pending<A, B, R, F> {
    a: Option<A>,
    b: Option<B>,
    f: Option<F>,
    completer: Option<Completer<R>>,
    token: CancellationToken,
    pool: ThreadPool,
}

enum Side<A, B> {
    Left(TaskResult<A>),
    Right(TaskResult<B>),
}

impl<A, B, R, F> Pending<A, B, R, F>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
    F: FnOnce(A, B) -> R + Send + 'static,
{
    fn accept(state: &Mutex<Self>, side: Side<A, B>) {
        let mut pending = state.lock();
        // already failed or dispatched
        let Some(completer) = pending.completer.take() else {
            return;
        };

        let failure = match side {
            Side::Left(Ok(a)) => {
                pending.a = Some(a);
                None
            }
            Side::Right(Ok(b)) => {
                pending.b = Some(b);
                None
            }
            Side::Left(Err(e)) | Side::Right(Err(e)) => Some(e),
        };

        if let Some(e) = failure {
            let f = pending.f.take();
            drop(pending);
            drop(f);
            completer.complete(Err(e));
            return;
        }

        if pending.a.is_none() || pending.b.is_none() {
            pending.completer = Some(completer);
            return;
        }

        let (Some(a), Some(b), Some(f)) = (pending.a.take(), pending.b.take(), pending.f.take()) else {
            return;
        };
        let token = pending.token.clone();
        let pool = pending.pool.clone();
        drop(pending);

        let task = task_from(completer, token, move || Ok(f(a, b)));
        if let Err(e) = pool.submit_task(task) {
            debug!(error = %e, "combining task not admitted");
        }
    }
}

/// Derives one result from two independently completing handles.
///
/// `f` runs exactly once, on `pool`, after both `a` and `b` resolved
/// successfully. The first input failure resolves the returned handle with
/// that error and `f` is never invoked. If `pool` is closed by then, the
/// result fails with `TaskError::Rejected`.
pub fn combine<A, B, R, F>(
    a: SubmissionHandle<A>,
    b: SubmissionHandle<B>,
    pool: &ThreadPool,
    f: F,
) -> SubmissionHandle<R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
    F: FnOnce(A, B) -> R + Send + 'static,
{
    let (completer, handle) = channel();
    let state = Arc::new(Mutex::new(Pending {
        a: None,
        b: None,
        f: Some(f),
        completer: Some(completer),
        token: handle.cancel_token(),
        pool: Arc::clone(pool),
    }));

    let left = Arc::clone(&state);
    a.on_complete(move |result| Pending::accept(&*left, Side::Left(result)));
    b.on_complete(move |result| Pending::accept(&*state, Side::Right(result)));

    handle
}

impl<T: Send + 'static> SubmissionHandle<T> {
    /// Maps a successful value with `f` on `pool`; failures pass through
    /// without invoking `f`.
    pub fn then_apply<U, F>(self, pool: &ThreadPool, f: F) -> SubmissionHandle<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (completer, handle) = channel();
        let token = handle.cancel_token();
        let pool = Arc::clone(pool);

        self.on_complete(move |result| match result {
            Ok(value) => {
                let task = task_from(completer, token, move || Ok(f(value)));
                if let Err(e) = pool.submit_task(task) {
                    debug!(error = %e, "then_apply task not admitted");
                }
            }
            Err(e) => completer.complete(Err(e)),
        });

        handle
    }

    /// [`combine`] with `self` as the left input.
    pub fn combine_with<B, R, F>(self, other: SubmissionHandle<B>, pool: &ThreadPool, f: F) -> SubmissionHandle<R>
    where
        B: Send + 'static,
        R: Send + 'static,
        F: FnOnce(T, B) -> R + Send + 'static,
    {
        combine(self, other, pool, f)
    }
}
