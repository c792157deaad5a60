//! Delayed and periodic execution on a small dedicated runtime.
//!
//! A [`Scheduler`] never touches a [`ThreadPool`](crate::pool::ThreadPool):
//! timers and task bodies run on its own named threads. Callers observe an
//! entry through [`ScheduledEntry::wait_timeout`] with their own deadline.

use super::{
    config::{env_opt, parse_value},
    errors::{ConfigError, PoolError},
    model::EntryState,
    result::panic_message,
};
use parking_lot::{Condvar, Mutex};
use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{
    runtime::{Builder, Handle, Runtime},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// roughly 30 years; delays beyond the clock's range are clamped to it
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(delay: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

struct Latch {
    state: Mutex<EntryState>,
    changed: Condvar,
}

impl Latch {
    fn new() -> Self {
        Self {
            state: Mutex::new(EntryState::Pending),
            changed: Condvar::new(),
        }
    }

    /// Pending → Running. `false` if the entry was cancelled or finished.
    fn try_start(&self) -> bool {
        let mut state = self.state.lock();
        if *state != EntryState::Pending {
            return false;
        }
        *state = EntryState::Running;
        true
    }

    /// Running → Pending, between runs of a periodic entry.
    fn rearm(&self) {
        let mut state = self.state.lock();
        if *state == EntryState::Running {
            *state = EntryState::Pending;
        }
    }

    fn finish(&self, outcome: EntryState) {
        let mut state = self.state.lock();
        if state.is_done() {
            return;
        }
        *state = outcome;
        self.changed.notify_all();
    }

    fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if *state != EntryState::Pending {
            return false;
        }
        *state = EntryState::Cancelled;
        self.changed.notify_all();
        true
    }
}

/// Resolves a still-pending entry as cancelled when its timer future is
/// dropped, including when the runtime shuts down before it fired.
struct CancelOnDrop(Arc<Latch>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Handle to a scheduled task.
#[derive(Clone)]
pub struct ScheduledEntry {
    latch: Arc<Latch>,
    token: CancellationToken,
    runs: Arc<AtomicUsize>,
}

impl ScheduledEntry {
    fn new(token: CancellationToken) -> Self {
        Self {
            latch: Arc::new(Latch::new()),
            token,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Prevents the entry from firing. Returns `false` when the task is
    /// already running or done; a running periodic entry stops after the
    /// current run.
    pub fn cancel(&self) -> bool {
        self.token.cancel();
        self.latch.cancel()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn state(&self) -> EntryState {
        self.latch.state.lock().clone()
    }

    /// How many times the task body has run.
    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for the entry to finish and returns its state.
    /// A state that is not done means the wait timed out.
    pub fn wait_timeout(&self, timeout: Duration) -> EntryState {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut state = self.latch.state.lock();
        while !state.is_done() {
            if self.latch.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.clone()
    }

    pub fn wait(&self) -> EntryState {
        let mut state = self.latch.state.lock();
        while !state.is_done() {
            self.latch.changed.wait(&mut state);
        }
        state.clone()
    }

    fn run_body<F: FnOnce()>(&self, body: F) -> Result<(), String> {
        let outcome = tokio::task::block_in_place(|| std::panic::catch_unwind(AssertUnwindSafe(body)));
        self.runs.fetch_add(1, Ordering::AcqRel);
        outcome.map_err(panic_message)
    }
}

impl std::fmt::Debug for ScheduledEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledEntry")
            .field("state", &self.state())
            .field("runs", &self.run_count())
            .finish()
    }
}

/// Runs tasks after a delay on its own threads.
pub struct Scheduler {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    token: CancellationToken,
}

impl Scheduler {
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        Self::with_thread_prefix(threads, "scheduler-")
    }

    /// `TASKPOOL_SCHEDULER_THREADS`, defaulting to 2.
    pub fn from_env() -> Result<Self, PoolError> {
        let threads = match env_opt("TASKPOOL_SCHEDULER_THREADS") {
            Some(v) => parse_value("TASKPOOL_SCHEDULER_THREADS", &v)?,
            None => 2,
        };
        Self::new(threads)
    }

    pub fn with_thread_prefix(threads: usize, prefix: impl Into<String>) -> Result<Self, PoolError> {
        if threads == 0 {
            return Err(ConfigError::NoThreads.into());
        }
        let prefix = prefix.into();
        let index = AtomicUsize::new(0);
        let name_prefix = prefix.clone();

        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name_fn(move || format!("{}{}", name_prefix, index.fetch_add(1, Ordering::Relaxed) + 1))
            .enable_time()
            .build()?;

        debug!(threads, prefix = %prefix, "scheduler started");

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            token: CancellationToken::new(),
        })
    }

    fn ensure_running(&self) -> Result<(), PoolError> {
        if self.token.is_cancelled() || self.runtime.lock().is_none() {
            return Err(PoolError::Rejected);
        }
        Ok(())
    }

    /// Runs `task` once, no earlier than `delay` from now.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<ScheduledEntry, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;

        let entry = ScheduledEntry::new(self.token.child_token());
        let fired = entry.clone();
        let deadline = deadline_after(delay);

        self.handle.spawn(async move {
            let _guard = CancelOnDrop(fired.latch.clone());
            tokio::select! {
                biased;
                _ = fired.token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            if !fired.latch.try_start() {
                return;
            }
            match fired.run_body(task) {
                Ok(()) => fired.latch.finish(EntryState::Completed),
                Err(message) => {
                    warn!(error = %message, "scheduled task panicked");
                    fired.latch.finish(EntryState::Failed(message));
                }
            }
        });

        Ok(entry)
    }

    /// Runs `task` every `period`, first after `initial_delay`, until the
    /// entry is cancelled or a run panics. Late ticks are skipped.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> Result<ScheduledEntry, PoolError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "period".into(),
                value: format!("{period:?}"),
            }
            .into());
        }
        self.ensure_running()?;

        let entry = ScheduledEntry::new(self.token.child_token());
        let fired = entry.clone();
        let start = deadline_after(initial_delay);

        self.handle.spawn(async move {
            let _guard = CancelOnDrop(fired.latch.clone());
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = fired.token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !fired.latch.try_start() {
                    break;
                }
                if let Err(message) = fired.run_body(&task) {
                    warn!(error = %message, "periodic task panicked, no further runs");
                    fired.latch.finish(EntryState::Failed(message));
                    return;
                }
                fired.latch.rearm();
            }
        });

        Ok(entry)
    }

    /// Cancels every pending entry and stops the scheduler threads, giving
    /// running task bodies a short grace period. Must not be called from
    /// inside a scheduled task.
    pub fn shutdown(&self) {
        self.token.cancel();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
            info!("scheduler shut down");
        }
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}
