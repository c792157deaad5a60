use super::{
    combine,
    config::{BackpressurePolicy, Config},
    errors::{PoolError, TaskError},
    handle::{task_with_handle, SubmissionHandle, Task},
    model::{PoolMetrics, PoolState},
    result::TaskResult,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

pub type ThreadPool = Arc<ThreadPoolInner>;

/// State that must change atomically with queue admission.
struct Control {
    state: PoolState,
    live: usize,
    largest: usize,
    next_index: usize,
    sender: Option<Sender<Task>>,
}

impl Control {
    /// Counts a new worker and hands out its index.
    fn reserve_worker(&mut self) -> usize {
        self.live += 1;
        self.largest = self.largest.max(self.live);
        self.next_index += 1;
        self.next_index
    }
}

/// Bounded pool of OS worker threads.
///
/// Admission order for a new task: start a core worker, else enqueue, else
/// start an overflow worker, else apply the configured [`BackpressurePolicy`].
/// Workers above `core_threads` retire after `keep_alive` of idleness.
pub struct ThreadPoolInner {
    config: Config,
    control: Mutex<Control>,
    terminated: Condvar,
    receiver: Receiver<Task>,
    idle_workers: AtomicUsize,
    active_tasks: AtomicUsize,
    total_submitted: AtomicUsize,
    completed_tasks: AtomicUsize,
    failed_tasks: AtomicUsize,
    caller_runs: AtomicUsize,
    discarded_tasks: AtomicUsize,
    rejected_tasks: AtomicUsize,
}

impl ThreadPoolInner {
    pub fn new(core_threads: usize, max_threads: usize, queue_capacity: usize) -> Result<ThreadPool, PoolError> {
        Self::with_config(Config::bounded(core_threads, max_threads, queue_capacity))
    }

    pub fn with_config(config: Config) -> Result<ThreadPool, PoolError> {
        config.validate()?;

        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };

        debug!(
            core = config.core_threads,
            max = config.max_threads,
            queue = ?config.queue_capacity,
            policy = %config.policy,
            "thread pool created"
        );

        Ok(Arc::new(ThreadPoolInner {
            config,
            control: Mutex::new(Control {
                state: PoolState::Active,
                live: 0,
                largest: 0,
                next_index: 0,
                sender: Some(sender),
            }),
            terminated: Condvar::new(),
            receiver,
            idle_workers: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            total_submitted: AtomicUsize::new(0),
            completed_tasks: AtomicUsize::new(0),
            failed_tasks: AtomicUsize::new(0),
            caller_runs: AtomicUsize::new(0),
            discarded_tasks: AtomicUsize::new(0),
            rejected_tasks: AtomicUsize::new(0),
        }))
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Submits a value-producing task. A panic inside `f` resolves the
    /// handle with [`TaskError::Panicked`].
    pub fn submit<T, F>(self: &Arc<Self>, f: F) -> Result<SubmissionHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (task, handle) = task_with_handle(move || Ok(f()));
        self.submit_task(task)?;
        Ok(handle)
    }

    /// Submits a fallible task; an `Err` resolves the handle with
    /// [`TaskError::Failed`] carrying the error's message.
    pub fn try_submit<T, E, F>(self: &Arc<Self>, f: F) -> Result<SubmissionHandle<T>, PoolError>
    where
        T: Send + 'static,
        E: Display,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let (task, handle) = task_with_handle(move || f().map_err(|e| TaskError::Failed(e.to_string())));
        self.submit_task(task)?;
        Ok(handle)
    }

    /// Fire-and-forget variant of [`submit`](Self::submit).
    pub fn execute<F>(self: &Arc<Self>, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (task, _handle) = task_with_handle(move || -> TaskResult<()> {
            f();
            Ok(())
        });
        self.submit_task(task)
    }

    /// Derives a value from two handles on this pool. See [`combine::combine`].
    pub fn combine<A, B, R, F>(
        self: &Arc<Self>,
        a: SubmissionHandle<A>,
        b: SubmissionHandle<B>,
        f: F,
    ) -> SubmissionHandle<R>
    where
        A: Send + 'static,
        B: Send + 'static,
        R: Send + 'static,
        F: FnOnce(A, B) -> R + Send + 'static,
    {
        combine::combine(a, b, self, f)
    }

    pub(crate) fn submit_task(self: &Arc<Self>, task: Task) -> Result<(), PoolError> {
        self.total_submitted.fetch_add(1, Ordering::Relaxed);

        let mut control = self.control.lock();
        if control.state != PoolState::Active {
            drop(control);
            return Err(self.reject(task));
        }

        if control.live < self.config.core_threads {
            let index = control.reserve_worker();
            drop(control);
            return self.start_worker(index, Some(task));
        }

        let task = match self.try_enqueue(&control, task) {
            Ok(()) => {
                // a queued task needs at least one worker to drain it
                if control.live == 0 {
                    let index = control.reserve_worker();
                    drop(control);
                    return self.start_worker(index, None);
                }
                return Ok(());
            }
            Err(task) => task,
        };

        if control.live < self.config.max_threads {
            let index = control.reserve_worker();
            drop(control);
            return self.start_worker(index, Some(task));
        }

        let workers = control.live;
        drop(control);
        self.saturated(task, workers)
    }

    fn try_enqueue(&self, control: &MutexGuard<'_, Control>, task: Task) -> Result<(), Task> {
        match control.sender.as_ref() {
            Some(sender) => match sender.try_send(task) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => Err(task),
            },
            None => Err(task),
        }
    }

    fn reject(&self, task: Task) -> PoolError {
        self.rejected_tasks.fetch_add(1, Ordering::Relaxed);
        task.abandon(TaskError::Rejected);
        PoolError::Rejected
    }

    fn discard(&self, task: Task) {
        self.discarded_tasks.fetch_add(1, Ordering::Relaxed);
        task.abandon(TaskError::Discarded);
    }

    /// Every worker is busy and the queue is full.
    fn saturated(self: &Arc<Self>, task: Task, workers: usize) -> Result<(), PoolError> {
        warn!(workers, policy = %self.config.policy, "thread pool saturated");

        match self.config.policy {
            BackpressurePolicy::CallerRuns => {
                self.caller_runs.fetch_add(1, Ordering::Relaxed);
                self.run_task(task);
                Ok(())
            }
            BackpressurePolicy::Discard => {
                self.discard(task);
                Ok(())
            }
            BackpressurePolicy::DiscardOldest => {
                let control = self.control.lock();
                if control.state != PoolState::Active {
                    drop(control);
                    return Err(self.reject(task));
                }
                let oldest = self.receiver.try_recv().ok();
                let rejected = self.try_enqueue(&control, task).err();
                drop(control);

                // abandoned tasks may run callbacks that submit again
                if let Some(oldest) = oldest {
                    self.discard(oldest);
                }
                if let Some(task) = rejected {
                    self.discard(task);
                }
                Ok(())
            }
            BackpressurePolicy::Abort => {
                self.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                task.abandon(TaskError::Rejected);
                Err(PoolError::Saturated { workers })
            }
        }
    }

    fn start_worker(self: &Arc<Self>, index: usize, first: Option<Task>) -> Result<(), PoolError> {
        let name = format!("{}{}", self.config.thread_prefix, index);
        let pool = Arc::clone(self);

        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || pool.worker_loop(first));

        match spawned {
            Ok(_) => {
                debug!(worker = %name, "worker started");
                Ok(())
            }
            Err(e) => {
                warn!(worker = %name, error = %e, "failed to spawn worker thread");
                let mut control = self.control.lock();
                self.release_worker(&mut control);
                Err(PoolError::ThreadSpawn(e))
            }
        }
    }

    fn worker_loop(&self, first: Option<Task>) {
        if let Some(task) = first {
            self.run_task(task);
        }

        loop {
            let timed = self.control.lock().live > self.config.core_threads;

            self.idle_workers.fetch_add(1, Ordering::Relaxed);
            let received = if timed {
                self.receiver.recv_timeout(self.config.keep_alive)
            } else {
                self.receiver.recv().map_err(|_| RecvTimeoutError::Disconnected)
            };
            self.idle_workers.fetch_sub(1, Ordering::Relaxed);

            match received {
                Ok(task) => self.run_task(task),
                Err(RecvTimeoutError::Timeout) => {
                    let mut control = self.control.lock();
                    // checked under the admission lock so no task can be stranded
                    if control.live > self.config.core_threads && self.receiver.is_empty() {
                        debug!(worker = ?thread::current().name(), "idle worker retiring");
                        self.release_worker(&mut control);
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let mut control = self.control.lock();
                    self.release_worker(&mut control);
                    return;
                }
            }
        }
    }

    fn release_worker(&self, control: &mut MutexGuard<'_, Control>) {
        control.live -= 1;
        if control.live == 0 && control.state == PoolState::ShuttingDown {
            control.state = PoolState::Terminated;
            info!(prefix = %self.config.thread_prefix, "thread pool terminated");
            self.terminated.notify_all();
        }
    }

    fn run_task(&self, task: Task) {
        self.active_tasks.fetch_add(1, Ordering::Relaxed);
        let ok = task.run();
        self.active_tasks.fetch_sub(1, Ordering::Relaxed);

        if ok {
            self.completed_tasks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_tasks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Starts every core worker up front instead of on first submissions.
    /// Returns the number of workers started.
    pub fn prestart_core_threads(self: &Arc<Self>) -> Result<usize, PoolError> {
        let mut started = 0;
        loop {
            let mut control = self.control.lock();
            if control.state != PoolState::Active || control.live >= self.config.core_threads {
                return Ok(started);
            }
            let index = control.reserve_worker();
            drop(control);
            self.start_worker(index, None)?;
            started += 1;
        }
    }

    /// Stops accepting tasks. Queued and running tasks still complete; the
    /// pool terminates once the last worker exits. Does not block.
    pub fn shutdown(&self) {
        let mut control = self.control.lock();
        if control.state != PoolState::Active {
            return;
        }
        control.state = PoolState::ShuttingDown;
        let sender = control.sender.take();

        let mut stranded = Vec::new();
        if control.live == 0 {
            // no worker left to drain whatever is queued
            stranded.extend(self.receiver.try_iter());
            control.state = PoolState::Terminated;
            self.terminated.notify_all();
        }
        let live = control.live;
        drop(control);
        drop(sender);

        info!(
            prefix = %self.config.thread_prefix,
            live_workers = live,
            queued = self.receiver.len(),
            "thread pool shutting down"
        );
        for task in stranded {
            self.discard(task);
        }
    }

    /// Waits up to `timeout` for the pool to terminate.
    ///
    /// Calling this from one of the pool's own workers deadlocks until the
    /// timeout passes.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.join();
            return true;
        };
        let mut control = self.control.lock();
        while control.state != PoolState::Terminated {
            if self.terminated.wait_until(&mut control, deadline).timed_out() {
                return control.state == PoolState::Terminated;
            }
        }
        true
    }

    /// Waits for the pool to terminate.
    pub fn join(&self) {
        let mut control = self.control.lock();
        while control.state != PoolState::Terminated {
            self.terminated.wait(&mut control);
        }
    }

    pub fn shutdown_timeout(&self, timeout: Duration) -> bool {
        self.shutdown();
        self.await_termination(timeout)
    }

    pub fn state(&self) -> PoolState {
        self.control.lock().state
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.state() != PoolState::Active
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.state() == PoolState::Terminated
    }

    pub fn metrics(&self) -> PoolMetrics {
        let (live_workers, largest_pool_size) = {
            let control = self.control.lock();
            (control.live, control.largest)
        };
        PoolMetrics {
            live_workers,
            largest_pool_size,
            idle_workers: self.idle_workers.load(Ordering::Relaxed),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.receiver.len(),
            total_submitted: self.total_submitted.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            caller_runs: self.caller_runs.load(Ordering::Relaxed),
            discarded_tasks: self.discarded_tasks.load(Ordering::Relaxed),
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
        }
    }
}
