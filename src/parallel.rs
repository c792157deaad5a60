//! Ordered, timeout-bounded parallel map over a transient pool.

use super::{
    config::{env_opt, parse_value, Config},
    errors::ConfigError,
    handle::SubmissionHandle,
    pool::ThreadPoolInner,
};
use std::{convert::Infallible, fmt::Display, sync::Arc, time::Duration};
use tracing::{debug, warn};

const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(2);

/// Lower bound on the worker cap of a batch pool, independent of CPU count.
const MIN_BATCH_WORKERS: usize = 64;

/// Batch job: one task per present input, one slot per input.
///
/// A slot is `None` when its input was `None`, when the task failed or
/// panicked, or when its result did not arrive within the per-task timeout.
/// One bad element never fails the batch.
#[derive(Debug, Clone)]
pub struct ParallelMap {
    per_task_timeout: Duration,
    pool_config: Option<Config>,
}

impl Default for ParallelMap {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_TIMEOUT)
    }
}

impl ParallelMap {
    pub fn new(per_task_timeout: Duration) -> Self {
        Self {
            per_task_timeout,
            pool_config: None,
        }
    }

    /// `TASKPOOL_TASK_TIMEOUT_MS`, defaulting to two seconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout = match env_opt("TASKPOOL_TASK_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse_value("TASKPOOL_TASK_TIMEOUT_MS", &v)?),
            None => DEFAULT_TASK_TIMEOUT,
        };
        Ok(Self::new(timeout))
    }

    /// Uses `config` for the transient pool instead of one sized to the batch.
    pub fn with_pool_config(mut self, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        self.pool_config = Some(config);
        Ok(self)
    }

    #[inline]
    pub fn per_task_timeout(&self) -> Duration {
        self.per_task_timeout
    }

    /// Without an explicit config every element gets its own worker up to
    /// the cap, so a slow element never holds up the others. The queue holds
    /// the rest of the batch and no element runs on the caller.
    fn pool_config_for(&self, tasks: usize) -> Config {
        match &self.pool_config {
            Some(config) => config.clone(),
            None => {
                let workers = tasks.min(MIN_BATCH_WORKERS.max(num_cpus::get() * 2));
                Config::bounded(workers, workers, tasks).with_thread_prefix("parallel-map-")
            }
        }
    }

    pub fn run<X, Y, F>(&self, inputs: Vec<Option<X>>, f: F) -> Vec<Option<Y>>
    where
        X: Send + 'static,
        Y: Send + 'static,
        F: Fn(X) -> Y + Send + Sync + 'static,
    {
        self.try_run(inputs, move |x| Ok::<Y, Infallible>(f(x)))
    }

    /// Like [`run`](Self::run); an `Err` from `f` leaves the slot empty.
    pub fn try_run<X, Y, E, F>(&self, inputs: Vec<Option<X>>, f: F) -> Vec<Option<Y>>
    where
        X: Send + 'static,
        Y: Send + 'static,
        E: Display,
        F: Fn(X) -> Result<Y, E> + Send + Sync + 'static,
    {
        let len = inputs.len();
        let present = inputs.iter().filter(|x| x.is_some()).count();
        if present == 0 {
            return (0..len).map(|_| None).collect();
        }

        let pool = match ThreadPoolInner::with_config(self.pool_config_for(present)) {
            Ok(pool) => pool,
            Err(e) => {
                warn!(error = %e, "parallel map could not create its pool");
                return (0..len).map(|_| None).collect();
            }
        };

        let f = Arc::new(f);
        let handles: Vec<Option<SubmissionHandle<Y>>> = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let x = input?;
                let f = Arc::clone(&f);
                match pool.try_submit(move || f(x)) {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        debug!(index, error = %e, "parallel map task not admitted");
                        None
                    }
                }
            })
            .collect();

        let results = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| match handle?.wait_timeout(self.per_task_timeout) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(index, error = %e, "parallel map slot left empty");
                    None
                }
            })
            .collect();

        // abandoned tasks finish in the background; their workers exit afterwards
        pool.shutdown();
        results
    }
}

/// Maps `f` over `inputs` in parallel. See [`ParallelMap`].
pub fn parallel_map<X, Y, F>(inputs: Vec<Option<X>>, f: F, per_task_timeout: Duration) -> Vec<Option<Y>>
where
    X: Send + 'static,
    Y: Send + 'static,
    F: Fn(X) -> Y + Send + Sync + 'static,
{
    ParallelMap::new(per_task_timeout).run(inputs, f)
}

pub fn try_parallel_map<X, Y, E, F>(inputs: Vec<Option<X>>, f: F, per_task_timeout: Duration) -> Vec<Option<Y>>
where
    X: Send + 'static,
    Y: Send + 'static,
    E: Display,
    F: Fn(X) -> Result<Y, E> + Send + Sync + 'static,
{
    ParallelMap::new(per_task_timeout).try_run(inputs, f)
}
