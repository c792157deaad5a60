use thiserror::Error;

/// Why a task did not produce a value.
#[derive(Debug, Error, PartialEq, PartialOrd, Eq, Ord, Clone)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task discarded by backpressure policy")]
    Discarded,
    #[error("task cancelled before it started")]
    Cancelled,
    #[error("task rejected: pool closed")]
    Rejected,
    #[error("timed out waiting for task result")]
    TimedOut,
}

impl TaskError {
    /// Timeout is the only outcome where the task may still be running.
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::TimedOut)
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("rejected: pool closed")]
    Rejected,
    #[error("pool saturated: {workers} workers busy and queue full")]
    Saturated { workers: usize },
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("max_threads must be at least 1")]
    NoThreads,
    #[error("max_threads ({max}) is smaller than core_threads ({core})")]
    MaxBelowCore { core: usize, max: usize },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("unknown backpressure policy: {0}")]
    UnknownPolicy(String),
}
