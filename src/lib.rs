//! Bounded OS-thread worker pool with configurable backpressure
//!
//! # Features
//! - Core and overflow workers, bounded FIFO queue, idle-worker reaping
//! - Backpressure policies: caller-runs, discard, discard-oldest, abort
//! - Submission handles with blocking deadline waits and `Future` support
//! - Delayed and periodic scheduling on dedicated threads
//! - Two-input result combinator and ordered, timeout-bounded parallel map

pub mod combine;
pub mod config;
pub mod errors;
pub mod handle;
pub mod model;
pub mod parallel;
pub mod pool;
pub mod result;
pub mod scheduler;

pub use combine::combine;
pub use config::{BackpressurePolicy, Config};
pub use errors::{ConfigError, PoolError, TaskError};
pub use handle::SubmissionHandle;
pub use model::{EntryState, PoolMetrics, PoolState};
pub use parallel::{parallel_map, try_parallel_map, ParallelMap};
pub use pool::{ThreadPool, ThreadPoolInner};
pub use result::TaskResult;
pub use scheduler::{ScheduledEntry, Scheduler};
