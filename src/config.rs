use super::errors::ConfigError;
use std::{env, fmt, str::FromStr, time::Duration};

/// What to do with a task when every worker is busy and the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressurePolicy {
    /// Run the task on the submitting thread. `submit` returns once it is done.
    #[default]
    CallerRuns,
    /// Drop the new task. Its handle resolves to `TaskError::Discarded`.
    Discard,
    /// Drop the oldest queued task and admit the new one.
    DiscardOldest,
    /// Fail the submission with `PoolError::Saturated`.
    Abort,
}

impl FromStr for BackpressurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "caller_runs" | "callerruns" => Ok(Self::CallerRuns),
            "discard" => Ok(Self::Discard),
            "discard_oldest" | "discardoldest" => Ok(Self::DiscardOldest),
            "abort" => Ok(Self::Abort),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CallerRuns => "caller_runs",
            Self::Discard => "discard",
            Self::DiscardOldest => "discard_oldest",
            Self::Abort => "abort",
        };
        f.write_str(name)
    }
}

/// Sizing and overload behaviour of a [`ThreadPoolInner`](crate::pool::ThreadPoolInner).
#[derive(Debug, Clone)]
pub struct Config {
    /// Workers kept alive regardless of idle time.
    pub core_threads: usize,
    /// Hard upper bound on live workers.
    pub max_threads: usize,
    /// `None` means unbounded; `Some(0)` hands tasks straight to an idle worker.
    pub queue_capacity: Option<usize>,
    /// Idle time after which workers above `core_threads` retire.
    pub keep_alive: Duration,
    pub policy: BackpressurePolicy,
    pub thread_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            core_threads: num_cpus,
            max_threads: num_cpus * 2,
            queue_capacity: Some(num_cpus * 20),
            keep_alive: Duration::from_secs(30),
            policy: BackpressurePolicy::CallerRuns,
            thread_prefix: "taskpool-worker-".to_string(),
        }
    }
}

impl Config {
    /// `n` permanent workers in front of an unbounded queue.
    pub fn fixed(n: usize) -> Self {
        Self {
            core_threads: n,
            max_threads: n,
            queue_capacity: None,
            ..Default::default()
        }
    }

    pub fn single() -> Self {
        Self::fixed(1)
    }

    /// No core workers; every task is handed to an idle worker or gets a new one.
    pub fn cached() -> Self {
        Self {
            core_threads: 0,
            max_threads: usize::MAX,
            queue_capacity: Some(0),
            keep_alive: Duration::from_secs(60),
            ..Default::default()
        }
    }

    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            core_threads: num_cpus,
            max_threads: num_cpus,
            queue_capacity: Some(num_cpus * 10),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            core_threads: num_cpus * 2,
            max_threads: num_cpus * 4,
            queue_capacity: Some(num_cpus * 20),
            ..Default::default()
        }
    }

    /// Bounded pool: `core`..`max` workers and `queue` pending slots.
    pub fn bounded(core: usize, max: usize, queue: usize) -> Self {
        Self {
            core_threads: core,
            max_threads: max,
            queue_capacity: Some(queue),
            ..Default::default()
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if self.max_threads < self.core_threads {
            return Err(ConfigError::MaxBelowCore {
                core: self.core_threads,
                max: self.max_threads,
            });
        }
        Ok(())
    }

    /// Reads `TASKPOOL_*` variables on top of [`Config::default`].
    ///
    /// - `TASKPOOL_CORE_THREADS`, `TASKPOOL_MAX_THREADS`
    /// - `TASKPOOL_QUEUE_CAPACITY` (`unbounded` or a number)
    /// - `TASKPOOL_KEEP_ALIVE_MS`
    /// - `TASKPOOL_POLICY` (`caller_runs`, `discard`, `discard_oldest`, `abort`)
    /// - `TASKPOOL_THREAD_PREFIX`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env_opt(key))
    }

    pub(crate) fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("TASKPOOL_CORE_THREADS") {
            config.core_threads = parse_value("TASKPOOL_CORE_THREADS", &v)?;
        }
        if let Some(v) = lookup("TASKPOOL_MAX_THREADS") {
            config.max_threads = parse_value("TASKPOOL_MAX_THREADS", &v)?;
        }
        if let Some(v) = lookup("TASKPOOL_QUEUE_CAPACITY") {
            config.queue_capacity = if v.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(parse_value("TASKPOOL_QUEUE_CAPACITY", &v)?)
            };
        }
        if let Some(v) = lookup("TASKPOOL_KEEP_ALIVE_MS") {
            config.keep_alive = Duration::from_millis(parse_value("TASKPOOL_KEEP_ALIVE_MS", &v)?);
        }
        if let Some(v) = lookup("TASKPOOL_POLICY") {
            config.policy = v.parse()?;
        }
        if let Some(v) = lookup("TASKPOOL_THREAD_PREFIX") {
            config.thread_prefix = v;
        }
        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

pub(crate) fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("caller-runs".parse::<BackpressurePolicy>(), Ok(BackpressurePolicy::CallerRuns));
        assert_eq!("DISCARD_OLDEST".parse::<BackpressurePolicy>(), Ok(BackpressurePolicy::DiscardOldest));
        assert_eq!("abort".parse::<BackpressurePolicy>(), Ok(BackpressurePolicy::Abort));
        assert!("retry".parse::<BackpressurePolicy>().is_err());
        assert_eq!(BackpressurePolicy::Discard.to_string(), "discard");
    }

    #[test]
    fn test_validate() {
        assert!(Config::bounded(2, 4, 2).validate().is_ok());
        assert_eq!(Config::bounded(0, 0, 2).validate(), Err(ConfigError::NoThreads));
        assert_eq!(
            Config::bounded(4, 2, 2).validate(),
            Err(ConfigError::MaxBelowCore { core: 4, max: 2 })
        );
        assert!(Config::cached().validate().is_ok());
        assert!(Config::single().validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("TASKPOOL_CORE_THREADS", "2"),
            ("TASKPOOL_MAX_THREADS", "4"),
            ("TASKPOOL_QUEUE_CAPACITY", "unbounded"),
            ("TASKPOOL_KEEP_ALIVE_MS", "1500"),
            ("TASKPOOL_POLICY", "abort"),
            ("TASKPOOL_THREAD_PREFIX", "demo-pool-"),
        ]))
        .unwrap();

        assert_eq!(config.core_threads, 2);
        assert_eq!(config.max_threads, 4);
        assert_eq!(config.queue_capacity, None);
        assert_eq!(config.keep_alive, Duration::from_millis(1500));
        assert_eq!(config.policy, BackpressurePolicy::Abort);
        assert_eq!(config.thread_prefix, "demo-pool-");
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = Config::from_lookup(lookup(&[("TASKPOOL_MAX_THREADS", "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "TASKPOOL_MAX_THREADS".into(),
                value: "many".into()
            }
        );

        let err = Config::from_lookup(lookup(&[
            ("TASKPOOL_CORE_THREADS", "8"),
            ("TASKPOOL_MAX_THREADS", "2"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MaxBelowCore { core: 8, max: 2 });
    }
}
