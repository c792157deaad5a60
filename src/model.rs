/// Lifecycle of a pool. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PoolState {
    Active,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub live_workers: usize,
    pub largest_pool_size: usize,
    pub idle_workers: usize,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub total_submitted: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub caller_runs: usize,
    pub discarded_tasks: usize,
    pub rejected_tasks: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.live_workers == 0 {
            return 0.0;
        }
        self.active_tasks.min(self.live_workers) as f64 / self.live_workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}

/// Observable state of a scheduled entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl EntryState {
    #[inline]
    pub fn is_done(&self) -> bool {
        !matches!(self, EntryState::Pending | EntryState::Running)
    }
}
