//! Configuration for batch scheduling.

use crate::semantics::smt::SolverConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Wall-clock budget for the whole batch; jobs not started by then are
    /// cancelled
    pub deadline: Option<Duration>,
    /// Solver settings for jobs without their own timeout
    pub solver: SolverConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            deadline: None,
            solver: SolverConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_deadline_option(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Per-query solver timeout.
    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver = SolverConfig::with_timeout(timeout);
        self
    }
}
