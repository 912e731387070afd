//! Execution watchdog
//!
//! The completion arbiter waits forever by design; the watchdog is what
//! stops an execution whose tracked work never drains. It enforces a
//! virtual-time deadline and a budget on the number of loop tasks.

use super::config::SandboxConfig;
use crate::error::ResourceLimitKind;
use tracing::warn;

/// Limits for one execution
#[derive(Debug, Clone)]
pub struct Watchdog {
    deadline: u64,
    max_tasks: usize,
    tasks_run: usize,
}

impl Watchdog {
    /// Arm a watchdog for an execution starting at virtual time `start`
    pub fn new(config: &SandboxConfig, start: u64) -> Self {
        Self {
            deadline: start.saturating_add(config.timeout_ms),
            max_tasks: config.max_tasks,
            tasks_run: 0,
        }
    }

    /// Virtual time at which the execution is torn down
    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    /// Tasks run so far
    pub fn tasks_run(&self) -> usize {
        self.tasks_run
    }

    /// Count one task about to run; `Some` once the budget is exhausted
    pub fn record_task(&mut self) -> Option<ResourceLimitKind> {
        if self.tasks_run >= self.max_tasks {
            warn!(max_tasks = self.max_tasks, "task budget exhausted");
            return Some(ResourceLimitKind::OperationLimit);
        }
        self.tasks_run += 1;
        None
    }

    /// Whether `now` is past the deadline
    pub fn check_time(&self, now: u64) -> Option<ResourceLimitKind> {
        if now >= self.deadline {
            warn!(deadline = self.deadline, now, "execution deadline reached");
            return Some(ResourceLimitKind::TimeLimit);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(timeout_ms: u64, max_tasks: usize) -> SandboxConfig {
        SandboxConfig {
            timeout_ms,
            max_tasks,
            ..SandboxConfig::default()
        }
    }

    #[test]
    fn test_deadline_is_relative_to_start() {
        let watchdog = Watchdog::new(&config(100, 10), 50);
        assert_eq!(watchdog.deadline(), 150);
        assert_eq!(watchdog.check_time(149), None);
        assert_eq!(watchdog.check_time(150), Some(ResourceLimitKind::TimeLimit));
    }

    #[test]
    fn test_task_budget() {
        let mut watchdog = Watchdog::new(&config(100, 2), 0);
        assert_eq!(watchdog.record_task(), None);
        assert_eq!(watchdog.record_task(), None);
        assert_eq!(watchdog.record_task(), Some(ResourceLimitKind::OperationLimit));
        assert_eq!(watchdog.tasks_run(), 2);
    }

    #[test]
    fn test_deadline_saturates() {
        let watchdog = Watchdog::new(&config(u64::MAX, 1), 10);
        assert_eq!(watchdog.deadline(), u64::MAX);
    }
}
