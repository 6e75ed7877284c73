use super::result::TaskResult;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;

/// One unit of work in a batch. It has no identity beyond its position.
pub struct Task<T> {
    pub(crate) work: Work<T>,
}

pub(crate) enum Work<T> {
    Future(BoxFuture<'static, TaskResult<T>>),
    Blocking(Box<dyn FnOnce() -> TaskResult<T> + Send + 'static>),
}

impl<T: Send + 'static> Task<T> {
    /// Async task, polled directly by a pool worker.
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Self { work: Work::Future(fut.boxed()) }
    }

    /// Blocking task, moved to the blocking thread pool while a worker waits on it.
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        Self { work: Work::Blocking(Box::new(f)) }
    }
}

/// Lifecycle of an execution context.
///
/// `Running -> Draining -> {Terminated, Forced}`. Only `Running` accepts tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    Running = 0,
    Draining = 1,
    Terminated = 2,
    Forced = 3,
}

impl PoolState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PoolState::Running,
            1 => PoolState::Draining,
            2 => PoolState::Terminated,
            _ => PoolState::Forced,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PoolState::Terminated | PoolState::Forced)
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            PoolState::Running => "running",
            PoolState::Draining => "draining",
            PoolState::Terminated => "terminated",
            PoolState::Forced => "forced",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub state: PoolState,
    pub workers: usize,
    pub idle_workers: usize,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub total_submitted: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        let busy = self.workers.saturating_sub(self.idle_workers);
        busy as f64 / self.workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}
