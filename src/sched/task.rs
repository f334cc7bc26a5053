//! Scheduled task records

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error returned by a task callback
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed task future
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

/// Task callback: invoked once per due cycle
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Identifier handed out on registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub usize);

/// Scheduler error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The task table is at capacity
    LimitReached { max_tasks: usize },
    /// No task with this id
    UnknownTask(TaskId),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::LimitReached { max_tasks } => {
                write!(f, "scheduled-task limit reached ({})", max_tasks)
            }
            SchedulerError::UnknownTask(id) => write!(f, "unknown task id {}", id.0),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// One entry in the task table
pub struct ScheduledTask {
    pub id: TaskId,
    pub name: String,
    pub interval: Duration,
    pub next_run: Instant,
    pub enabled: bool,
    pub(crate) run: TaskFn,
}

impl ScheduledTask {
    pub(crate) fn new(id: TaskId, name: String, interval: Duration, run: TaskFn, now: Instant) -> Self {
        Self {
            id,
            name,
            interval,
            next_run: now + interval,
            enabled: true,
            run,
        }
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("enabled", &self.enabled)
            .finish()
    }
}
