//! Task representation and execution.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::group::{self, TaskGroup};

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier attached to every task; carries no scheduling meaning and is
/// only surfaced through `Debug` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Boxed thunk executed by a worker.
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// Handler invoked when a task body fails.
pub type ErrorHandler = Arc<dyn Fn(TaskError) + Send + Sync + 'static>;

/// Describes a failed task body.
#[derive(Debug, Clone)]
pub struct TaskError {
    /// Panic message, when one could be recovered from the payload.
    pub message: String,
}

impl TaskError {
    fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self { message }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task failed: {}", self.message)
    }
}

/// A move-only, run-once unit of work.
///
/// A task owns its thunk plus an optional [`TaskGroup`] membership and an
/// optional error handler. Creating a task inside a group raises the
/// group's active count; the count drops again when the task has executed,
/// or when it is discarded without running (e.g. at pool shutdown).
pub struct Task {
    id: TaskId,
    thunk: Option<TaskFn>,
    group: Option<TaskGroup>,
    handler: Option<ErrorHandler>,
}

impl Task {
    /// Creates a task with no group membership.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::build(Box::new(f), None, None)
    }

    /// Creates a task belonging to `group`.
    pub fn with_group<F>(f: F, group: TaskGroup) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::build(Box::new(f), Some(group), None)
    }

    /// Creates a task from an already boxed thunk.
    pub fn from_fn(f: TaskFn, group: Option<TaskGroup>) -> Self {
        Self::build(f, group, None)
    }

    /// Attaches an error handler, replacing any previous one.
    pub fn on_error(mut self, handler: ErrorHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    fn build(thunk: TaskFn, group: Option<TaskGroup>, handler: Option<ErrorHandler>) -> Self {
        if let Some(group) = &group {
            group.task_created();
        }
        Task {
            id: TaskId::next(),
            thunk: Some(thunk),
            group,
            handler,
        }
    }

    /// The task's diagnostic id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The group this task belongs to, if any.
    pub fn group(&self) -> Option<&TaskGroup> {
        self.group.as_ref()
    }

    /// Attaches `handler` only if the task does not already carry one.
    pub(crate) fn fallback_handler(&mut self, handler: &ErrorHandler) {
        if self.handler.is_none() {
            self.handler = Some(handler.clone());
        }
    }

    /// Runs the task body exactly once.
    ///
    /// The task's group becomes the thread's current group for the
    /// duration. A cancelled group skips the thunk entirely. A panicking
    /// thunk is routed to the error handler when present and swallowed
    /// otherwise; panics never propagate to the caller.
    pub(crate) fn execute(mut self) {
        let _enter = group::enter(self.group.clone());
        let cancelled = self.group.as_ref().map_or(false, TaskGroup::is_cancelled);
        if let Some(thunk) = self.thunk.take() {
            if cancelled {
                drop(thunk);
            } else if let Err(payload) = catch_unwind(AssertUnwindSafe(thunk)) {
                let error = TaskError::from_payload(payload);
                match &self.handler {
                    Some(handler) => {
                        let handler = handler.clone();
                        let _ = catch_unwind(AssertUnwindSafe(move || handler(error)));
                    }
                    None => {
                        eprintln!("strand: task {:?} panicked: {}", self.id, error.message);
                    }
                }
            }
        }
        // Dropping `self` here releases the group, after body and handler.
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(group) = self.group.take() {
            group.task_finished();
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("grouped", &self.group.is_some())
            .finish()
    }
}
