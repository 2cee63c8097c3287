//! Free-function spawn API over the global runtime.
//!
//! These are thin wrappers around the global [`TaskPool`]; each call
//! lazily starts the pool on first use. For an explicitly sized or
//! isolated pool, construct a [`TaskPool`] and use its methods directly.
//!
//! [`TaskPool`]: crate::executor::TaskPool

use crate::executor::{
    GlobalExecutor, SpawnContinuationExecutor, SpawnExecutor, Task, TaskFn, TaskGroup,
};
use crate::runtime;

/// Submits a task to the global pool through the external channel.
pub fn submit(task: Task) {
    runtime::global().pool().submit(task);
}

/// Spawns `f` as a task on the current worker's deque, inheriting the
/// current task group, and wakes a sibling worker so stealing can begin.
///
/// From a non-worker thread this degrades to [`submit`].
pub fn spawn<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    runtime::global().pool().spawn_fn(f, true);
}

/// Like [`spawn`], but without waking anyone: the current worker picks the
/// task up next. Use for continuations of the work just finished.
pub fn spawn_continuation<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    runtime::global().pool().spawn_fn(f, false);
}

/// Spawns a batch of thunks, waking a worker for each but the last.
pub fn spawn_all<I>(thunks: I)
where
    I: IntoIterator<Item = TaskFn>,
{
    runtime::global().pool().spawn_all(thunks);
}

/// Runs `f` as a task and waits for it (plus everything it spawns into
/// its group) to finish, executing other pool work while waiting.
///
/// Safe to call from inside a task: the wait drains the pool instead of
/// blocking a worker, so even a single-worker pool makes progress.
pub fn spawn_and_wait<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    runtime::global().pool().spawn_and_wait(f);
}

/// Batch form of [`spawn_and_wait`].
pub fn spawn_and_wait_all<I>(thunks: I)
where
    I: IntoIterator<Item = TaskFn>,
{
    runtime::global().pool().spawn_and_wait_all(thunks);
}

/// Waits until `group` has no tasks in flight, executing pool work on the
/// calling thread in the meantime.
pub fn wait(group: &TaskGroup) {
    runtime::global().pool().wait(group);
}

/// Executor submitting through the global pool's external channel.
pub fn global_executor() -> GlobalExecutor {
    runtime::global().pool().executor()
}

/// Executor that spawns to the current worker and wakes a sibling.
pub fn spawn_executor() -> SpawnExecutor {
    runtime::global().pool().spawn_executor()
}

/// Executor that spawns continuations without waking anyone.
pub fn spawn_continuation_executor() -> SpawnContinuationExecutor {
    runtime::global().pool().spawn_continuation_executor()
}
