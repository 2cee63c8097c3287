//! The executor abstraction and the standard executors.
//!
//! An executor is anything that takes a [`Task`] and arranges for it to
//! run. Composition happens through [`ExecutorRef`]: the serializers hold
//! one and layer their ordering constraints on top of it.

use std::fmt;
use std::sync::Arc;

use super::pool::PoolInner;
use super::task::Task;

/// Schedules tasks for execution.
///
/// Implementations must tolerate concurrent submissions from many threads
/// and must not block on the completion of the submitted task.
pub trait Executor: Send + Sync + 'static {
    /// Takes ownership of `task` and schedules it.
    fn submit(&self, task: Task);
}

/// Shared, type-erased executor handle.
pub type ExecutorRef = Arc<dyn Executor>;

/// Submits through the pool's external channel; the most general route.
#[derive(Clone)]
pub struct GlobalExecutor {
    pub(crate) pool: Arc<PoolInner>,
}

impl Executor for GlobalExecutor {
    fn submit(&self, task: Task) {
        self.pool.submit(task);
    }
}

impl fmt::Debug for GlobalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalExecutor").finish_non_exhaustive()
    }
}

/// Spawns to the current worker's deque and wakes a sibling so stealing
/// can begin at once. Falls back to the external channel off-pool.
#[derive(Clone)]
pub struct SpawnExecutor {
    pub(crate) pool: Arc<PoolInner>,
}

impl Executor for SpawnExecutor {
    fn submit(&self, task: Task) {
        self.pool.spawn(task, true);
    }
}

impl fmt::Debug for SpawnExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnExecutor").finish_non_exhaustive()
    }
}

/// Like [`SpawnExecutor`] but without the wake: the current worker picks
/// the task up next. The right choice when the task continues the work the
/// worker just finished.
#[derive(Clone)]
pub struct SpawnContinuationExecutor {
    pub(crate) pool: Arc<PoolInner>,
}

impl Executor for SpawnContinuationExecutor {
    fn submit(&self, task: Task) {
        self.pool.spawn(task, false);
    }
}

impl fmt::Debug for SpawnContinuationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnContinuationExecutor")
            .finish_non_exhaustive()
    }
}

/// Runs the task inline on the submitting thread. Degenerate but handy as
/// a base executor in tests and single-threaded setups.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateExecutor;

impl Executor for ImmediateExecutor {
    fn submit(&self, task: Task) {
        task.execute();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_immediate_runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        ImmediateExecutor.submit(Task::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_executor_ref_erases_type() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let exec: ExecutorRef = Arc::new(ImmediateExecutor);
        exec.submit(Task::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
