//! Task execution infrastructure.
//!
//! This module provides the core scheduling primitives: tasks and task
//! groups, the executor abstraction, and the work-stealing worker pool.

pub mod exec;
pub mod group;
pub mod pool;
pub mod task;

pub(crate) mod worker;

pub use exec::{
    Executor, ExecutorRef, GlobalExecutor, ImmediateExecutor, SpawnContinuationExecutor,
    SpawnExecutor,
};
pub use group::TaskGroup;
pub use pool::{PoolHandle, TaskPool, WorkerStats};
pub use task::{ErrorHandler, Task, TaskError, TaskFn, TaskId};
