//! STRAND - work-stealing task execution with composable ordering
//!
//! A fixed pool of workers runs short, non-suspending tasks: each worker
//! owns a double-ended queue, pops its own work newest-first, and steals
//! the oldest work of its siblings when idle. On top of the pool sits a
//! family of *serializers* — executors that add ordering or parallelism
//! constraints without ever blocking a worker thread.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use strand::{Config, Executor, Task, TaskPool};
//!
//! let pool = TaskPool::new(Config::default()).unwrap();
//!
//! // Fan out, then wait; the waiting thread helps drain the pool.
//! let counter = Arc::new(AtomicUsize::new(0));
//! let c = counter.clone();
//! pool.spawn_and_wait(move || {
//!     c.fetch_add(1, Ordering::SeqCst);
//! });
//! assert_eq!(counter.load(Ordering::SeqCst), 1);
//!
//! // Serialized tasks run one at a time, in submission order.
//! let serializer = pool.serializer();
//! serializer.submit(Task::new(|| { /* exclusive access here */ }));
//! ```
//!
//! # Features
//!
//! - **Work Stealing**: LIFO local execution, FIFO stealing of the oldest
//!   tasks from sibling workers
//! - **Task Groups**: tree-shaped cancellation and join scopes
//! - **Reentrant Waiting**: `spawn_and_wait` executes pool work instead of
//!   blocking, so it is safe inside tasks and on single-worker pools
//! - **Serializers**: exclusive, bounded-N, and readers/writer executors
//!   layered over any base executor
//! - **Panic Isolation**: a failing task body reaches its error handler,
//!   never the worker

#![warn(missing_docs, missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod runtime;
pub mod serial;
pub mod spawn;
pub mod util;

// Re-export key types at crate root
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use executor::{
    Executor, ExecutorRef, GlobalExecutor, ImmediateExecutor, PoolHandle,
    SpawnContinuationExecutor, SpawnExecutor, Task, TaskGroup, TaskPool,
};
pub use runtime::{init, init_with_config, shutdown};
pub use serial::{NSerializer, RwSerializer, Serializer};
pub use spawn::{spawn, spawn_and_wait, spawn_and_wait_all, submit, wait};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn small_pool() -> TaskPool {
        TaskPool::new(Config::builder().num_threads(2).build().unwrap()).unwrap()
    }

    #[test]
    fn test_submit_executes() {
        let pool = small_pool();
        let (tx, rx) = crossbeam_channel::bounded(16);

        for _ in 0..10 {
            let tx = tx.clone();
            pool.submit_fn(move || {
                let _ = tx.send(());
            });
        }

        for _ in 0..10 {
            rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        }
    }

    #[test]
    fn test_spawn_and_wait_runs_inline_work() {
        let pool = small_pool();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        pool.spawn_and_wait(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_serializer_smoke() {
        let pool = small_pool();
        let serializer = pool.serializer();
        let counter = Arc::new(AtomicUsize::new(0));

        let group = TaskGroup::new();
        for _ in 0..10 {
            let c = counter.clone();
            serializer.submit(Task::with_group(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                group.clone(),
            ));
        }
        pool.wait(&group);

        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
