//! Exclusive, enqueue-ordered execution on top of any base executor.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::executor::{ErrorHandler, Executor, ExecutorRef, Task};

struct SerializerState {
    base: ExecutorRef,
    cont: ExecutorRef,
    handler: Option<ErrorHandler>,
    pending: Mutex<VecDeque<Task>>,
    /// Tasks enqueued and not yet finished: the running one plus the FIFO.
    outstanding: AtomicUsize,
}

/// An executor that runs its tasks one at a time, in enqueue order.
///
/// At most one *runner* is scheduled on the base executor at any instant;
/// when a task finishes and more are waiting, the runner reschedules itself
/// through the continuation executor, so a chain of serialized tasks stays
/// on the worker that is already warm. Submission never blocks: surplus
/// tasks wait in an internal FIFO.
///
/// Cloning yields another handle to the same serialization domain.
#[derive(Clone)]
pub struct Serializer {
    state: Arc<SerializerState>,
}

impl Serializer {
    /// Serializer whose continuations go through `base` as well.
    pub fn new(base: ExecutorRef) -> Self {
        let cont = base.clone();
        Self::make(base, cont, None)
    }

    /// Serializer with distinct base and continuation executors.
    pub fn with_executors(base: ExecutorRef, cont: ExecutorRef) -> Self {
        Self::make(base, cont, None)
    }

    /// Serializer routing failures of handler-less tasks to `handler`.
    pub fn with_handler(base: ExecutorRef, handler: ErrorHandler) -> Self {
        let cont = base.clone();
        Self::make(base, cont, Some(handler))
    }

    fn make(base: ExecutorRef, cont: ExecutorRef, handler: Option<ErrorHandler>) -> Self {
        Serializer {
            state: Arc::new(SerializerState {
                base,
                cont,
                handler,
                pending: Mutex::new(VecDeque::new()),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }
}

impl Executor for Serializer {
    fn submit(&self, mut task: Task) {
        if let Some(handler) = &self.state.handler {
            task.fallback_handler(handler);
        }
        // The task enters the FIFO before the count moves, so the runner
        // scheduled by the 0 -> 1 transition always finds one to pop.
        self.state.pending.lock().push_back(task);
        if self.state.outstanding.fetch_add(1, Ordering::AcqRel) == 0 {
            self.state.base.submit(runner(self.state.clone()));
        }
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field(
                "outstanding",
                &self.state.outstanding.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

fn runner(state: Arc<SerializerState>) -> Task {
    Task::new(move || run_one(state))
}

/// Executes exactly one serialized task, then reschedules when more wait.
fn run_one(state: Arc<SerializerState>) {
    let task = state.pending.lock().pop_front();
    debug_assert!(task.is_some(), "runner scheduled without a pending task");
    if let Some(task) = task {
        task.execute();
    }
    if state.outstanding.fetch_sub(1, Ordering::AcqRel) > 1 {
        let next = state.clone();
        state.cont.submit(runner(next));
    }
}
