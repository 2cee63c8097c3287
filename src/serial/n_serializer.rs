//! Bounded-parallelism execution: at most N tasks in flight at once.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::executor::{ErrorHandler, Executor, ExecutorRef, Task};

struct NQueue {
    /// Tasks currently handed to the base executor.
    active: usize,
    pending: VecDeque<Task>,
}

struct NSerializerState {
    limit: usize,
    base: ExecutorRef,
    cont: ExecutorRef,
    handler: Option<ErrorHandler>,
    queue: Mutex<NQueue>,
}

/// An executor that keeps at most `limit` of its tasks running
/// concurrently.
///
/// Tasks *start* in enqueue order; since up to `limit` run at once, they
/// may *finish* in any order. With `limit == 1` this behaves like a
/// [`Serializer`](crate::serial::Serializer).
#[derive(Clone)]
pub struct NSerializer {
    state: Arc<NSerializerState>,
}

impl NSerializer {
    /// N-serializer whose continuations go through `base` as well.
    pub fn new(limit: usize, base: ExecutorRef) -> Self {
        let cont = base.clone();
        Self::make(limit, base, cont, None)
    }

    /// N-serializer with distinct base and continuation executors.
    pub fn with_executors(limit: usize, base: ExecutorRef, cont: ExecutorRef) -> Self {
        Self::make(limit, base, cont, None)
    }

    /// N-serializer routing failures of handler-less tasks to `handler`.
    pub fn with_handler(limit: usize, base: ExecutorRef, handler: ErrorHandler) -> Self {
        let cont = base.clone();
        Self::make(limit, base, cont, Some(handler))
    }

    fn make(
        limit: usize,
        base: ExecutorRef,
        cont: ExecutorRef,
        handler: Option<ErrorHandler>,
    ) -> Self {
        assert!(limit > 0, "parallelism limit must be at least 1");
        NSerializer {
            state: Arc::new(NSerializerState {
                limit,
                base,
                cont,
                handler,
                queue: Mutex::new(NQueue {
                    active: 0,
                    pending: VecDeque::new(),
                }),
            }),
        }
    }

    /// The configured parallelism bound.
    pub fn limit(&self) -> usize {
        self.state.limit
    }
}

impl Executor for NSerializer {
    fn submit(&self, mut task: Task) {
        if let Some(handler) = &self.state.handler {
            task.fallback_handler(handler);
        }
        let starts: Vec<Task> = {
            let mut q = self.state.queue.lock();
            q.pending.push_back(task);
            let mut starts = Vec::new();
            while q.active < self.state.limit {
                match q.pending.pop_front() {
                    Some(next) => {
                        q.active += 1;
                        starts.push(next);
                    }
                    None => break,
                }
            }
            starts
        };
        for next in starts {
            self.state.base.submit(runner(self.state.clone(), next));
        }
    }
}

impl fmt::Debug for NSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.state.queue.lock();
        f.debug_struct("NSerializer")
            .field("limit", &self.state.limit)
            .field("active", &q.active)
            .field("pending", &q.pending.len())
            .finish_non_exhaustive()
    }
}

fn runner(state: Arc<NSerializerState>, task: Task) -> Task {
    Task::new(move || run_one(state, task))
}

/// Executes one task, then hands its slot to the next waiter if any.
fn run_one(state: Arc<NSerializerState>, task: Task) {
    task.execute();
    let next = {
        let mut q = state.queue.lock();
        match q.pending.pop_front() {
            Some(next) => Some(next),
            None => {
                q.active -= 1;
                None
            }
        }
    };
    if let Some(next) = next {
        let chained = runner(state.clone(), next);
        state.cont.submit(chained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ImmediateExecutor;
    use parking_lot::Mutex as PlMutex;

    #[test]
    fn test_limit_one_preserves_order() {
        let nser = NSerializer::new(1, Arc::new(ImmediateExecutor));
        let seen = Arc::new(PlMutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            nser.submit(Task::new(move || seen.lock().push(i)));
        }

        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn test_zero_limit_rejected() {
        let _ = NSerializer::new(0, Arc::new(ImmediateExecutor));
    }

    #[test]
    fn test_all_tasks_run() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let nser = NSerializer::new(4, Arc::new(ImmediateExecutor));
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..25 {
            let count = count.clone();
            nser.submit(Task::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(count.load(Ordering::SeqCst), 25);
    }
}
