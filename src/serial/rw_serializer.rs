//! Readers/writer execution: parallel reads, exclusive ordered writes,
//! writer priority.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::executor::{ErrorHandler, Executor, ExecutorRef, Task};

// The three counters live packed in one atomic: pending writers in bits
// 32..48, running writers in 16..32, running readers in 0..16. All stores
// happen under the queue lock; loads are free.
fn pack(pending_writers: u16, running_writers: u16, running_readers: u16) -> u64 {
    (pending_writers as u64) << 32 | (running_writers as u64) << 16 | running_readers as u64
}

fn unpack(v: u64) -> (u16, u16, u16) {
    ((v >> 32) as u16, (v >> 16) as u16, v as u16)
}

/// Lock-free snapshot of an [`RwSerializer`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RwCounts {
    /// Write tasks waiting to start.
    pub pending_writers: usize,
    /// Write tasks currently executing (0 or 1).
    pub running_writers: usize,
    /// Read tasks currently executing.
    pub running_readers: usize,
}

struct RwQueues {
    pending_reads: VecDeque<Task>,
    pending_writes: VecDeque<Task>,
}

struct RwState {
    base: ExecutorRef,
    cont: ExecutorRef,
    handler: Option<ErrorHandler>,
    queues: Mutex<RwQueues>,
    counts: AtomicU64,
}

impl RwState {
    fn counts(&self) -> (u16, u16, u16) {
        unpack(self.counts.load(Ordering::Acquire))
    }

    // Callers hold the queue lock.
    fn set_counts(&self, pending_writers: u16, running_writers: u16, running_readers: u16) {
        self.counts.store(
            pack(pending_writers, running_writers, running_readers),
            Ordering::Release,
        );
    }

    /// Starts the next queued writer when nothing conflicts. Lock held.
    fn try_start_writer(&self, q: &mut RwQueues) -> Option<Task> {
        let (wp, wr, rr) = self.counts();
        if wr == 0 && rr == 0 {
            if let Some(task) = q.pending_writes.pop_front() {
                self.set_counts(wp - 1, 1, 0);
                return Some(task);
            }
        }
        None
    }
}

/// Binds a pair of executors over one shared state: reads run in parallel
/// with each other, writes run alone and in enqueue order.
///
/// Writers have priority: while any write is running *or waiting*, newly
/// enqueued reads are parked. The expectation is that writes are rare and
/// reads want the data the next write publishes, so pending writes drain
/// before parked reads resume.
///
/// Use [`reader()`](Self::reader) and [`writer()`](Self::writer) to get
/// the two executor faces; both are cheap clones over the shared state.
#[derive(Clone)]
pub struct RwSerializer {
    state: Arc<RwState>,
}

impl RwSerializer {
    /// Rw-serializer whose continuations go through `base` as well.
    pub fn new(base: ExecutorRef) -> Self {
        let cont = base.clone();
        Self::make(base, cont, None)
    }

    /// Rw-serializer with distinct base and continuation executors.
    pub fn with_executors(base: ExecutorRef, cont: ExecutorRef) -> Self {
        Self::make(base, cont, None)
    }

    /// Rw-serializer routing failures of handler-less tasks to `handler`.
    pub fn with_handler(base: ExecutorRef, handler: ErrorHandler) -> Self {
        let cont = base.clone();
        Self::make(base, cont, Some(handler))
    }

    fn make(base: ExecutorRef, cont: ExecutorRef, handler: Option<ErrorHandler>) -> Self {
        RwSerializer {
            state: Arc::new(RwState {
                base,
                cont,
                handler,
                queues: Mutex::new(RwQueues {
                    pending_reads: VecDeque::new(),
                    pending_writes: VecDeque::new(),
                }),
                counts: AtomicU64::new(0),
            }),
        }
    }

    /// The executor face for read tasks.
    pub fn reader(&self) -> RwReader {
        RwReader {
            state: self.state.clone(),
        }
    }

    /// The executor face for write tasks.
    pub fn writer(&self) -> RwWriter {
        RwWriter {
            state: self.state.clone(),
        }
    }

    /// Current counters, read without taking the lock; may lag a
    /// transition in progress.
    pub fn counts(&self) -> RwCounts {
        let (wp, wr, rr) = self.state.counts();
        RwCounts {
            pending_writers: wp as usize,
            running_writers: wr as usize,
            running_readers: rr as usize,
        }
    }
}

impl fmt::Debug for RwSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.counts();
        f.debug_struct("RwSerializer")
            .field("pending_writers", &c.pending_writers)
            .field("running_writers", &c.running_writers)
            .field("running_readers", &c.running_readers)
            .finish_non_exhaustive()
    }
}

/// Enqueues read tasks; obtained from [`RwSerializer::reader`].
#[derive(Clone)]
pub struct RwReader {
    state: Arc<RwState>,
}

impl Executor for RwReader {
    fn submit(&self, mut task: Task) {
        if let Some(handler) = &self.state.handler {
            task.fallback_handler(handler);
        }
        let run_now = {
            let mut q = self.state.queues.lock();
            let (wp, wr, rr) = self.state.counts();
            if wp == 0 && wr == 0 {
                self.state.set_counts(0, 0, rr + 1);
                Some(task)
            } else {
                q.pending_reads.push_back(task);
                None
            }
        };
        if let Some(task) = run_now {
            self.state
                .base
                .submit(read_runner(self.state.clone(), task));
        }
    }
}

impl fmt::Debug for RwReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwReader").finish_non_exhaustive()
    }
}

/// Enqueues write tasks; obtained from [`RwSerializer::writer`].
#[derive(Clone)]
pub struct RwWriter {
    state: Arc<RwState>,
}

impl Executor for RwWriter {
    fn submit(&self, mut task: Task) {
        if let Some(handler) = &self.state.handler {
            task.fallback_handler(handler);
        }
        let start = {
            let mut q = self.state.queues.lock();
            let (wp, wr, rr) = self.state.counts();
            q.pending_writes.push_back(task);
            self.state.set_counts(wp + 1, wr, rr);
            self.state.try_start_writer(&mut q)
        };
        if let Some(task) = start {
            self.state
                .base
                .submit(write_runner(self.state.clone(), task));
        }
    }
}

impl fmt::Debug for RwWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwWriter").finish_non_exhaustive()
    }
}

fn read_runner(state: Arc<RwState>, task: Task) -> Task {
    Task::new(move || {
        task.execute();
        on_read_done(state);
    })
}

fn write_runner(state: Arc<RwState>, task: Task) -> Task {
    Task::new(move || {
        task.execute();
        on_write_done(state);
    })
}

fn on_read_done(state: Arc<RwState>) {
    let next_writer = {
        let mut q = state.queues.lock();
        let (wp, wr, rr) = state.counts();
        debug_assert!(wr == 0 && rr > 0);
        state.set_counts(wp, wr, rr - 1);
        if rr == 1 {
            state.try_start_writer(&mut q)
        } else {
            None
        }
    };
    if let Some(task) = next_writer {
        state.cont.submit(write_runner(state.clone(), task));
    }
}

fn on_write_done(state: Arc<RwState>) {
    enum Follow {
        Writer(Task),
        Readers(Vec<Task>),
    }
    let follow = {
        let mut q = state.queues.lock();
        let (wp, wr, rr) = state.counts();
        debug_assert!(wr == 1 && rr == 0);
        state.set_counts(wp, 0, 0);
        if let Some(task) = state.try_start_writer(&mut q) {
            Follow::Writer(task)
        } else {
            // No writer waits; release every parked read at once.
            let readers: Vec<Task> = q.pending_reads.drain(..).collect();
            state.set_counts(wp, 0, readers.len() as u16);
            Follow::Readers(readers)
        }
    };
    match follow {
        Follow::Writer(task) => state.cont.submit(write_runner(state.clone(), task)),
        Follow::Readers(readers) => {
            for task in readers {
                state.base.submit(read_runner(state.clone(), task));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ImmediateExecutor;
    use parking_lot::Mutex as PlMutex;

    #[test]
    fn test_writers_preserve_order() {
        let rw = RwSerializer::new(Arc::new(ImmediateExecutor));
        let writer = rw.writer();
        let seen = Arc::new(PlMutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            writer.submit(Task::new(move || seen.lock().push(i)));
        }

        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
        assert_eq!(
            rw.counts(),
            RwCounts {
                pending_writers: 0,
                running_writers: 0,
                running_readers: 0
            }
        );
    }

    #[test]
    fn test_reads_and_writes_all_run() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let rw = RwSerializer::new(Arc::new(ImmediateExecutor));
        let count = Arc::new(AtomicUsize::new(0));

        for i in 0..20 {
            let count = count.clone();
            let task = Task::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
            if i % 5 == 0 {
                rw.writer().submit(task);
            } else {
                rw.reader().submit(task);
            }
        }

        assert_eq!(count.load(Ordering::SeqCst), 20);
        assert_eq!(rw.counts().running_readers, 0);
    }
}
