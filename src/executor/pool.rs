//! The worker pool: fixed workers, the external-submit channel, and the
//! cooperative join loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_deque::{Injector, Steal};
use rand::Rng;

use super::exec::{GlobalExecutor, SpawnContinuationExecutor, SpawnExecutor};
use super::group::TaskGroup;
use super::task::{Task, TaskFn};
use super::worker;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::serial::{NSerializer, RwSerializer, Serializer};
use crate::util::{CachePadded, ConcurrentDeque};

/// How many tasks a worker pops from its own deque before it looks at the
/// external channel once, so a saturated pool cannot starve submitters.
const EXTERNAL_CHECK_INTERVAL: u32 = 64;

#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub(crate) executed: AtomicU64,
    pub(crate) stolen: AtomicU64,
}

/// Point-in-time per-worker counters, for tests and tuning.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStats {
    /// Tasks this worker has executed.
    pub tasks_executed: u64,
    /// Tasks this worker has taken from other workers' deques.
    pub tasks_stolen: u64,
}

/// One worker slot. Slots `0..num_workers` belong to the fixed workers;
/// the rest are claimed temporarily by threads enrolling through
/// `spawn_and_wait`.
pub(crate) struct WorkerRecord {
    pub(crate) deque: ConcurrentDeque<Task>,
    pub(crate) sleeping: AtomicBool,
    /// Whether the slot currently has an owner; thieves skip empty slots.
    pub(crate) occupied: AtomicBool,
    /// Unpark handle, registered by fixed workers on startup.
    pub(crate) thread: OnceLock<Thread>,
    pub(crate) counters: WorkerCounters,
}

pub(crate) struct PoolInner {
    pub(crate) workers: Box<[CachePadded<WorkerRecord>]>,
    /// Count of fixed workers; `workers` holds this many reserved slots on
    /// top for transient enrollment.
    pub(crate) num_workers: usize,
    pub(crate) injector: Injector<Task>,
    pub(crate) shutdown: AtomicBool,
    /// Identity handle for the thread-local worker registration.
    pub(crate) self_weak: Weak<PoolInner>,
}

impl PoolInner {
    /// External submission: into the channel, then wake one sleeper.
    pub(crate) fn submit(&self, task: Task) {
        self.injector.push(task);
        self.wake_one();
    }

    /// Worker-local spawn; degrades to `submit` off-pool. The task goes to
    /// the front of the spawning worker's deque, so locally spawned
    /// children run newest-first.
    pub(crate) fn spawn(&self, task: Task, wake: bool) {
        match worker::current_index(self) {
            Some(index) => {
                self.workers[index].deque.push_front(task);
                if wake {
                    self.wake_one();
                }
            }
            None => self.submit(task),
        }
    }

    /// Spawns a batch, waking a worker for each thunk but the last; the
    /// spawning worker takes the last one itself.
    pub(crate) fn spawn_batch<I>(&self, thunks: I, group: Option<TaskGroup>)
    where
        I: IntoIterator<Item = TaskFn>,
    {
        let mut iter = thunks.into_iter().peekable();
        while let Some(thunk) = iter.next() {
            let wake = iter.peek().is_some();
            self.spawn(Task::from_fn(thunk, group.clone()), wake);
        }
    }

    pub(crate) fn spawn_and_wait_one<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let enrolled = self.enter_worker();
        let group = wait_group();
        self.spawn(Task::with_group(f, group.clone()), false);
        self.busy_wait_on(&group);
        if let Some(index) = enrolled {
            self.exit_worker(index);
        }
    }

    pub(crate) fn spawn_and_wait_many<I>(&self, thunks: I)
    where
        I: IntoIterator<Item = TaskFn>,
    {
        let enrolled = self.enter_worker();
        let group = wait_group();
        self.spawn_batch(thunks, Some(group.clone()));
        self.busy_wait_on(&group);
        if let Some(index) = enrolled {
            self.exit_worker(index);
        }
    }

    /// Task-finding ladder shared by the worker loop and the cooperative
    /// wait: own deque front, then steal, then the external channel.
    pub(crate) fn find_task(&self, index: Option<usize>, local_pops: &mut u32) -> Option<Task> {
        if let Some(index) = index {
            if *local_pops >= EXTERNAL_CHECK_INTERVAL {
                *local_pops = 0;
                if let Some(task) = self.pop_external() {
                    return Some(task);
                }
            }
            if let Some(task) = self.workers[index].deque.try_pop_front() {
                *local_pops += 1;
                return Some(task);
            }
        }
        if let Some(task) = self.steal(index) {
            return Some(task);
        }
        self.pop_external()
    }

    pub(crate) fn pop_external(&self) -> Option<Task> {
        loop {
            match self.injector.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Steals from the back of another worker's deque, visiting victims
    /// cyclically from a random starting point.
    fn steal(&self, thief: Option<usize>) -> Option<Task> {
        let total = self.workers.len();
        let start = rand::thread_rng().gen_range(0..total);
        for offset in 0..total {
            let victim = (start + offset) % total;
            if Some(victim) == thief {
                continue;
            }
            let record = &self.workers[victim];
            if !record.occupied.load(Ordering::Acquire) {
                continue;
            }
            if let Some(task) = record.deque.try_pop_back() {
                if let Some(thief) = thief {
                    self.workers[thief]
                        .counters
                        .stolen
                        .fetch_add(1, Ordering::Relaxed);
                }
                return Some(task);
            }
        }
        None
    }

    /// Runs tasks on the calling thread until `group` has none in flight.
    ///
    /// Cancellation is not consulted here: cancelling the group makes its
    /// remaining tasks complete quickly, which ends the wait through the
    /// active count.
    pub(crate) fn busy_wait_on(&self, group: &TaskGroup) {
        let index = worker::current_index(self);
        let mut local_pops = 0u32;
        let mut dry_rounds = 0u32;
        while group.is_active() {
            match self.find_task(index, &mut local_pops) {
                Some(task) => {
                    task.execute();
                    if let Some(index) = index {
                        self.workers[index]
                            .counters
                            .executed
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    dry_rounds = 0;
                }
                None => {
                    // Every queue came up empty; the tasks we wait on are
                    // running elsewhere. Ease off the queues, but never
                    // park: only the group's count ends this loop.
                    dry_rounds += 1;
                    if dry_rounds <= 32 {
                        std::hint::spin_loop();
                    } else if dry_rounds <= 256 {
                        thread::yield_now();
                    } else {
                        thread::sleep(Duration::from_micros(20));
                    }
                }
            }
        }
    }

    /// Enrolls a non-worker thread into a reserved slot, making it a steal
    /// victim for the duration. Returns `None` when the thread already is
    /// a worker of this pool or no slot is free (the caller then waits
    /// without owning a deque).
    pub(crate) fn enter_worker(&self) -> Option<usize> {
        if worker::current_index(self).is_some() {
            return None;
        }
        for index in self.num_workers..self.workers.len() {
            let record = &self.workers[index];
            if record
                .occupied
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                worker::set_current(self, index);
                return Some(index);
            }
        }
        None
    }

    /// Releases a reserved slot. Tasks still in the transient deque move
    /// to the external channel.
    pub(crate) fn exit_worker(&self, index: usize) {
        worker::clear_current();
        let mut moved = false;
        while let Some(task) = self.workers[index].deque.try_pop_front() {
            self.injector.push(task);
            moved = true;
        }
        self.workers[index].occupied.store(false, Ordering::Release);
        if moved {
            self.wake_one();
        }
    }

    /// Unparks one sleeping worker; a no-op when none sleeps.
    fn wake_one(&self) {
        for record in &self.workers[..self.num_workers] {
            if record.sleeping.swap(false, Ordering::AcqRel) {
                if let Some(thread) = record.thread.get() {
                    thread.unpark();
                }
                return;
            }
        }
    }

    fn wake_all(&self) {
        for record in &self.workers[..self.num_workers] {
            record.sleeping.store(false, Ordering::SeqCst);
            if let Some(thread) = record.thread.get() {
                thread.unpark();
            }
        }
    }

    /// Whether any queue in the pool holds a task. Used as the final check
    /// before a worker parks.
    pub(crate) fn has_work(&self) -> bool {
        if !self.injector.is_empty() {
            return true;
        }
        self.workers
            .iter()
            .any(|record| record.occupied.load(Ordering::Acquire) && !record.deque.is_empty())
    }
}

/// Group for a `spawn_and_wait`, nested under the current task's group so
/// an outer cancellation reaches the waited-on tasks too.
fn wait_group() -> TaskGroup {
    match TaskGroup::current() {
        Some(parent) => TaskGroup::with_parent(parent),
        None => TaskGroup::new(),
    }
}

/// A fixed-size work-stealing worker pool.
///
/// Workers pop their own deques front-first (newest task, best locality)
/// and steal from the back of their victims (oldest task, most likely an
/// independent root). External submissions flow through a shared channel
/// that workers drain when their own deques run dry.
///
/// Dropping the pool shuts it down: workers are woken and joined, and any
/// task still queued is discarded without running.
pub struct TaskPool {
    inner: Arc<PoolInner>,
    threads: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Starts a pool as described by `config`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let num_workers = config.worker_threads();
        // Reserved slots for transient waiters, one per fixed worker.
        let total_slots = num_workers * 2;
        let capacity = config.deque_capacity.max(total_slots * 2);

        let workers: Box<[CachePadded<WorkerRecord>]> = (0..total_slots)
            .map(|index| {
                CachePadded::new(WorkerRecord {
                    deque: ConcurrentDeque::new(capacity),
                    sleeping: AtomicBool::new(false),
                    occupied: AtomicBool::new(index < num_workers),
                    thread: OnceLock::new(),
                    counters: WorkerCounters::default(),
                })
            })
            .collect();

        let inner = Arc::new_cyclic(|self_weak| PoolInner {
            workers,
            num_workers,
            injector: Injector::new(),
            shutdown: AtomicBool::new(false),
            self_weak: self_weak.clone(),
        });

        let mut threads = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let name = format!("{}-{}", config.thread_name_prefix, index);
            let mut builder = thread::Builder::new().name(name);
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }
            let pool = inner.clone();
            match builder.spawn(move || worker::run(pool, index)) {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    inner.shutdown.store(true, Ordering::Release);
                    inner.wake_all();
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(Error::executor(format!("failed to start worker: {e}")));
                }
            }
        }

        Ok(Self { inner, threads })
    }

    /// A cloneable handle to this pool, usable from inside tasks. The
    /// handle does not keep the workers alive or shut them down.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            inner: self.inner.clone(),
        }
    }

    /// Submits a task through the external channel.
    pub fn submit(&self, task: Task) {
        self.inner.submit(task);
    }

    /// Convenience wrapper building the task from a closure.
    pub fn submit_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::new(f));
    }

    /// Spawns a task on the current worker's deque; from a non-worker
    /// thread this is equivalent to [`submit`](Self::submit).
    ///
    /// `wake` controls whether another worker is signalled; pass `false`
    /// for continuations the current worker should pick up itself.
    pub fn spawn(&self, task: Task, wake: bool) {
        self.inner.spawn(task, wake);
    }

    /// Spawns a closure that inherits the current task's group.
    pub fn spawn_fn<F>(&self, f: F, wake: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task::from_fn(Box::new(f), TaskGroup::current());
        self.spawn(task, wake);
    }

    /// Spawns a batch of thunks inheriting the current task's group,
    /// waking a worker for each but the last.
    pub fn spawn_all<I>(&self, thunks: I)
    where
        I: IntoIterator<Item = TaskFn>,
    {
        self.inner.spawn_batch(thunks, TaskGroup::current());
    }

    /// Runs `f` as a task and waits for it (and everything it spawns into
    /// its group) to finish, executing other pool work while waiting.
    ///
    /// Callable from worker and non-worker threads alike; a non-worker
    /// enrolls as a transient worker for the duration, so the wait adds
    /// compute instead of blocking a thread the pool may need.
    pub fn spawn_and_wait<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.spawn_and_wait_one(f);
    }

    /// Batch form of [`spawn_and_wait`](Self::spawn_and_wait): spawns all
    /// thunks into one group and waits for the group to drain.
    pub fn spawn_and_wait_all<I>(&self, thunks: I)
    where
        I: IntoIterator<Item = TaskFn>,
    {
        self.inner.spawn_and_wait_many(thunks);
    }

    /// Waits until `group` has no tasks in flight, executing pool work on
    /// the calling thread in the meantime.
    pub fn wait(&self, group: &TaskGroup) {
        self.inner.busy_wait_on(group);
    }

    /// Number of fixed worker threads.
    pub fn num_workers(&self) -> usize {
        self.inner.num_workers
    }

    /// Counters of the fixed workers.
    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.inner.workers[..self.inner.num_workers]
            .iter()
            .map(|record| WorkerStats {
                tasks_executed: record.counters.executed.load(Ordering::Relaxed),
                tasks_stolen: record.counters.stolen.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Executor submitting through the external channel.
    pub fn executor(&self) -> GlobalExecutor {
        GlobalExecutor {
            pool: self.inner.clone(),
        }
    }

    /// Executor that spawns to the current worker and wakes a sibling.
    pub fn spawn_executor(&self) -> SpawnExecutor {
        SpawnExecutor {
            pool: self.inner.clone(),
        }
    }

    /// Executor that spawns to the current worker without waking anyone;
    /// meant for continuations.
    pub fn spawn_continuation_executor(&self) -> SpawnContinuationExecutor {
        SpawnContinuationExecutor {
            pool: self.inner.clone(),
        }
    }

    /// An exclusive, enqueue-ordered executor over this pool.
    pub fn serializer(&self) -> Serializer {
        Serializer::with_executors(
            Arc::new(self.executor()),
            Arc::new(self.spawn_continuation_executor()),
        )
    }

    /// An executor running at most `limit` of its tasks concurrently.
    pub fn n_serializer(&self, limit: usize) -> NSerializer {
        NSerializer::with_executors(
            limit,
            Arc::new(self.executor()),
            Arc::new(self.spawn_continuation_executor()),
        )
    }

    /// A readers/writer executor pair over this pool.
    pub fn rw_serializer(&self) -> RwSerializer {
        RwSerializer::with_executors(
            Arc::new(self.executor()),
            Arc::new(self.spawn_continuation_executor()),
        )
    }

    /// Stops the workers and discards everything still queued.
    pub fn shutdown(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wake_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        // Dropping discarded tasks releases their groups, so joiners of a
        // half-finished group still unblock.
        while self.inner.pop_external().is_some() {}
        for record in self.inner.workers.iter() {
            while record.deque.try_pop_front().is_some() {}
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("num_workers", &self.inner.num_workers)
            .finish_non_exhaustive()
    }
}

/// Cloneable reference to a [`TaskPool`], for use from inside tasks or
/// other threads. Holding one neither keeps the workers running nor shuts
/// them down; submissions after shutdown are silently discarded.
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<PoolInner>,
}

impl PoolHandle {
    /// See [`TaskPool::submit`].
    pub fn submit(&self, task: Task) {
        self.inner.submit(task);
    }

    /// See [`TaskPool::submit_fn`].
    pub fn submit_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::new(f));
    }

    /// See [`TaskPool::spawn`].
    pub fn spawn(&self, task: Task, wake: bool) {
        self.inner.spawn(task, wake);
    }

    /// See [`TaskPool::spawn_fn`].
    pub fn spawn_fn<F>(&self, f: F, wake: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task::from_fn(Box::new(f), TaskGroup::current());
        self.spawn(task, wake);
    }

    /// See [`TaskPool::spawn_all`].
    pub fn spawn_all<I>(&self, thunks: I)
    where
        I: IntoIterator<Item = TaskFn>,
    {
        self.inner.spawn_batch(thunks, TaskGroup::current());
    }

    /// See [`TaskPool::spawn_and_wait`].
    pub fn spawn_and_wait<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.spawn_and_wait_one(f);
    }

    /// See [`TaskPool::spawn_and_wait_all`].
    pub fn spawn_and_wait_all<I>(&self, thunks: I)
    where
        I: IntoIterator<Item = TaskFn>,
    {
        self.inner.spawn_and_wait_many(thunks);
    }

    /// See [`TaskPool::wait`].
    pub fn wait(&self, group: &TaskGroup) {
        self.inner.busy_wait_on(group);
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("num_workers", &self.inner.num_workers)
            .finish_non_exhaustive()
    }
}
