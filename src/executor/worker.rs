//! Worker thread loop and the thread-local worker identity.

use std::cell::RefCell;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use super::pool::PoolInner;

// Which pool (if any) the current thread works for. Fixed workers set this
// for their whole life; transient workers for the span of an enrollment.
thread_local! {
    static CURRENT_WORKER: RefCell<Option<(Weak<PoolInner>, usize)>> = RefCell::new(None);
}

pub(crate) fn set_current(pool: &PoolInner, index: usize) {
    CURRENT_WORKER.with(|cw| *cw.borrow_mut() = Some((pool.self_weak.clone(), index)));
}

pub(crate) fn clear_current() {
    CURRENT_WORKER.with(|cw| *cw.borrow_mut() = None);
}

/// The calling thread's worker index in `pool`, when it is one of its
/// workers.
pub(crate) fn current_index(pool: &PoolInner) -> Option<usize> {
    CURRENT_WORKER.with(|cw| {
        cw.borrow().as_ref().and_then(|(current, index)| {
            if Weak::ptr_eq(current, &pool.self_weak) {
                Some(*index)
            } else {
                None
            }
        })
    })
}

/// Main loop of a fixed worker.
pub(crate) fn run(pool: Arc<PoolInner>, index: usize) {
    let _ = pool.workers[index].thread.set(thread::current());
    set_current(&pool, index);

    let mut local_pops = 0u32;
    let mut idle_steps = 0u32;

    loop {
        if pool.shutdown.load(Ordering::Acquire) {
            break;
        }

        match pool.find_task(Some(index), &mut local_pops) {
            Some(task) => {
                idle_steps = 0;
                task.execute();
                pool.workers[index]
                    .counters
                    .executed
                    .fetch_add(1, Ordering::Relaxed);
            }
            None => idle(&pool, index, &mut idle_steps),
        }
    }

    clear_current();
}

// Escalating idle strategy: spin, then yield, then park flagged as
// sleeping. The park carries a short timeout so a wake lost to the
// flag/park race only costs one period.
fn idle(pool: &PoolInner, index: usize, steps: &mut u32) {
    const MAX_SPINS: u32 = 6;
    const MAX_YIELDS: u32 = 16;

    *steps += 1;

    if *steps <= MAX_SPINS {
        for _ in 0..(1u32 << *steps) {
            std::hint::spin_loop();
        }
    } else if *steps <= MAX_YIELDS {
        thread::yield_now();
    } else {
        let record = &pool.workers[index];
        record.sleeping.store(true, Ordering::SeqCst);
        // Last look before sleeping; a submit may have raced the flag.
        if pool.has_work() {
            record.sleeping.store(false, Ordering::SeqCst);
            return;
        }
        thread::park_timeout(Duration::from_millis(1));
        record.sleeping.store(false, Ordering::SeqCst);
    }
}
