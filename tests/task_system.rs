//! Integration tests for the worker pool, task groups, and the reentrant
//! wait.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use strand::executor::{ErrorHandler, TaskFn};
use strand::{Config, Task, TaskGroup, TaskPool};

fn pool(threads: usize) -> TaskPool {
    TaskPool::new(Config::builder().num_threads(threads).build().unwrap()).unwrap()
}

fn drain(rx: &Receiver<()>, n: usize) {
    for _ in 0..n {
        rx.recv_timeout(Duration::from_secs(10))
            .expect("timed out waiting for tasks");
    }
}

#[test]
fn test_submitted_tasks_all_run() {
    let pool = pool(4);
    let (tx, rx) = bounded(128);

    for _ in 0..100 {
        let tx = tx.clone();
        pool.submit_fn(move || {
            let _ = tx.send(());
        });
    }

    drain(&rx, 100);
}

#[test]
fn test_spawn_off_pool_degrades_to_submit() {
    let pool = pool(2);
    let (tx, rx) = bounded(4);

    let tx2 = tx.clone();
    pool.spawn_fn(
        move || {
            let _ = tx2.send(());
        },
        true,
    );

    drain(&rx, 1);
}

#[test]
fn test_spawned_children_inherit_group() {
    let pool = pool(4);
    let handle = pool.handle();
    let counter = Arc::new(AtomicUsize::new(0));

    let c = counter.clone();
    pool.spawn_and_wait(move || {
        for _ in 0..16 {
            let c = c.clone();
            handle.spawn_fn(
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                true,
            );
        }
    });

    // The wait covers the children because they inherited the group.
    assert_eq!(counter.load(Ordering::SeqCst), 16);
}

// A naive blocking wait would deadlock immediately here: one worker, and
// every iteration waits from inside a running task.
#[test]
fn test_reentrant_wait_on_single_worker() {
    let pool = pool(1);
    let handle = pool.handle();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        let h = handle.clone();
        let c = counter.clone();
        pool.spawn_and_wait(move || {
            let thunks: Vec<TaskFn> = (0..3)
                .map(|_| {
                    let c = c.clone();
                    Box::new(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    }) as TaskFn
                })
                .collect();
            h.spawn_and_wait_all(thunks);
        });
    }

    assert_eq!(counter.load(Ordering::SeqCst), 300);
}

#[test]
fn test_spawn_and_wait_from_external_thread() {
    let pool = pool(2);
    let done = Arc::new(AtomicUsize::new(0));

    let d = done.clone();
    pool.spawn_and_wait(move || {
        d.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_tasks_are_isolated() {
    let pool = pool(2);
    let (tx, rx) = bounded(64);

    let failures = Arc::new(AtomicUsize::new(0));
    let handler: ErrorHandler = {
        let failures = failures.clone();
        let tx = tx.clone();
        Arc::new(move |_err| {
            failures.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        })
    };

    for _ in 0..10 {
        pool.submit(Task::new(|| panic!("intentional")).on_error(handler.clone()));
    }
    drain(&rx, 10);
    assert_eq!(failures.load(Ordering::SeqCst), 10);

    // The pool stays healthy afterwards.
    for _ in 0..10 {
        let tx = tx.clone();
        pool.submit_fn(move || {
            let _ = tx.send(());
        });
    }
    drain(&rx, 10);
}

#[test]
fn test_cancelled_group_skips_pending_bodies() {
    let pool = pool(2);
    let group = TaskGroup::new();
    group.cancel();

    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let ran = ran.clone();
        pool.submit(Task::with_group(
            move || {
                ran.fetch_add(1, Ordering::SeqCst);
            },
            group.clone(),
        ));
    }

    pool.wait(&group);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(!group.is_active());
}

#[test]
fn test_parent_cancellation_reaches_children() {
    let pool = pool(2);
    let parent = TaskGroup::new();
    let child = TaskGroup::with_parent(parent.clone());
    parent.cancel();

    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let ran = ran.clone();
        pool.submit(Task::with_group(
            move || {
                ran.fetch_add(1, Ordering::SeqCst);
            },
            child.clone(),
        ));
    }

    pool.wait(&child);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_wait_returns_after_group_drains() {
    let pool = pool(4);
    let group = TaskGroup::new();
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let done = done.clone();
        pool.submit(Task::with_group(
            move || {
                std::thread::sleep(Duration::from_millis(1));
                done.fetch_add(1, Ordering::SeqCst);
            },
            group.clone(),
        ));
    }

    pool.wait(&group);
    assert_eq!(done.load(Ordering::SeqCst), 20);
    assert_eq!(group.active_tasks(), 0);
}

#[test]
fn test_shutdown_discards_queued_tasks() {
    let group = TaskGroup::new();
    {
        let pool = pool(1);
        // A slow head task holds the only worker so the rest stay queued.
        pool.submit_fn(|| std::thread::sleep(Duration::from_millis(50)));
        for _ in 0..100 {
            pool.submit(Task::with_group(|| {}, group.clone()));
        }
        // Dropping the pool joins the worker and discards the queue.
    }
    // Discarded tasks still release the group.
    assert_eq!(group.active_tasks(), 0);
}

#[test]
fn test_worker_stats_accumulate() {
    let pool = pool(2);
    let (tx, rx) = bounded(256);

    for _ in 0..200 {
        let tx = tx.clone();
        pool.submit_fn(move || {
            let _ = tx.send(());
        });
    }
    drain(&rx, 200);

    // Counters trail task completion by a hair; poll briefly.
    let mut executed = 0;
    for _ in 0..100 {
        executed = pool
            .worker_stats()
            .iter()
            .map(|s| s.tasks_executed)
            .sum::<u64>();
        if executed >= 200 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(executed, 200);
}
