//! Stress tests for the concurrent deque: whatever goes in comes out,
//! exactly once, under producer/consumer contention.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use strand::util::ConcurrentDeque;

/// Hammers one deque with `producers` pushing threads and `consumers`
/// popping threads, then checks the popped multiset equals the pushed one.
fn run_stress(capacity: usize, producers: usize, consumers: usize, per_producer: usize) {
    let total = producers * per_producer;
    let deque = Arc::new(ConcurrentDeque::new(capacity));
    let popped = Arc::new(AtomicUsize::new(0));

    let mut producer_handles = Vec::new();
    for p in 0..producers {
        let deque = deque.clone();
        producer_handles.push(thread::spawn(move || {
            for i in 0..per_producer {
                let value = ((p as u64) << 32) | i as u64;
                if i % 2 == 0 {
                    deque.push_back(value);
                } else {
                    deque.push_front(value);
                }
            }
        }));
    }

    let mut consumer_handles = Vec::new();
    for c in 0..consumers {
        let deque = deque.clone();
        let popped = popped.clone();
        consumer_handles.push(thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                let value = if c % 2 == 0 {
                    deque.try_pop_front()
                } else {
                    deque.try_pop_back()
                };
                match value {
                    Some(v) => {
                        seen.push(v);
                        popped.fetch_add(1, Ordering::SeqCst);
                    }
                    None => {
                        if popped.load(Ordering::SeqCst) == total {
                            break;
                        }
                        thread::yield_now();
                    }
                }
            }
            seen
        }));
    }

    for handle in producer_handles {
        handle.join().unwrap();
    }

    let mut counts: HashMap<u64, usize> = HashMap::new();
    for handle in consumer_handles {
        for value in handle.join().unwrap() {
            *counts.entry(value).or_default() += 1;
        }
    }

    assert_eq!(counts.len(), total, "lost or fabricated elements");
    assert!(
        counts.values().all(|&n| n == 1),
        "an element was popped twice"
    );
}

#[test]
fn test_multiset_preserved_under_contention() {
    run_stress(256, 4, 4, 10_000);
}

// A tiny ring forces constant spillover and many index wraparounds.
#[test]
fn test_small_ring_spill_and_wraparound() {
    run_stress(8, 2, 2, 50_000);
}

#[test]
fn test_single_producer_single_consumer() {
    run_stress(64, 1, 1, 100_000);
}
