//! Concurrent double-ended task container.
//!
//! A bounded lock-free ring handles the common case; once the ring is full,
//! elements spill into a mutex-guarded `VecDeque`. FIFO order is kept within
//! each path but not across the fast/slow boundary.
//!
//! The ring packs the `(start, end)` indices of the live window into one
//! 32-bit atomic, so claiming or releasing a slot is a single CAS. Payload
//! transfer is decoupled from index reservation through a small per-slot
//! state machine, keeping the CAS loop free of data movement.
//!
//! Intended use: each worker owns one of these for its tasks. The owner
//! pushes and pops at the front, thieves pop from the back, so the front
//! sees almost no contention.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::hint::spin_loop;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;

// Slot lifecycle. A slot cycles freed -> constructing -> valid ->
// destructing -> freed; producers own the first transition pair, consumers
// the second.
const FREED: u8 = 0;
const CONSTRUCTING: u8 = 1;
const VALID: u8 = 2;
const DESTRUCTING: u8 = 3;

struct Slot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Waits until `state` reads `from`, then claims the slot by storing `to`.
///
/// The peer holding the slot is mid payload move, so the wait is a handful
/// of instructions in practice: spin in doubling bursts, and only hand the
/// timeslice back if the peer got preempted.
fn claim_slot(state: &AtomicU8, from: u8, to: u8) {
    let mut burst = 1u32;
    while state
        .compare_exchange(from, to, Ordering::AcqRel, Ordering::Relaxed)
        .is_err()
    {
        if burst <= 64 {
            for _ in 0..burst {
                spin_loop();
            }
            burst <<= 1;
        } else {
            thread::yield_now();
        }
    }
}

/// Concurrent deque with a bounded lock-free fast path and an unbounded
/// mutex-guarded slow path.
///
/// Pushes never fail; pops return `None` on empty. Elements are moved in
/// and out, and no element is ever observed twice.
pub struct ConcurrentDeque<T> {
    /// Ring size; a power of two, so 16-bit index wraparound lands back on
    /// the same slot.
    size: u16,
    slots: Box<[Slot<T>]>,
    /// Packed live window: `start` in the low half, `end` in the high half,
    /// both interpreted modulo 2^16.
    range: AtomicU32,
    slow: Mutex<VecDeque<T>>,
    /// Lets consumers skip the slow-path lock when it holds nothing.
    slow_len: AtomicUsize,
}

unsafe impl<T: Send> Send for ConcurrentDeque<T> {}
unsafe impl<T: Send> Sync for ConcurrentDeque<T> {}

const MIN_SIZE: usize = 8;
const MAX_SIZE: usize = 1 << 15;

fn unpack(range: u32) -> (u16, u16) {
    (range as u16, (range >> 16) as u16)
}

fn pack(start: u16, end: u16) -> u32 {
    start as u32 | (end as u32) << 16
}

impl<T> ConcurrentDeque<T> {
    /// Creates a deque whose fast path holds about `capacity` elements.
    ///
    /// The capacity is rounded up to a power of two and clamped to
    /// `[8, 32768]`. Three slots of headroom are kept unusable so that
    /// concurrent index reservations cannot alias under wraparound.
    pub fn new(capacity: usize) -> Self {
        let size = capacity.next_power_of_two().clamp(MIN_SIZE, MAX_SIZE);
        let slots = (0..size)
            .map(|_| Slot {
                state: AtomicU8::new(FREED),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            size: size as u16,
            slots,
            range: AtomicU32::new(0),
            slow: Mutex::new(VecDeque::new()),
            slow_len: AtomicUsize::new(0),
        }
    }

    fn slot(&self, pos: u16) -> &Slot<T> {
        &self.slots[(pos & (self.size - 1)) as usize]
    }

    /// Claims the slot just past the current end. `None` when the ring is
    /// at capacity.
    fn reserve_back(&self) -> Option<u16> {
        let max_dist = self.size - 3;
        let mut cur = self.range.load(Ordering::Relaxed);
        loop {
            let (start, end) = unpack(cur);
            if end.wrapping_sub(start) > max_dist {
                return None;
            }
            match self.range.compare_exchange_weak(
                cur,
                pack(start, end.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(end),
                Err(actual) => cur = actual,
            }
        }
    }

    fn reserve_front(&self) -> Option<u16> {
        let max_dist = self.size - 3;
        let mut cur = self.range.load(Ordering::Relaxed);
        loop {
            let (start, end) = unpack(cur);
            if end.wrapping_sub(start) > max_dist {
                return None;
            }
            let new_start = start.wrapping_sub(1);
            match self.range.compare_exchange_weak(
                cur,
                pack(new_start, end),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(new_start),
                Err(actual) => cur = actual,
            }
        }
    }

    fn consume_front(&self) -> Option<u16> {
        let mut cur = self.range.load(Ordering::Relaxed);
        loop {
            let (start, end) = unpack(cur);
            if start == end {
                return None;
            }
            match self.range.compare_exchange_weak(
                cur,
                pack(start.wrapping_add(1), end),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(start),
                Err(actual) => cur = actual,
            }
        }
    }

    fn consume_back(&self) -> Option<u16> {
        let mut cur = self.range.load(Ordering::Relaxed);
        loop {
            let (start, end) = unpack(cur);
            if start == end {
                return None;
            }
            let new_end = end.wrapping_sub(1);
            match self.range.compare_exchange_weak(
                cur,
                pack(start, new_end),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(new_end),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Moves `value` into an already reserved slot.
    ///
    /// A lagging consumer may still be draining the slot from a previous
    /// lap; wait for it to publish `FREED`.
    fn construct(&self, pos: u16, value: T) {
        let slot = self.slot(pos);
        claim_slot(&slot.state, FREED, CONSTRUCTING);
        unsafe {
            (*slot.value.get()).write(value);
        }
        slot.state.store(VALID, Ordering::Release);
    }

    /// Moves the value out of an already consumed slot.
    ///
    /// A lagging producer may not have published the payload yet; wait for
    /// `VALID`.
    fn extract(&self, pos: u16) -> T {
        let slot = self.slot(pos);
        claim_slot(&slot.state, VALID, DESTRUCTING);
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.state.store(FREED, Ordering::Release);
        value
    }

    /// Pushes one element at the back. The default producing operation.
    pub fn push_back(&self, value: T) {
        if let Some(pos) = self.reserve_back() {
            self.construct(pos, value);
        } else {
            let mut slow = self.slow.lock();
            self.slow_len.fetch_add(1, Ordering::Relaxed);
            slow.push_back(value);
        }
    }

    /// Pushes one element at the front.
    pub fn push_front(&self, value: T) {
        if let Some(pos) = self.reserve_front() {
            self.construct(pos, value);
        } else {
            let mut slow = self.slow.lock();
            self.slow_len.fetch_add(1, Ordering::Relaxed);
            slow.push_front(value);
        }
    }

    /// Pops from the front. The default consuming operation.
    pub fn try_pop_front(&self) -> Option<T> {
        if let Some(pos) = self.consume_front() {
            return Some(self.extract(pos));
        }
        if self.slow_len.load(Ordering::Relaxed) > 0 {
            let mut slow = self.slow.lock();
            let value = slow.pop_front()?;
            self.slow_len.fetch_sub(1, Ordering::Relaxed);
            return Some(value);
        }
        None
    }

    /// Pops from the back; this is the stealing end.
    pub fn try_pop_back(&self) -> Option<T> {
        if let Some(pos) = self.consume_back() {
            return Some(self.extract(pos));
        }
        if self.slow_len.load(Ordering::Relaxed) > 0 {
            let mut slow = self.slow.lock();
            let value = slow.pop_back()?;
            self.slow_len.fetch_sub(1, Ordering::Relaxed);
            return Some(value);
        }
        None
    }

    /// Cheap emptiness hint; exact only when no other thread is mutating.
    pub fn is_empty(&self) -> bool {
        let (start, end) = unpack(self.range.load(Ordering::Acquire));
        start == end && self.slow_len.load(Ordering::Relaxed) == 0
    }

    /// Drops every remaining element.
    pub fn clear(&mut self) {
        while self.try_pop_front().is_some() {}
    }
}

impl<T> Drop for ConcurrentDeque<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T> fmt::Debug for ConcurrentDeque<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (start, end) = unpack(self.range.load(Ordering::Relaxed));
        f.debug_struct("ConcurrentDeque")
            .field("size", &self.size)
            .field("fast_len", &end.wrapping_sub(start))
            .field("slow_len", &self.slow_len.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_through_back() {
        let deque = ConcurrentDeque::new(16);
        for i in 0..5 {
            deque.push_back(i);
        }
        for i in 0..5 {
            assert_eq!(deque.try_pop_front(), Some(i));
        }
        assert_eq!(deque.try_pop_front(), None);
    }

    #[test]
    fn test_lifo_through_front() {
        let deque = ConcurrentDeque::new(16);
        for i in 0..5 {
            deque.push_front(i);
        }
        for i in (0..5).rev() {
            assert_eq!(deque.try_pop_front(), Some(i));
        }
    }

    #[test]
    fn test_pop_back_sees_oldest() {
        let deque = ConcurrentDeque::new(16);
        deque.push_front(1);
        deque.push_front(2);
        assert_eq!(deque.try_pop_back(), Some(1));
        assert_eq!(deque.try_pop_back(), Some(2));
        assert_eq!(deque.try_pop_back(), None);
    }

    #[test]
    fn test_spill_to_slow_path() {
        // Ring of 8 keeps 5 usable slots; the rest must spill and still
        // come back out.
        let deque = ConcurrentDeque::new(8);
        for i in 0..40 {
            deque.push_back(i);
        }
        let mut seen: Vec<i32> = std::iter::from_fn(|| deque.try_pop_front()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_index_wraparound() {
        let deque = ConcurrentDeque::new(8);
        // Far more cycles than 2^16 index values.
        for i in 0..200_000u32 {
            deque.push_back(i);
            assert_eq!(deque.try_pop_front(), Some(i));
        }
        assert!(deque.is_empty());
    }

    #[test]
    fn test_drop_releases_elements() {
        let marker = Arc::new(());
        {
            let deque = ConcurrentDeque::new(8);
            for _ in 0..20 {
                deque.push_back(marker.clone());
            }
            assert_eq!(Arc::strong_count(&marker), 21);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
