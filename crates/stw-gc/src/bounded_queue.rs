//! Lock-free bounded MPMC queue.
//!
//! Used to hand work between threads outside the stop-the-world window, most
//! notably dead finalizable objects from the GC thread to the finalizer thread.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::{Backoff, CachePadded};

/// One cell of the ring buffer.
struct Slot<T> {
    /// Sequence number deciding which role may touch the value next.
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Lock-free bounded multi-producer multi-consumer queue.
///
/// Based on Dmitry Vyukov's bounded MPMC queue.
///
/// Every cell carries a sequence number. A producer at position `pos` may
/// write the cell when its sequence equals `pos`; a consumer at `pos` may read
/// it when the sequence equals `pos + 1`. A sequence lagging behind tells the
/// producer the queue is full, and tells the consumer it is empty. Any other
/// mismatch means another thread won the race and the position is reloaded.
///
/// # Invariants
///
/// - `N > 0`
/// - A value is moved into exactly one cell and moved out exactly once
/// - Neither operation blocks: full and empty are reported to the caller
pub struct BoundedQueue<T, const N: usize> {
    buffer: Box<[Slot<T>]>,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

impl<T, const N: usize> BoundedQueue<T, N> {
    /// Create an empty queue with capacity `N`.
    ///
    /// # Panics
    ///
    /// Panics if `N` is zero.
    #[must_use]
    pub fn new() -> Self {
        assert!(N > 0, "BoundedQueue capacity N must be non-zero");

        let buffer = (0..N)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            buffer,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Try to push `value` at the tail.
    ///
    /// Returns the value back if the queue is full.
    ///
    /// # Errors
    ///
    /// `Err(value)` when every cell is occupied. This is backpressure, not a
    /// failure: the caller decides whether to retry, drop or escalate.
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        let backoff = Backoff::new();
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);

        loop {
            let slot = &self.buffer[pos % N];
            let seq = slot.sequence.load(Ordering::Acquire);
            #[allow(clippy::cast_possible_wrap)]
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: Winning the CAS on `enqueue_pos` gives this
                        // thread exclusive write access to the cell until the
                        // sequence store below publishes it to consumers.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Try to pop the value at the head.
    ///
    /// Returns `None` if nothing is ready.
    pub fn dequeue(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);

        loop {
            let slot = &self.buffer[pos % N];
            let seq = slot.sequence.load(Ordering::Acquire);
            #[allow(clippy::cast_possible_wrap)]
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: The Acquire load of `sequence == pos + 1`
                        // synchronizes with the producer's Release store, so
                        // the value is initialized. Winning the CAS makes this
                        // thread its only reader.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence.store(pos.wrapping_add(N), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => {
                        pos = current;
                        backoff.spin();
                    }
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Capacity of the queue.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Approximate number of values in the queue.
    ///
    /// Exact only when no other thread is operating on the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        loop {
            let tail = self.enqueue_pos.load(Ordering::SeqCst);
            let head = self.dequeue_pos.load(Ordering::SeqCst);
            if self.enqueue_pos.load(Ordering::SeqCst) == tail {
                return tail.wrapping_sub(head).min(N);
            }
        }
    }

    /// Whether the queue currently looks empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue currently looks full.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == N
    }
}

impl<T, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for BoundedQueue<T, N> {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}

impl<T, const N: usize> std::fmt::Debug for BoundedQueue<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &N)
            .field("len", &self.len())
            .finish()
    }
}

// SAFETY: BoundedQueue is safe to share between threads because:
// - Each cell's value is only accessed by the thread that won the CAS on the
//   matching position counter
// - The sequence number hand-off uses Release on publish and Acquire on read,
//   so a consumer never observes a cell before its value is written
// - Values are moved between threads, which requires `T: Send`
unsafe impl<T: Send, const N: usize> Send for BoundedQueue<T, N> {}

// SAFETY: See Send impl
unsafe impl<T: Send, const N: usize> Sync for BoundedQueue<T, N> {}

#[cfg(test)]
mod tests {
    use super::BoundedQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_bounded_queue_basic() {
        let queue: BoundedQueue<i32, 8> = BoundedQueue::new();
        assert!(queue.is_empty());

        assert!(queue.enqueue(42).is_ok());
        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.dequeue(), Some(42));
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_bounded_queue_capacity() {
        let queue: BoundedQueue<char, 4> = BoundedQueue::new();

        for c in ['a', 'b', 'c', 'd'] {
            assert!(queue.enqueue(c).is_ok());
        }
        assert!(queue.is_full());
        assert_eq!(queue.enqueue('e'), Err('e'));

        assert_eq!(queue.dequeue(), Some('a'));
        assert!(queue.enqueue('e').is_ok());
        assert_eq!(queue.enqueue('f'), Err('f'));
    }

    #[test]
    fn test_bounded_queue_wrap_around() {
        let queue: BoundedQueue<usize, 3> = BoundedQueue::new();

        for round in 0..10 {
            for i in 0..3 {
                assert!(queue.enqueue(round * 3 + i).is_ok(), "round {round} slot {i}");
            }
            for i in 0..3 {
                assert_eq!(queue.dequeue(), Some(round * 3 + i));
            }
            assert_eq!(queue.dequeue(), None);
        }
    }

    #[test]
    fn test_bounded_queue_capacity_one() {
        let queue: BoundedQueue<u8, 1> = BoundedQueue::new();
        assert!(queue.enqueue(1).is_ok());
        assert_eq!(queue.enqueue(2), Err(2));
        assert_eq!(queue.dequeue(), Some(1));
        assert!(queue.enqueue(2).is_ok());
        assert_eq!(queue.dequeue(), Some(2));
    }

    #[test]
    fn test_bounded_queue_drops_leftovers() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let queue: BoundedQueue<Counted, 4> = BoundedQueue::new();
            for _ in 0..3 {
                assert!(queue.enqueue(Counted(Arc::clone(&drops))).is_ok());
            }
            drop(queue.dequeue());
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    #[should_panic(expected = "must be non-zero")]
    fn test_bounded_queue_zero_capacity_panics() {
        let _queue: BoundedQueue<u8, 0> = BoundedQueue::new();
    }
}
