//! Bounded single-producer single-consumer ring buffer.
//!
//! Message transport between the producer threads, the engine thread and the
//! broadcaster. Capacity is rounded up to the next power of two and indices
//! are free-running, masked on access. The producer publishes `head` with
//! release ordering and the consumer observes it with acquire (symmetric for
//! `tail`); each half keeps a private cached copy of the peer cursor and only
//! refreshes it from the shared atomic when the fast check suggests the ring
//! is full/empty.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Inner<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Inner<T> {
    #[inline]
    fn approx_size(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // Both halves are gone; drop whatever is still in flight.
        let head = self.head.load(Ordering::Relaxed);
        let mut tail = self.tail.load(Ordering::Relaxed);
        while tail != head {
            unsafe { (*self.buf[tail & self.mask].get()).assume_init_drop() };
            tail = tail.wrapping_add(1);
        }
    }
}

/// Create a bounded SPSC channel. `capacity` is rounded up to the next
/// power of two (minimum 2).
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let cap = capacity.next_power_of_two().max(2);
    let buf: Box<[UnsafeCell<MaybeUninit<T>>]> =
        (0..cap).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect();
    let inner = Arc::new(Inner {
        buf,
        mask: cap - 1,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
    });
    (
        Producer { inner: Arc::clone(&inner), cached_tail: 0 },
        Consumer { inner, cached_head: 0 },
    )
}

/// Writing half. Exactly one thread may own and use this.
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
    cached_tail: usize,
}

impl<T> Producer<T> {
    /// Store a value, or hand it back if the ring is full. Never blocks,
    /// never allocates.
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let head = self.inner.head.load(Ordering::Relaxed);
        if head.wrapping_sub(self.cached_tail) > self.inner.mask {
            self.cached_tail = self.inner.tail.load(Ordering::Acquire);
            if head.wrapping_sub(self.cached_tail) > self.inner.mask {
                return Err(value);
            }
        }
        unsafe { (*self.inner.buf[head & self.inner.mask].get()).write(value) };
        self.inner.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Best-effort occupancy snapshot for telemetry; not linearizable.
    #[inline]
    pub fn approx_size(&self) -> usize {
        self.inner.approx_size()
    }

    /// Rounded-up capacity of the ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.mask + 1
    }
}

/// Reading half. Exactly one thread may own and use this.
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
    cached_head: usize,
}

impl<T> Consumer<T> {
    /// Move the oldest value out, or `None` if the ring is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        if tail == self.cached_head {
            self.cached_head = self.inner.head.load(Ordering::Acquire);
            if tail == self.cached_head {
                return None;
            }
        }
        let value = unsafe { (*self.inner.buf[tail & self.inner.mask].get()).assume_init_read() };
        self.inner.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Best-effort occupancy snapshot for telemetry; not linearizable.
    #[inline]
    pub fn approx_size(&self) -> usize {
        self.inner.approx_size()
    }

    /// Rounded-up capacity of the ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.mask + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_to_power_of_two() {
        let (tx, _rx) = channel::<u64>(5);
        assert_eq!(tx.capacity(), 8);
        let (tx, _rx) = channel::<u64>(0);
        assert_eq!(tx.capacity(), 2);
    }

    #[test]
    fn push_pop_fifo() {
        let (mut tx, mut rx) = channel(8);
        for i in 0..5u64 {
            tx.push(i).unwrap();
        }
        for i in 0..5u64 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn full_returns_value() {
        let (mut tx, mut rx) = channel(4);
        for i in 0..4u64 {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.push(99), Err(99));
        assert_eq!(rx.pop(), Some(0));
        tx.push(99).unwrap();
    }

    #[test]
    fn approx_size_tracks_pushes_and_pops() {
        let (mut tx, mut rx) = channel(16);
        for i in 0..10u64 {
            tx.push(i).unwrap();
        }
        for _ in 0..4 {
            rx.pop().unwrap();
        }
        assert_eq!(tx.approx_size(), 6);
        assert_eq!(rx.approx_size(), 6);
    }

    #[test]
    fn wraps_around() {
        let (mut tx, mut rx) = channel(4);
        for round in 0..100u64 {
            tx.push(round).unwrap();
            tx.push(round + 1).unwrap();
            assert_eq!(rx.pop(), Some(round));
            assert_eq!(rx.pop(), Some(round + 1));
        }
    }

    #[test]
    fn cross_thread_transfer() {
        const N: u64 = 100_000;
        let (mut tx, mut rx) = channel(1024);
        let producer = std::thread::spawn(move || {
            for i in 0..N {
                let mut v = i;
                loop {
                    match tx.push(v) {
                        Ok(()) => break,
                        Err(back) => {
                            v = back;
                            std::hint::spin_loop();
                        }
                    }
                }
            }
        });
        let mut sum = 0u64;
        let mut received = 0u64;
        while received < N {
            if let Some(v) = rx.pop() {
                sum += v;
                received += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
        assert_eq!(sum, N * (N - 1) / 2);
    }
}
