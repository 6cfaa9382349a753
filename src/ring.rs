//! Bounded single-producer/single-consumer ring buffer.
//!
//! All cross-thread handoffs in the engine go through this queue:
//! orders into a shard, trades and events out of it, and the ingress
//! mailboxes. Capacity must be a power of two so the head/tail
//! counters wrap with a mask instead of a modulo.
//!
//! The SPSC contract is enforced by construction: [`RingBuffer::split`]
//! produces exactly one [`RingWriter`] and one [`RingReader`], neither
//! of which is cloneable. Both ends are wait-free.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::EngineError;

/// Head and tail live on separate cache lines so the producer and
/// consumer cores do not false-share.
#[repr(align(64))]
struct AlignedCounter(AtomicU64);

/// The shared ring storage. Not used directly; see [`RingBuffer::split`].
pub struct RingBuffer<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: u64,
    /// Next slot the producer will write. Only the producer stores it.
    head: AlignedCounter,
    /// Next slot the consumer will read. Only the consumer stores it.
    tail: AlignedCounter,
}

// Slots are only touched by the single producer (writes) and the
// single consumer (reads), synchronized through head/tail.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a ring and split it into its two ends.
    ///
    /// Fails with [`EngineError::RingCapacity`] unless `capacity` is a
    /// non-zero power of two.
    pub fn split(capacity: usize) -> Result<(RingWriter<T>, RingReader<T>), EngineError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(EngineError::RingCapacity(capacity));
        }
        let buf = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let ring = Arc::new(RingBuffer {
            buf,
            mask: (capacity - 1) as u64,
            head: AlignedCounter(AtomicU64::new(0)),
            tail: AlignedCounter(AtomicU64::new(0)),
        });
        Ok((RingWriter { ring: ring.clone() }, RingReader { ring }))
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of items currently queued. Exact when called from either
    /// endpoint's thread; a consistent snapshot otherwise.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        (head - tail) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Producer-side enqueue. Fails iff the ring holds `capacity`
    /// items.
    ///
    /// # Safety
    /// Must only be called from the single producer; the public
    /// [`RingWriter`] guarantees that.
    #[inline]
    unsafe fn try_enqueue(&self, item: T) -> Result<(), T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head - tail >= self.buf.len() as u64 {
            return Err(item);
        }
        let idx = (head & self.mask) as usize;
        // The slot is outside the consumer's visible window until the
        // release store below.
        unsafe { (*self.buf[idx].get()).write(item) };
        self.head.0.store(head + 1, Ordering::Release);
        Ok(())
    }

    /// Consumer-side dequeue.
    ///
    /// # Safety
    /// Must only be called from the single consumer; the public
    /// [`RingReader`] guarantees that.
    #[inline]
    unsafe fn try_dequeue(&self) -> Option<T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = (tail & self.mask) as usize;
        let item = unsafe { (*self.buf[idx].get()).assume_init_read() };
        self.tail.0.store(tail + 1, Ordering::Release);
        Some(item)
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // Both handles are gone; drop whatever was never consumed.
        let head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        for pos in tail..head {
            let idx = (pos & self.mask) as usize;
            unsafe { (*self.buf[idx].get()).assume_init_drop() };
        }
    }
}

/// The producing end of a ring. Not cloneable: exactly one exists.
pub struct RingWriter<T> {
    ring: Arc<RingBuffer<T>>,
}

impl<T> RingWriter<T> {
    /// Non-blocking enqueue; hands the item back when the ring is full.
    #[inline]
    pub fn try_enqueue(&mut self, item: T) -> Result<(), T> {
        unsafe { self.ring.try_enqueue(item) }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }
}

/// The consuming end of a ring. Not cloneable: exactly one exists.
pub struct RingReader<T> {
    ring: Arc<RingBuffer<T>>,
}

impl<T> RingReader<T> {
    /// Non-blocking dequeue; `None` when the ring is empty.
    #[inline]
    pub fn try_dequeue(&mut self) -> Option<T> {
        unsafe { self.ring.try_dequeue() }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(RingBuffer::<u64>::split(0).is_err());
        assert!(RingBuffer::<u64>::split(3).is_err());
        assert!(RingBuffer::<u64>::split(100).is_err());
        assert!(RingBuffer::<u64>::split(64).is_ok());
    }

    #[test]
    fn test_fifo_order() {
        let (mut w, mut r) = RingBuffer::split(8).unwrap();
        for i in 0..5u64 {
            w.try_enqueue(i).unwrap();
        }
        for i in 0..5u64 {
            assert_eq!(r.try_dequeue(), Some(i));
        }
        assert_eq!(r.try_dequeue(), None);
    }

    #[test]
    fn test_full_ring_rejects() {
        let (mut w, mut r) = RingBuffer::split(4).unwrap();
        for i in 0..4u64 {
            w.try_enqueue(i).unwrap();
        }
        assert!(w.is_full());
        assert_eq!(w.try_enqueue(99), Err(99));

        // One slot frees up after a dequeue
        assert_eq!(r.try_dequeue(), Some(0));
        w.try_enqueue(99).unwrap();
    }

    #[test]
    fn test_wraparound() {
        let (mut w, mut r) = RingBuffer::split(4).unwrap();
        // Cycle enough times to wrap the mask several times over
        for i in 0..100u64 {
            w.try_enqueue(i).unwrap();
            assert_eq!(r.try_dequeue(), Some(i));
        }
        assert!(r.is_empty());
    }

    #[test]
    fn test_len_tracking() {
        let (mut w, mut r) = RingBuffer::split(8).unwrap();
        assert_eq!(w.len(), 0);
        w.try_enqueue(1u32).unwrap();
        w.try_enqueue(2).unwrap();
        assert_eq!(w.len(), 2);
        r.try_dequeue();
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_drops_unconsumed_items() {
        // Box so a leak would be visible under sanitizers
        let (mut w, r) = RingBuffer::split(8).unwrap();
        for i in 0..6 {
            w.try_enqueue(Box::new(i)).unwrap();
        }
        drop(r);
        drop(w);
    }

    #[test]
    fn test_cross_thread_handoff() {
        const N: u64 = 100_000;
        let (mut w, mut r) = RingBuffer::split(1024).unwrap();

        let producer = std::thread::spawn(move || {
            for i in 0..N {
                let mut item = i;
                loop {
                    match w.try_enqueue(item) {
                        Ok(()) => break,
                        Err(back) => {
                            item = back;
                            std::hint::spin_loop();
                        }
                    }
                }
            }
        });

        let mut expected = 0u64;
        while expected < N {
            if let Some(v) = r.try_dequeue() {
                assert_eq!(v, expected);
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
    }
}
