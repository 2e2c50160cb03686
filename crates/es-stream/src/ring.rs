//! Lock-free sample ring shared between the packet thread and the mix loop
//!
//! Single-producer single-consumer. The producer owns `write_pos`, the
//! consumer owns `read_pos`; each publishes with a release store and observes
//! the other with an acquire load. Both positions are monotonic counters,
//! masked into the power-of-two storage on access.

use std::sync::atomic::{AtomicUsize, Ordering};

use es_core::Sample;

/// SPSC ring buffer for PCM samples
pub struct SampleRing {
    buffer: Box<[Sample]>,
    capacity: usize,
    mask: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

impl SampleRing {
    /// Create a ring with at least `min_capacity` samples (rounded up to a
    /// power of two)
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.next_power_of_two();
        Self {
            buffer: vec![0; capacity].into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples the consumer may read
    #[inline]
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// Samples the producer may write
    #[inline]
    pub fn available_write(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.capacity - write.wrapping_sub(read)
    }

    /// Push samples (producer side)
    ///
    /// Writes are truncated when the ring is full: the consumer owns the
    /// read position, so the producer must never advance it to make room.
    /// Returns the number of samples actually written.
    pub fn push(&self, samples: &[Sample]) -> usize {
        let to_write = samples.len().min(self.available_write());
        if to_write == 0 {
            return 0;
        }

        let write = self.write_pos.load(Ordering::Relaxed);
        for (i, &sample) in samples[..to_write].iter().enumerate() {
            let idx = (write.wrapping_add(i)) & self.mask;
            // SAFETY: single producer, and the slots in [write, read+capacity)
            // are not visible to the consumer until the release store below
            unsafe {
                let ptr = self.buffer.as_ptr() as *mut Sample;
                ptr.add(idx).write(sample);
            }
        }

        self.write_pos
            .store(write.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Copy the oldest unread samples into `out` without consuming them
    /// (consumer side). Returns the number of samples copied.
    pub fn peek_into(&self, out: &mut [Sample]) -> usize {
        let to_read = out.len().min(self.available_read());
        let read = self.read_pos.load(Ordering::Relaxed);
        for (i, slot) in out[..to_read].iter_mut().enumerate() {
            *slot = self.buffer[(read.wrapping_add(i)) & self.mask];
        }
        to_read
    }

    /// Consume `n` samples (consumer side)
    pub fn skip(&self, n: usize) -> usize {
        let to_skip = n.min(self.available_read());
        let read = self.read_pos.load(Ordering::Relaxed);
        self.read_pos
            .store(read.wrapping_add(to_skip), Ordering::Release);
        to_skip
    }

    /// Drop everything unread (consumer side)
    pub fn clear(&self) {
        let write = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write, Ordering::Release);
    }
}
