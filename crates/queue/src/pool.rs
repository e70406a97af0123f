//! Lock-free pool of raw-frame buffers
//!
//! Frames are copied into pooled `BytesMut` buffers on receipt and the
//! buffer is released by whichever parser worker consumes the frame, on
//! every termination path. The pool is bounded only by live usage: when
//! it runs dry a fresh buffer is allocated, and surplus buffers are
//! dropped on release.

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pool of reusable `BytesMut` buffers
pub struct BufferPool {
    free: ArrayQueue<BytesMut>,
    buffer_capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

/// Point-in-time pool accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquires served from the pool
    pub hits: u64,
    /// Acquires that had to allocate
    pub misses: u64,
    /// Buffers returned to the pool
    pub returns: u64,
    /// Buffers dropped on return (pool full or undersized)
    pub drops: u64,
}

impl BufferPool {
    /// Create a pool holding up to `pool_size` buffers of `buffer_capacity`
    /// bytes each, all pre-allocated.
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        let free = ArrayQueue::new(pool_size.max(1));
        for _ in 0..free.capacity() {
            // Filling an empty queue cannot fail
            let _ = free.push(BytesMut::with_capacity(buffer_capacity));
        }
        Self {
            free,
            buffer_capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            drops: AtomicU64::new(0),
        }
    }

    /// Take a buffer, allocating if the pool is empty
    #[inline]
    pub fn acquire(&self) -> BytesMut {
        match self.free.pop() {
            Some(buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(self.buffer_capacity)
            }
        }
    }

    /// Return a buffer to the pool
    ///
    /// The buffer is cleared first. Buffers that shrank below the pool's
    /// nominal capacity (split off by a consumer) are dropped rather than
    /// recycled.
    #[inline]
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() < self.buffer_capacity || self.free.push(buf).is_err() {
            self.drops.fetch_add(1, Ordering::Relaxed);
        } else {
            self.returns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Buffers currently available without allocating
    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Nominal capacity of each pooled buffer
    #[inline]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Snapshot of the accounting counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod tests;
