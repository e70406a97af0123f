//! Tests for the raw-frame buffer pool

use crate::BufferPool;

#[test]
fn test_acquire_hits_preallocated() {
    let pool = BufferPool::new(4, 1024);
    assert_eq!(pool.available(), 4);

    let buf = pool.acquire();
    assert!(buf.capacity() >= 1024);
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.stats().hits, 1);
    assert_eq!(pool.stats().misses, 0);
}

#[test]
fn test_acquire_allocates_when_dry() {
    let pool = BufferPool::new(1, 64);
    let a = pool.acquire();
    let b = pool.acquire();
    assert_eq!(pool.stats().hits, 1);
    assert_eq!(pool.stats().misses, 1);
    drop(a);
    drop(b);
}

#[test]
fn test_release_recycles_and_clears() {
    let pool = BufferPool::new(2, 64);
    let mut buf = pool.acquire();
    buf.extend_from_slice(b"payload");
    pool.release(buf);

    let again = pool.acquire();
    assert!(again.is_empty(), "released buffers must come back cleared");
    assert_eq!(pool.stats().returns, 1);
}

#[test]
fn test_release_drops_when_full() {
    let pool = BufferPool::new(1, 64);
    let extra = bytes::BytesMut::with_capacity(64);
    pool.release(extra);
    assert_eq!(pool.stats().drops, 1);
    assert_eq!(pool.available(), 1);
}

#[test]
fn test_release_drops_undersized() {
    let pool = BufferPool::new(2, 1024);
    let _hold = pool.acquire();
    let small = bytes::BytesMut::with_capacity(8);
    pool.release(small);
    assert_eq!(pool.stats().drops, 1);
}

#[test]
fn test_in_flight_bound() {
    // Live usage bounds the pool: capacity + extra allocations in flight
    let pool = BufferPool::new(2, 64);
    let bufs: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
    assert_eq!(pool.available(), 0);
    for b in bufs {
        pool.release(b);
    }
    let s = pool.stats();
    assert_eq!(s.returns + s.drops, 5);
    assert_eq!(pool.available(), 2);
}
