//! Bounded MPMC ring with first-class disposal
//!
//! Sits between the connection handlers (producers) and the parser
//! workers (consumers). `put` blocks when the ring is full, `get` blocks
//! when it is empty, and `dispose` flips the whole ring into a terminal
//! state that unblocks every waiter.
//!
//! After disposal, `get` keeps returning buffered items until the ring is
//! drained - the parser pool finishes the queue during a service drain -
//! while `put` fails immediately.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::QueueError;

/// Bounded MPMC queue with blocking `put`/`get` and `dispose`
///
/// Counting is done with two semaphores (free slots and queued items);
/// `dispose` closes both, which wakes all waiters exactly once. The
/// backing `VecDeque` is only ever touched under its mutex for a push or
/// a pop, so critical sections stay a few instructions long.
pub struct Ring<T> {
    buf: Mutex<VecDeque<T>>,
    items: Semaphore,
    slots: Semaphore,
    disposed: AtomicBool,
    capacity: usize,
}

impl<T> Ring<T> {
    /// Create a ring with the given capacity (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            items: Semaphore::new(0),
            slots: Semaphore::new(capacity),
            disposed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Enqueue an item, waiting for a free slot
    ///
    /// Returns [`QueueError::Disposed`] if the ring is disposed before a
    /// slot frees up; in that case the item is dropped, never enqueued.
    pub async fn put(&self, item: T) -> Result<(), QueueError> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| QueueError::Disposed)?;
        // The slot is restored by the consumer side.
        permit.forget();
        self.buf.lock().push_back(item);
        self.items.add_permits(1);
        Ok(())
    }

    /// Dequeue an item, waiting for one to arrive
    ///
    /// After `dispose`, remaining items are still handed out; only once
    /// the ring is disposed *and* empty does this return
    /// [`QueueError::Disposed`].
    pub async fn get(&self) -> Result<T, QueueError> {
        match self.items.acquire().await {
            Ok(permit) => {
                permit.forget();
                match self.buf.lock().pop_front() {
                    Some(item) => {
                        self.slots.add_permits(1);
                        Ok(item)
                    }
                    // A post-disposal drainer got there first; the item
                    // was not lost, this getter just lost the race.
                    None => Err(QueueError::Disposed),
                }
            }
            Err(_) => match self.buf.lock().pop_front() {
                Some(item) => Ok(item),
                None => Err(QueueError::Disposed),
            },
        }
    }

    /// Flip the ring into its terminal state
    ///
    /// Every blocked `put` and `get` wakes with an error; later calls fail
    /// fast (modulo draining, see [`Ring::get`]). Idempotent.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.items.close();
        self.slots.close();
    }

    /// Whether `dispose` has been called
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    /// Whether the ring is currently empty
    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }

    /// Configured capacity
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[path = "ring_test.rs"]
mod tests;
