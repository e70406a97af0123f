//! Disposable FIFO of transaction numbers
//!
//! The acknowledgement coordinator keeps three of these per connection:
//! the arrival-order queue plus the success and failure outcome queues.
//! Pops never block (`try_pop`/`peek`); blocking happens through
//! [`wait_one`] over an outcome pair, or [`TxnrQueue::wait_empty`] when a
//! connection drains before closing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::QueueError;

/// Unbounded disposable FIFO of `u64` transaction numbers
#[derive(Debug, Default)]
pub struct TxnrQueue {
    inner: Mutex<VecDeque<u64>>,
    notify: Notify,
    disposed: AtomicBool,
}

impl TxnrQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transaction number
    ///
    /// Never blocks; fails only once the queue is disposed.
    pub fn push(&self, txnr: u64) -> Result<(), QueueError> {
        if self.is_disposed() {
            return Err(QueueError::Disposed);
        }
        self.inner.lock().push_back(txnr);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Pop the head, if any
    ///
    /// Still drains queued values after disposal.
    pub fn try_pop(&self) -> Option<u64> {
        let popped = self.inner.lock().pop_front();
        if popped.is_some() {
            // wait_empty watches for the queue draining
            self.notify.notify_waiters();
        }
        popped
    }

    /// Head of the queue without removing it
    pub fn peek(&self) -> Option<u64> {
        self.inner.lock().front().copied()
    }

    /// Whether the queue holds no values
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Number of queued values
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Dispose the queue, waking every waiter. Idempotent.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether `dispose` has been called
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Wait until the queue is empty or disposed
    pub async fn wait_empty(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a pop or dispose
            // between the check and the await cannot be missed.
            notified.as_mut().enable();
            if self.is_empty() || self.is_disposed() {
                return;
            }
            notified.await;
        }
    }
}

/// Wait until either queue holds a value, or any of them is disposed
///
/// Returns `true` when a value is available on `a` or `b`, `false` when a
/// queue was disposed and both are drained. This is the suspension point
/// of the per-connection response writer.
pub async fn wait_one(a: &TxnrQueue, b: &TxnrQueue) -> bool {
    loop {
        let na = a.notify.notified();
        let nb = b.notify.notified();
        tokio::pin!(na, nb);
        na.as_mut().enable();
        nb.as_mut().enable();

        if !a.is_empty() || !b.is_empty() {
            return true;
        }
        if a.is_disposed() || b.is_disposed() {
            return false;
        }

        tokio::select! {
            _ = na => {}
            _ = nb => {}
        }
    }
}

#[cfg(test)]
#[path = "txnr_test.rs"]
mod tests;
