//! Spigot - Queue primitives
//!
//! The coordination backbone of the ingestion core:
//!
//! - [`Ring`] - bounded MPMC queue between connection handlers and parser
//!   workers. Backpressure comes from blocking `put`; teardown is a
//!   first-class `dispose` state that unblocks every waiter at once.
//! - [`TxnrQueue`] - unbounded disposable FIFO of transaction numbers,
//!   three of which make up a connection's acknowledgement state.
//! - [`BufferPool`] - lock-free pool of raw-frame buffers so the receive
//!   hot path does not allocate.
//!
//! Cancellation is modeled as queue state, not as an ambient token: a
//! single `dispose()` wakes every producer and consumer with
//! [`QueueError::Disposed`] and there is no window where a waiter can
//! re-block afterwards.

mod pool;
mod ring;
mod txnr;

pub use pool::{BufferPool, PoolStats};
pub use ring::Ring;
pub use txnr::{wait_one, TxnrQueue};

use thiserror::Error;

/// Errors returned by the disposable queues
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has been disposed; no further traffic is possible
    #[error("queue is disposed")]
    Disposed,
}
