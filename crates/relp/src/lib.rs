//! Spigot - RELP ingestion core
//!
//! Implements the Reliable Event Logging Protocol server side: framed
//! commands over TCP or unix sockets, strictly monotonic transaction
//! numbers per connection, parallel out-of-order parsing, and strictly
//! in-order acknowledgement back to the client.
//!
//! # Architecture
//!
//! ```text
//! accept loop ──▶ connection handler ──▶ raw queue ──▶ parser workers ──▶ stasher
//!                      │                                     │
//!                      │ received(txnr)        succ/fail(txnr)│
//!                      ▼                                     ▼
//!                  ack coordinator ◀─────────────────────────┘
//!                      │
//!                      ▼
//!                 response writer ──▶ client (rsp frames, in txnr order)
//! ```
//!
//! Two tasks per connection (reader and response writer), one accept loop
//! per listener, a fixed pool of parser workers, and one supervisor task
//! driving the lifecycle `Stopped -> Started -> Waiting -> FinalStopped`.
//!
//! Sockets come from a [`Binder`], parsed records go to a
//! [`spigot_model::Stasher`]; this crate decides neither.

mod ack;
mod binder;
mod handler;
mod metrics;
mod service;
mod splitter;

pub use ack::AckForwarder;
pub use binder::{Binder, DirectBinder};
pub use metrics::RelpMetrics;
pub use service::{RelpError, RelpService, RelpStatus};
pub use splitter::{read_frame, RelpCommand, RelpFrame, SplitError};
