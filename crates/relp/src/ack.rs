//! Acknowledgement coordinator
//!
//! Parsers finish in arbitrary order; RELP clients demand ACKs in strict
//! transaction-number order. Per connection, three FIFOs restore order:
//! `received` is the authoritative arrival sequence, `succ` and `fail`
//! buffer the out-of-order verdicts. The response writer peeks the head
//! of `received` and only advances once that head has a verdict.
//!
//! The coordinator owns every per-connection queue, keyed by an opaque
//! [`ConnId`]; handlers and workers hold only the id, which breaks the
//! reference cycle between connection state and acknowledgement state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use spigot_model::ConnId;
use spigot_queue::{wait_one, TxnrQueue};

/// The three acknowledgement FIFOs of one connection
#[derive(Debug, Default)]
struct ConnQueues {
    received: TxnrQueue,
    succ: TxnrQueue,
    fail: TxnrQueue,
}

/// Per-connection acknowledgement state, keyed by [`ConnId`]
#[derive(Debug, Default)]
pub struct AckForwarder {
    conns: RwLock<HashMap<ConnId, Arc<ConnQueues>>>,
    next_id: AtomicU64,
}

impl AckForwarder {
    /// Create an empty coordinator
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self, conn_id: ConnId) -> Option<Arc<ConnQueues>> {
        self.conns.read().get(&conn_id).cloned()
    }

    /// Register a connection and mint its id
    pub fn add_conn(&self) -> ConnId {
        let conn_id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.conns
            .write()
            .insert(conn_id, Arc::new(ConnQueues::default()));
        conn_id
    }

    /// Tear down a connection: dispose its queues and forget it
    ///
    /// Unblocks the connection's response writer. Safe to call twice.
    pub fn remove_conn(&self, conn_id: ConnId) {
        if let Some(queues) = self.conns.write().remove(&conn_id) {
            queues.received.dispose();
            queues.succ.dispose();
            queues.fail.dispose();
        }
    }

    /// Tear down every connection at once (service drain)
    pub fn remove_all(&self) {
        let mut conns = self.conns.write();
        for queues in conns.values() {
            queues.received.dispose();
            queues.succ.dispose();
            queues.fail.dispose();
        }
        conns.clear();
    }

    /// Number of live connections
    pub fn conn_count(&self) -> usize {
        self.conns.read().len()
    }

    /// Ids of all live connections
    pub fn conn_ids(&self) -> Vec<ConnId> {
        self.conns.read().keys().copied().collect()
    }

    /// Record that `txnr` was accepted and handed to parsing
    pub fn received(&self, conn_id: ConnId, txnr: u64) {
        if let Some(queues) = self.queues(conn_id) {
            let _ = queues.received.push(txnr);
        }
    }

    /// Drop the head of the arrival sequence (its answer has been sent)
    pub fn commit(&self, conn_id: ConnId) {
        if let Some(queues) = self.queues(conn_id) {
            queues.received.try_pop();
        }
    }

    /// Head of the arrival sequence, if any
    pub fn next_to_commit(&self, conn_id: ConnId) -> Option<u64> {
        self.queues(conn_id).and_then(|q| q.received.peek())
    }

    /// Report a successful outcome for `txnr`
    pub fn forward_succ(&self, conn_id: ConnId, txnr: u64) {
        if let Some(queues) = self.queues(conn_id) {
            let _ = queues.succ.push(txnr);
        }
    }

    /// Report a failed outcome for `txnr`
    pub fn forward_fail(&self, conn_id: ConnId, txnr: u64) {
        if let Some(queues) = self.queues(conn_id) {
            let _ = queues.fail.push(txnr);
        }
    }

    /// Non-blocking pop of the success queue
    pub fn get_succ(&self, conn_id: ConnId) -> Option<u64> {
        self.queues(conn_id).and_then(|q| q.succ.try_pop())
    }

    /// Non-blocking pop of the failure queue
    pub fn get_fail(&self, conn_id: ConnId) -> Option<u64> {
        self.queues(conn_id).and_then(|q| q.fail.try_pop())
    }

    /// Block until an outcome is available for this connection
    ///
    /// Returns `false` once the connection is torn down and its outcome
    /// queues are drained.
    pub async fn wait(&self, conn_id: ConnId) -> bool {
        let Some(queues) = self.queues(conn_id) else {
            return false;
        };
        wait_one(&queues.succ, &queues.fail).await
    }

    /// Wait until every received txnr of the connection has been answered
    ///
    /// Resolves immediately when the connection is unknown or its queues
    /// are disposed.
    pub async fn wait_drained(&self, conn_id: ConnId) {
        if let Some(queues) = self.queues(conn_id) {
            queues.received.wait_empty().await;
        }
    }
}

#[cfg(test)]
#[path = "ack_test.rs"]
mod tests;
