//! Downstream delivery stash
//!
//! The gateway's [`spigot_model::Stasher`]: accepted records go into a
//! bounded channel whose consumer writes NDJSON, either to stdout or to a
//! downstream TCP endpoint with reconnection. The channel is the
//! responsibility hand-off: once a record is queued here, the client gets
//! its `200 OK`.
//!
//! Backpressure policy: a full queue rejects the one record (the client
//! sees `500 KO` and may retry); a dead writer is fatal for the whole
//! service.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use spigot_config::{DownstreamConfig, DownstreamMode};
use spigot_model::{FullMessage, ListenerInfo, ReportError, Reporter, StashError, Stasher};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Channel-backed stash with a writer task behind it
pub struct DownstreamStash {
    tx: Mutex<Option<mpsc::Sender<FullMessage>>>,
    writer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DownstreamStash {
    /// Create the stash and spawn its writer task
    pub fn new(config: &DownstreamConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let writer = tokio::spawn(writer_loop(rx, config.clone()));
        Self {
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Stop accepting records, drain the queue, join the writer
    pub async fn shutdown(&self) {
        // Dropping the sender closes the channel; the writer drains what
        // is left and exits
        self.tx.lock().take();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let _ = tokio::time::timeout(Duration::from_secs(10), writer).await;
        }
    }
}

#[async_trait]
impl Stasher for DownstreamStash {
    async fn stash(&self, msg: FullMessage) -> Result<(), StashError> {
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            return Err(StashError::Fatal("downstream writer is shut down".into()));
        };
        match tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(StashError::NonFatal("downstream queue is full".into()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(StashError::Fatal("downstream writer is gone".into()))
            }
        }
    }
}

#[async_trait]
impl Reporter for DownstreamStash {
    async fn report(&self, infos: &[ListenerInfo]) -> Result<(), ReportError> {
        if infos.is_empty() {
            tracing::info!("no listeners to announce");
        }
        for info in infos {
            tracing::info!(
                protocol = %info.protocol,
                bind_addr = %info.bind_addr,
                port = info.port,
                unix_socket_path = %info.unix_socket_path,
                "listener bound"
            );
        }
        Ok(())
    }
}

/// Encode one record as an NDJSON line
fn encode(msg: &FullMessage) -> Option<Vec<u8>> {
    match serde_json::to_vec(msg) {
        Ok(mut line) => {
            line.push(b'\n');
            Some(line)
        }
        Err(e) => {
            tracing::warn!(uid = %msg.uid, error = %e, "cannot serialize record, dropping it");
            None
        }
    }
}

async fn writer_loop(rx: mpsc::Receiver<FullMessage>, config: DownstreamConfig) {
    match config.mode {
        DownstreamMode::Stdout => stdout_loop(rx).await,
        DownstreamMode::Tcp => tcp_loop(rx, config).await,
    }
}

async fn stdout_loop(mut rx: mpsc::Receiver<FullMessage>) {
    let mut out = tokio::io::stdout();
    while let Some(msg) = rx.recv().await {
        let Some(line) = encode(&msg) else { continue };
        if let Err(e) = out.write_all(&line).await {
            tracing::error!(error = %e, "cannot write to stdout, downstream writer exits");
            return;
        }
    }
    let _ = out.flush().await;
}

/// Forward to a TCP endpoint, reconnecting forever
///
/// A line that fails mid-write is kept and re-sent on the next
/// connection, so delivery is at-least-once.
async fn tcp_loop(mut rx: mpsc::Receiver<FullMessage>, config: DownstreamConfig) {
    let mut pending: Option<Vec<u8>> = None;

    'reconnect: loop {
        let mut stream = loop {
            match TcpStream::connect(&config.address).await {
                Ok(stream) => break stream,
                Err(e) => {
                    tracing::warn!(
                        address = %config.address,
                        error = %e,
                        "cannot reach downstream, retrying"
                    );
                    tokio::time::sleep(config.retry_interval).await;
                    if rx.is_closed() && rx.is_empty() && pending.is_none() {
                        return;
                    }
                }
            }
        };
        tracing::info!(address = %config.address, "connected to downstream");

        loop {
            let line = match pending.take() {
                Some(line) => line,
                None => match rx.recv().await {
                    Some(msg) => match encode(&msg) {
                        Some(line) => line,
                        None => continue,
                    },
                    None => return,
                },
            };
            if let Err(e) = stream.write_all(&line).await {
                tracing::warn!(
                    address = %config.address,
                    error = %e,
                    "downstream write failed, reconnecting"
                );
                pending = Some(line);
                tokio::time::sleep(config.retry_interval).await;
                continue 'reconnect;
            }
        }
    }
}

#[cfg(test)]
#[path = "stash_test.rs"]
mod tests;
