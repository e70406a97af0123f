//! Per-connection handling
//!
//! Exactly two tasks per connection: the reader (RELP framing, command
//! dispatch, txnr validation, hand-off to the raw queue) and the response
//! writer (in-order `rsp` frames). `open` and `close` replies come from
//! the reader; both sides share the write half behind a mutex.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use spigot_config::RelpSourceConfig;
use spigot_model::{ConnId, RawMessage};
use spigot_queue::{BufferPool, Ring};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::ack::AckForwarder;
use crate::metrics::RelpMetrics;
use crate::splitter::{read_frame, RelpCommand, RelpFrame, SplitError};

/// Read buffer per connection
const READ_BUF_SIZE: usize = 64 * 1024;

/// Bound on flushing pending answers during teardown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on one answer write; a slower client is treated as transient
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a connection needs from its service generation
#[derive(Clone)]
pub(crate) struct ConnContext {
    pub forwarder: Arc<AckForwarder>,
    pub metrics: Arc<RelpMetrics>,
    pub pool: Arc<BufferPool>,
    pub raw_queue: Arc<Ring<RawMessage>>,
    pub config: Arc<RelpSourceConfig>,
    pub max_frame_size: usize,
    pub cancel: CancellationToken,
    pub tracker: TaskTracker,
}

/// Where a connection came from, for logs and metric labels
#[derive(Debug, Clone)]
pub(crate) struct PeerInfo {
    pub client: String,
    pub local_port: u16,
    pub unix_socket_path: String,
}

/// Drive one client connection to completion
pub(crate) async fn handle_connection<S>(stream: S, peer: PeerInfo, ctx: ConnContext)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let conn_id = ctx.forwarder.add_conn();
    let port_label = peer.local_port.to_string();
    ctx.metrics
        .client_connection(&peer.client, &port_label, &peer.unix_socket_path);
    tracing::info!(
        protocol = "relp",
        client = %peer.client,
        local_port = peer.local_port,
        unix_socket_path = %peer.unix_socket_path,
        format = %ctx.config.format,
        conn_id = %conn_id,
        "new client connection"
    );

    let (read_half, write_half) = tokio::io::split(stream);
    let writer = Arc::new(Mutex::new(write_half));

    ctx.tracker.spawn(handle_responses(
        Arc::clone(&ctx.forwarder),
        Arc::clone(&ctx.metrics),
        Arc::clone(&writer),
        conn_id,
        peer.client.clone(),
    ));

    run_reader(read_half_buffered(read_half), &writer, &peer, conn_id, &ctx).await;

    // Let verdicts already in flight reach the wire, then tear down the
    // queues, which unblocks the response writer.
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, ctx.forwarder.wait_drained(conn_id)).await;
    ctx.forwarder.remove_conn(conn_id);
    tracing::info!(client = %peer.client, conn_id = %conn_id, "relp connection ended");
}

fn read_half_buffered<S: AsyncRead>(read_half: ReadHalf<S>) -> BufReader<ReadHalf<S>> {
    BufReader::with_capacity(READ_BUF_SIZE, read_half)
}

/// The frame loop: split, validate, dispatch
async fn run_reader<S>(
    mut reader: BufReader<ReadHalf<S>>,
    writer: &Mutex<WriteHalf<S>>,
    peer: &PeerInfo,
    conn_id: ConnId,
    ctx: &ConnContext,
) where
    S: AsyncRead + AsyncWrite,
{
    let deadline = ctx.config.read_timeout();
    let port_label = peer.local_port.to_string();
    let mut previous: Option<u64> = None;
    let mut relp_open = false;

    loop {
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            outcome = next_frame(&mut reader, deadline, ctx) => outcome,
        };

        let frame = match outcome {
            NextFrame::Frame(frame) => frame,
            NextFrame::Eof => {
                tracing::debug!(client = %peer.client, "client closed the connection");
                return;
            }
            NextFrame::Timeout => {
                tracing::debug!(client = %peer.client, "relp connection timed out");
                return;
            }
            NextFrame::Io(e) => {
                if !is_connection_reset(&e) {
                    tracing::debug!(client = %peer.client, error = %e, "relp read error");
                }
                return;
            }
            NextFrame::Protocol(e) => {
                protocol_error(ctx, &peer.client, &e.to_string());
                return;
            }
        };

        // Strict monotonicity over the whole session
        if previous.is_some_and(|prev| frame.txnr <= prev) {
            tracing::warn!(
                client = %peer.client,
                previous = previous.unwrap_or(0),
                current = frame.txnr,
                "txnr did not increase"
            );
            ctx.metrics.protocol_error(&peer.client);
            release_data(&ctx.pool, frame.data);
            return;
        }
        previous = Some(frame.txnr);

        match frame.command {
            RelpCommand::Open => {
                if relp_open {
                    protocol_error(ctx, &peer.client, "received open command twice");
                    release_data(&ctx.pool, frame.data);
                    return;
                }
                // `TXNR rsp LEN 200 OK\n<echoed offer>\n`, LEN covering
                // "200 OK\n" plus the echo
                let mut reply =
                    format!("{} rsp {} 200 OK\n", frame.txnr, frame.data.len() + 7).into_bytes();
                reply.extend_from_slice(&frame.data);
                reply.push(b'\n');
                release_data(&ctx.pool, frame.data);
                if write_reply(writer, &reply).await.is_err() {
                    return;
                }
                relp_open = true;
                tracing::info!(client = %peer.client, "received 'open' command");
            }

            RelpCommand::Close => {
                release_data(&ctx.pool, frame.data);
                if !relp_open {
                    protocol_error(ctx, &peer.client, "received close command before open");
                    return;
                }
                // Answer everything already accepted before saying goodbye
                let _ = tokio::time::timeout(DRAIN_TIMEOUT, ctx.forwarder.wait_drained(conn_id))
                    .await;
                let reply = format!("{} rsp 0\n0 serverclose 0\n", frame.txnr);
                let _ = write_reply(writer, reply.as_bytes()).await;
                tracing::info!(client = %peer.client, "received 'close' command");
                return;
            }

            RelpCommand::Syslog => {
                if !relp_open {
                    protocol_error(ctx, &peer.client, "received syslog command before open");
                    release_data(&ctx.pool, frame.data);
                    return;
                }
                ctx.forwarder.received(conn_id, frame.txnr);
                if frame.data.is_empty() {
                    // Nothing to parse; accept right away
                    ctx.forwarder.forward_succ(conn_id, frame.txnr);
                    continue;
                }
                let raw = RawMessage {
                    conn_id,
                    txnr: frame.txnr,
                    client: peer.client.clone(),
                    local_port: peer.local_port,
                    unix_socket_path: peer.unix_socket_path.clone(),
                    format: ctx.config.format.clone(),
                    encoding: ctx.config.encoding.clone(),
                    dont_parse_sd: ctx.config.dont_parse_structured_data,
                    conf_id: ctx.config.conf_id,
                    message: frame.data,
                };
                if let Err(e) = ctx.raw_queue.put(raw).await {
                    tracing::error!(client = %peer.client, error = %e, "failed to enqueue raw relp message");
                    return;
                }
                ctx.metrics
                    .incoming_message(&peer.client, &port_label, &peer.unix_socket_path);
            }
        }
    }
}

enum NextFrame {
    Frame(RelpFrame),
    Eof,
    Timeout,
    Io(io::Error),
    Protocol(SplitError),
}

/// Read one frame, refreshing the per-read deadline
async fn next_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    deadline: Option<Duration>,
    ctx: &ConnContext,
) -> NextFrame {
    let read = read_frame(reader, ctx.max_frame_size, &ctx.pool);
    let result = match deadline {
        Some(timeout) => match tokio::time::timeout(timeout, read).await {
            Ok(result) => result,
            Err(_) => return NextFrame::Timeout,
        },
        None => read.await,
    };
    match result {
        Ok(Some(frame)) => NextFrame::Frame(frame),
        Ok(None) => NextFrame::Eof,
        Err(SplitError::Io(e)) => NextFrame::Io(e),
        Err(e) => NextFrame::Protocol(e),
    }
}

fn protocol_error(ctx: &ConnContext, client: &str, reason: &str) {
    tracing::warn!(client = %client, reason, "relp protocol error");
    ctx.metrics.protocol_error(client);
}

/// Give a pooled payload buffer back; plain empty buffers just drop
fn release_data(pool: &BufferPool, data: BytesMut) {
    if data.capacity() > 0 {
        pool.release(data);
    }
}

async fn write_reply<S: AsyncWrite>(writer: &Mutex<WriteHalf<S>>, reply: &[u8]) -> io::Result<()> {
    let mut guard = writer.lock().await;
    guard.write_all(reply).await?;
    guard.flush().await
}

/// The response writer: consume verdicts, answer in arrival order
///
/// `successes`/`failures` buffer verdicts that arrived ahead of their
/// turn. The cooking loop advances through the arrival sequence as long
/// as its head has a verdict, then goes back to waiting.
pub(crate) async fn handle_responses<S>(
    forwarder: Arc<AckForwarder>,
    metrics: Arc<RelpMetrics>,
    writer: Arc<Mutex<WriteHalf<S>>>,
    conn_id: ConnId,
    client: String,
) where
    S: AsyncWrite + Send + 'static,
{
    let mut successes: HashSet<u64> = HashSet::new();
    let mut failures: HashSet<u64> = HashSet::new();

    while forwarder.wait(conn_id).await {
        while let Some(txnr) = forwarder.get_succ(conn_id) {
            successes.insert(txnr);
        }
        while let Some(txnr) = forwarder.get_fail(conn_id) {
            failures.insert(txnr);
        }

        // Cooking
        loop {
            let Some(next) = forwarder.next_to_commit(conn_id) else {
                break;
            };
            let (reply, status) = if successes.contains(&next) {
                (format!("{next} rsp 6 200 OK\n"), "200")
            } else if failures.contains(&next) {
                (format!("{next} rsp 6 500 KO\n"), "500")
            } else {
                break;
            };

            let write = async {
                let mut guard = writer.lock().await;
                guard.write_all(reply.as_bytes()).await
            };
            match tokio::time::timeout(WRITE_TIMEOUT, write).await {
                Ok(Ok(())) => {
                    match status {
                        "200" => successes.remove(&next),
                        _ => failures.remove(&next),
                    };
                    metrics.answer(status, &client);
                    forwarder.commit(conn_id);
                }
                Ok(Err(e)) => {
                    if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock
                    {
                        tracing::info!(client = %client, error = %e, "timeout writing relp response");
                        // Retry on the next pass; teardown empties the
                        // arrival queue and ends the loop
                    } else {
                        if !is_connection_reset(&e) {
                            tracing::warn!(client = %client, error = %e, "error writing relp response");
                        }
                        return;
                    }
                }
                Err(_elapsed) => {
                    tracing::info!(client = %client, "client is too slow to take its answer");
                }
            }
        }
    }
}

/// Whether an error just means the peer went away
fn is_connection_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
