//! RELP service lifecycle
//!
//! [`RelpService`] is the supervisor: it owns a fresh [`RelpServiceImpl`]
//! per start, consumes the status channel, and reacts to transitions -
//! `Stopped` (re)starts the impl with the current configuration,
//! `Waiting` parks for thirty seconds before trying again,
//! `FinalStopped` reports an empty listener set and exits.
//!
//! The impl owns the listener set, the raw queue, the parser worker pool
//! and the acknowledgement coordinator, and tears them down in drain
//! order: listeners first (no new traffic), then the queue (parsers
//! finish the backlog), then the per-connection state.

use std::sync::Arc;
use std::time::Duration;

use spigot_config::{ParserConfig, RelpSourceConfig};
use spigot_model::{ListenerInfo, RawMessage, Reporter};
use spigot_parsers::{select_decoder, ParsersEnv};
use spigot_queue::{BufferPool, Ring};
use thiserror::Error;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::ack::AckForwarder;
use crate::binder::Binder;
use crate::handler::{handle_connection, ConnContext, PeerInfo};
use crate::metrics::RelpMetrics;

/// How long `Waiting` parks before re-entering `Stopped`
const WAIT_PAUSE: Duration = Duration::from_secs(30);

/// Raw-frame buffers kept warm in the pool
const POOL_BUFFERS: usize = 64;

/// Bound on flushing pending answers while stopping
const STOP_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle states of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelpStatus {
    /// Not serving; the supervisor treats this as the trigger to start
    Stopped,
    /// Accepting connections
    Started,
    /// Parked after a failure; re-enters `Stopped` after a pause
    Waiting,
    /// Terminal; no re-entry
    FinalStopped,
}

/// Errors of the service lifecycle
#[derive(Debug, Error)]
pub enum RelpError {
    /// `final_stop` happened; this generation will never run again
    #[error("the relp service is definitely stopped")]
    DefinitelyStopped,

    /// `start` while already started
    #[error("the relp service is not stopped")]
    NotStopped,

    /// Counter registration failed
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Configuration snapshot applied at each (re)start
#[derive(Debug, Clone, Default)]
struct ConfSet {
    sources: Vec<RelpSourceConfig>,
    parsers: Vec<ParserConfig>,
    queue_size: usize,
    max_frame_size: usize,
    workers: usize,
}

/// The RELP service supervisor
pub struct RelpService {
    inner: parking_lot::Mutex<Option<Arc<RelpServiceImpl>>>,
    supervisor: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    conf: Arc<parking_lot::Mutex<ConfSet>>,
    reporter: Arc<dyn Reporter>,
    binder: Arc<dyn Binder>,
    metrics: Arc<RelpMetrics>,
    fatal: CancellationToken,
}

impl RelpService {
    /// Create a service around its collaborators
    pub fn new(reporter: Arc<dyn Reporter>, binder: Arc<dyn Binder>) -> Result<Self, RelpError> {
        Ok(Self {
            inner: parking_lot::Mutex::new(None),
            supervisor: parking_lot::Mutex::new(None),
            conf: Arc::new(parking_lot::Mutex::new(ConfSet::default())),
            reporter,
            binder,
            metrics: Arc::new(RelpMetrics::new()?),
            fatal: CancellationToken::new(),
        })
    }

    /// Install the configuration used at the next (re)start
    pub fn set_conf(
        &self,
        sources: Vec<RelpSourceConfig>,
        parsers: Vec<ParserConfig>,
        queue_size: usize,
        max_frame_size: usize,
        workers: usize,
    ) {
        *self.conf.lock() = ConfSet {
            sources,
            parsers,
            queue_size,
            max_frame_size,
            workers: workers.max(1),
        };
    }

    /// Token cancelled exactly once on an unrecoverable failure
    pub fn fatal_error(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Gather this service's metric families
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.metrics.gather()
    }

    /// Counters, for wiring and assertions
    pub fn metrics(&self) -> &Arc<RelpMetrics> {
        &self.metrics
    }

    /// Current lifecycle status
    pub async fn status(&self) -> Option<RelpStatus> {
        let impl_ = self.inner.lock().clone();
        match impl_ {
            Some(impl_) => Some(*impl_.status.lock().await),
            None => None,
        }
    }

    /// Spawn the supervisor and trigger the first start
    pub async fn start(&self) {
        let (status_tx, status_rx) = mpsc::channel(10);
        let impl_ = Arc::new(RelpServiceImpl::new(
            status_tx.clone(),
            Arc::clone(&self.binder),
            Arc::clone(&self.reporter),
            Arc::clone(&self.metrics),
            self.fatal.clone(),
        ));
        *self.inner.lock() = Some(Arc::clone(&impl_));

        let handle = tokio::spawn(supervise(
            impl_,
            Arc::clone(&self.reporter),
            self.fatal.clone(),
            Arc::clone(&self.conf),
            status_rx,
        ));
        *self.supervisor.lock() = Some(handle);

        // Entering Stopped is what makes the supervisor start the impl
        let _ = status_tx.send(RelpStatus::Stopped).await;
    }

    /// Apply a new configuration
    ///
    /// Drains the current generation with a transient stop; entering
    /// `Stopped` makes the supervisor start again with the new settings.
    pub async fn reload(
        &self,
        sources: Vec<RelpSourceConfig>,
        parsers: Vec<ParserConfig>,
        queue_size: usize,
        max_frame_size: usize,
        workers: usize,
    ) {
        self.set_conf(sources, parsers, queue_size, max_frame_size, workers);
        let impl_ = self.inner.lock().clone();
        if let Some(impl_) = impl_ {
            impl_.stop().await;
        }
    }

    /// Definitely stop: drain, report an empty listener set, join
    pub async fn stop(&self) {
        let impl_ = self.inner.lock().clone();
        if let Some(impl_) = impl_ {
            impl_.final_stop().await;
        }
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// The supervisor loop: one state transition at a time
async fn supervise(
    impl_: Arc<RelpServiceImpl>,
    reporter: Arc<dyn Reporter>,
    fatal: CancellationToken,
    conf: Arc<parking_lot::Mutex<ConfSet>>,
    mut status_rx: mpsc::Receiver<RelpStatus>,
) {
    while let Some(state) = status_rx.recv().await {
        match state {
            RelpStatus::FinalStopped => {
                let _ = reporter.report(&[]).await;
                tracing::debug!("the relp service has been definitely halted");
                return;
            }

            RelpStatus::Stopped => {
                impl_.set_conf(conf.lock().clone());
                match Arc::clone(&impl_).start().await {
                    Ok(infos) => {
                        if let Err(e) = reporter.report(&infos).await {
                            tracing::error!(error = %e, "failed to report listeners, fatal error");
                            fatal.cancel();
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "the relp service failed to start");
                        if let Err(e) = reporter.report(&[]).await {
                            tracing::error!(error = %e, "failed to report listeners, fatal error");
                            fatal.cancel();
                        } else {
                            impl_.stop_and_wait().await;
                        }
                    }
                }
            }

            RelpStatus::Waiting => {
                let impl_ = Arc::clone(&impl_);
                tokio::spawn(async move {
                    tokio::time::sleep(WAIT_PAUSE).await;
                    impl_.end_wait().await;
                });
            }

            RelpStatus::Started => {}
        }
    }
}

/// One generation of listeners, workers and connections
pub(crate) struct RelpServiceImpl {
    pub(crate) status: tokio::sync::Mutex<RelpStatus>,
    status_tx: mpsc::Sender<RelpStatus>,
    binder: Arc<dyn Binder>,
    pub(crate) stasher: Arc<dyn Reporter>,
    pub(crate) metrics: Arc<RelpMetrics>,
    pub(crate) forwarder: Arc<AckForwarder>,
    pub(crate) fatal: CancellationToken,
    conf: parking_lot::Mutex<ConfSet>,
    raw_queue: parking_lot::Mutex<Option<Arc<Ring<RawMessage>>>>,
    generation_cancel: parking_lot::Mutex<CancellationToken>,
    conn_tracker: TaskTracker,
    parse_tracker: TaskTracker,
}

impl RelpServiceImpl {
    fn new(
        status_tx: mpsc::Sender<RelpStatus>,
        binder: Arc<dyn Binder>,
        stasher: Arc<dyn Reporter>,
        metrics: Arc<RelpMetrics>,
        fatal: CancellationToken,
    ) -> Self {
        Self {
            status: tokio::sync::Mutex::new(RelpStatus::Stopped),
            status_tx,
            binder,
            stasher,
            metrics,
            forwarder: Arc::new(AckForwarder::new()),
            fatal,
            conf: parking_lot::Mutex::new(ConfSet::default()),
            raw_queue: parking_lot::Mutex::new(None),
            generation_cancel: parking_lot::Mutex::new(CancellationToken::new()),
            conn_tracker: TaskTracker::new(),
            parse_tracker: TaskTracker::new(),
        }
    }

    fn set_conf(&self, conf: ConfSet) {
        *self.conf.lock() = conf;
    }

    /// Bind listeners, spawn workers and accept loops
    async fn start(self: Arc<Self>) -> Result<Vec<ListenerInfo>, RelpError> {
        let mut status = self.status.lock().await;
        match *status {
            RelpStatus::FinalStopped => return Err(RelpError::DefinitelyStopped),
            RelpStatus::Started => return Err(RelpError::NotStopped),
            RelpStatus::Stopped | RelpStatus::Waiting => {}
        }

        let conf = self.conf.lock().clone();
        let (bound, infos) = self.bind_listeners(&conf).await;
        if infos.is_empty() {
            tracing::info!("relp service not started: no listener");
            return Ok(infos);
        }
        tracing::info!(nb_listeners = infos.len(), "listening on relp");

        let raw_queue = Arc::new(Ring::new(conf.queue_size));
        *self.raw_queue.lock() = Some(Arc::clone(&raw_queue));
        let pool = Arc::new(BufferPool::new(POOL_BUFFERS, conf.max_frame_size));
        let cancel = CancellationToken::new();
        *self.generation_cancel.lock() = cancel.clone();
        self.conn_tracker.reopen();
        self.parse_tracker.reopen();

        let env = Arc::new(ParsersEnv::new(&conf.parsers));
        for _ in 0..conf.workers {
            self.parse_tracker.spawn(parse_loop(
                Arc::clone(&self),
                Arc::clone(&raw_queue),
                Arc::clone(&env),
                Arc::clone(&pool),
            ));
        }

        for listener in bound {
            let ctx = ConnContext {
                forwarder: Arc::clone(&self.forwarder),
                metrics: Arc::clone(&self.metrics),
                pool: Arc::clone(&pool),
                raw_queue: Arc::clone(&raw_queue),
                config: listener.config(),
                max_frame_size: conf.max_frame_size,
                cancel: cancel.clone(),
                tracker: self.conn_tracker.clone(),
            };
            match listener {
                BoundListener::Tcp(socket, _) => {
                    self.conn_tracker.spawn(accept_tcp(socket, ctx));
                }
                #[cfg(unix)]
                BoundListener::Unix(socket, _, path) => {
                    self.conn_tracker.spawn(accept_unix(socket, path, ctx));
                }
            }
        }

        *status = RelpStatus::Started;
        let _ = self.status_tx.send(RelpStatus::Started).await;
        Ok(infos)
    }

    /// Bind every configured endpoint, skipping the ones that fail
    async fn bind_listeners(&self, conf: &ConfSet) -> (Vec<BoundListener>, Vec<ListenerInfo>) {
        let mut bound = Vec::new();
        let mut infos = Vec::new();

        for source in conf.sources.iter().filter(|s| s.enabled) {
            if source.tls.is_some() {
                // The plain binder cannot serve TLS material; refusing is
                // safer than silently serving plaintext
                tracing::error!(
                    bind_addr = %source.bind_addr,
                    "tls is configured but no tls-capable binder is available, skipping source"
                );
                continue;
            }
            let source = Arc::new(source.clone());
            for &port in &source.ports {
                let addr = match format!("{}:{}", source.bind_addr, port).parse() {
                    Ok(addr) => addr,
                    Err(e) => {
                        tracing::warn!(bind_addr = %source.bind_addr, port, error = %e, "bad relp endpoint, skipping");
                        continue;
                    }
                };
                match self.binder.listen(addr).await {
                    Ok(listener) => {
                        let bound_port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                        infos.push(ListenerInfo {
                            port: bound_port,
                            bind_addr: source.bind_addr.clone(),
                            unix_socket_path: String::new(),
                            protocol: "relp".into(),
                        });
                        bound.push(BoundListener::Tcp(listener, Arc::clone(&source)));
                    }
                    Err(e) => {
                        tracing::warn!(addr = %addr, error = %e, "cannot bind relp listener, skipping");
                    }
                }
            }
            #[cfg(unix)]
            if let Some(path) = &source.unix_socket_path {
                match self.binder.bind_unix(path).await {
                    Ok(listener) => {
                        infos.push(ListenerInfo {
                            port: 0,
                            bind_addr: String::new(),
                            unix_socket_path: path.display().to_string(),
                            protocol: "relp".into(),
                        });
                        bound.push(BoundListener::Unix(
                            listener,
                            Arc::clone(&source),
                            path.display().to_string(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "cannot bind relp unix socket, skipping");
                    }
                }
            }
        }
        (bound, infos)
    }

    pub(crate) async fn stop(&self) {
        self.do_stop(false, false).await;
    }

    pub(crate) async fn final_stop(&self) {
        self.do_stop(true, false).await;
    }

    pub(crate) async fn stop_and_wait(&self) {
        self.do_stop(false, true).await;
    }

    /// Leave `Waiting` for `Stopped`, which re-triggers a start
    pub(crate) async fn end_wait(&self) {
        let mut status = self.status.lock().await;
        if *status != RelpStatus::Waiting {
            return;
        }
        *status = RelpStatus::Stopped;
        let _ = self.status_tx.send(RelpStatus::Stopped).await;
    }

    /// Drain and transition
    ///
    /// Order matters: reset listeners (no new traffic, readers end),
    /// dispose the raw queue (handlers and parsers unblock, parsers
    /// finish the backlog), join the parsers, tear down per-connection
    /// queues, then join the remaining connection tasks.
    async fn do_stop(&self, final_: bool, wait: bool) {
        let mut status = self.status.lock().await;

        if final_
            && matches!(
                *status,
                RelpStatus::Waiting | RelpStatus::Stopped | RelpStatus::FinalStopped
            )
        {
            if *status != RelpStatus::FinalStopped {
                *status = RelpStatus::FinalStopped;
                let _ = self.status_tx.send(RelpStatus::FinalStopped).await;
            }
            return;
        }

        if matches!(
            *status,
            RelpStatus::Stopped | RelpStatus::FinalStopped | RelpStatus::Waiting
        ) {
            if *status == RelpStatus::Stopped && wait {
                *status = RelpStatus::Waiting;
                let _ = self.status_tx.send(RelpStatus::Waiting).await;
            }
            return;
        }

        // Started: actually drain
        self.generation_cancel.lock().cancel();
        if let Some(queue) = self.raw_queue.lock().clone() {
            queue.dispose();
        }
        self.parse_tracker.close();
        self.parse_tracker.wait().await;

        // Parsers are done, so every accepted txnr has its verdict; give
        // the response writers a bounded chance to put them on the wire
        let forwarder = Arc::clone(&self.forwarder);
        let flush = async move {
            for conn_id in forwarder.conn_ids() {
                forwarder.wait_drained(conn_id).await;
            }
        };
        let _ = tokio::time::timeout(STOP_FLUSH_TIMEOUT, flush).await;

        self.forwarder.remove_all();
        self.conn_tracker.close();
        self.conn_tracker.wait().await;

        if final_ {
            *status = RelpStatus::FinalStopped;
            let _ = self.status_tx.send(RelpStatus::FinalStopped).await;
        } else if wait {
            *status = RelpStatus::Waiting;
            let _ = self.status_tx.send(RelpStatus::Waiting).await;
        } else {
            *status = RelpStatus::Stopped;
            let _ = self.status_tx.send(RelpStatus::Stopped).await;
        }
    }
}

/// A listener with the source configuration it serves
enum BoundListener {
    Tcp(TcpListener, Arc<RelpSourceConfig>),
    #[cfg(unix)]
    Unix(UnixListener, Arc<RelpSourceConfig>, String),
}

impl BoundListener {
    fn config(&self) -> Arc<RelpSourceConfig> {
        match self {
            BoundListener::Tcp(_, config) => Arc::clone(config),
            #[cfg(unix)]
            BoundListener::Unix(_, config, _) => Arc::clone(config),
        }
    }
}

/// Accept loop for one TCP listener
async fn accept_tcp(listener: TcpListener, ctx: ConnContext) {
    let local_port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    configure_socket(&stream, &ctx.config);
                    let peer = PeerInfo {
                        client: peer_addr.ip().to_string(),
                        local_port,
                        unix_socket_path: String::new(),
                    };
                    ctx.tracker.spawn(handle_connection(stream, peer, ctx.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "relp tcp accept error");
                }
            }
        }
    }
    tracing::debug!(local_port, "relp tcp listener closed");
}

/// Accept loop for one unix socket listener
#[cfg(unix)]
async fn accept_unix(listener: UnixListener, path: String, ctx: ConnContext) {
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let peer = PeerInfo {
                        client: "localhost".into(),
                        local_port: 0,
                        unix_socket_path: path.clone(),
                    };
                    ctx.tracker.spawn(handle_connection(stream, peer, ctx.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %path, "relp unix accept error");
                }
            }
        }
    }
    tracing::debug!(path = %path, "relp unix listener closed");
}

/// Keepalive and nodelay, as far as the platform allows
#[cfg(unix)]
fn configure_socket(stream: &tokio::net::TcpStream, config: &RelpSourceConfig) {
    use socket2::{SockRef, TcpKeepalive};

    let sock = SockRef::from(stream);
    if let Err(e) = sock.set_nodelay(true) {
        tracing::warn!(error = %e, "failed to set TCP_NODELAY");
    }
    if config.keepalive {
        let keepalive = TcpKeepalive::new().with_time(config.keepalive_period);
        if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
            tracing::warn!(error = %e, "failed to set TCP keepalive");
        }
    }
}

#[cfg(not(unix))]
fn configure_socket(_stream: &tokio::net::TcpStream, _config: &RelpSourceConfig) {}

/// One parser worker
///
/// Drains the raw queue until it is disposed and empty. Every consumed
/// frame gets exactly one verdict before its buffer goes back to the
/// pool, on every path.
async fn parse_loop(
    impl_: Arc<RelpServiceImpl>,
    raw_queue: Arc<Ring<RawMessage>>,
    env: Arc<ParsersEnv>,
    pool: Arc<BufferPool>,
) {
    loop {
        let raw = match raw_queue.get().await {
            Ok(raw) => raw,
            Err(_) => return,
        };
        let RawMessage {
            conn_id,
            txnr,
            client,
            local_port,
            unix_socket_path,
            format,
            encoding,
            dont_parse_sd,
            conf_id,
            message,
        } = raw;

        let Some(parser) = env.get(&format) else {
            impl_.forwarder.forward_fail(conn_id, txnr);
            impl_.metrics.parsing_error(&client, &format);
            tracing::error!(
                protocol = "relp",
                client = %client,
                format = %format,
                txnr,
                "unknown parser, this worker stops"
            );
            pool.release(message);
            return;
        };

        let decoder = select_decoder(&encoding);
        let parsed = parser.parse(&message, decoder, dont_parse_sd);
        pool.release(message);

        let fields = match parsed {
            Err(e) => {
                tracing::warn!(
                    protocol = "relp",
                    client = %client,
                    local_port,
                    format = %format,
                    txnr,
                    error = %e,
                    "parsing error"
                );
                impl_.forwarder.forward_fail(conn_id, txnr);
                impl_.metrics.parsing_error(&client, &format);
                continue;
            }
            Ok(None) => {
                // Accepted but empty
                impl_.forwarder.forward_succ(conn_id, txnr);
                continue;
            }
            Ok(Some(fields)) => fields,
        };

        let msg = spigot_model::FullMessage {
            fields,
            client: client.clone(),
            local_port,
            unix_socket_path,
            txnr,
            conn_id,
            conf_id,
            uid: Uuid::now_v7(),
        };
        match impl_.stasher.stash(msg).await {
            Ok(()) => {
                impl_.forwarder.forward_succ(conn_id, txnr);
            }
            Err(e) if e.is_fatal() => {
                impl_.forwarder.forward_fail(conn_id, txnr);
                tracing::error!(client = %client, txnr, error = %e, "fatal error pushing relp message downstream");
                impl_.fatal.cancel();
                // Stopping joins this very worker pool, so it must run
                // detached while this worker returns
                let impl_ = Arc::clone(&impl_);
                tokio::spawn(async move { impl_.stop_and_wait().await });
                return;
            }
            Err(e) => {
                impl_.forwarder.forward_fail(conn_id, txnr);
                tracing::warn!(client = %client, txnr, error = %e, "downstream rejected relp message");
            }
        }
    }
}

#[cfg(test)]
#[path = "service_test.rs"]
mod tests;
