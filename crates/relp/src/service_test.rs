//! End-to-end tests for the RELP service
//!
//! Real loopback sockets, a recording stash, and byte-exact assertions on
//! the reply stream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use spigot_config::RelpSourceConfig;
use spigot_model::{FullMessage, ListenerInfo, ReportError, Reporter, StashError, Stasher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::binder::DirectBinder;
use crate::service::{RelpService, RelpStatus};

/// Recording stash with per-txnr failure and delay injection
#[derive(Default)]
struct TestStash {
    stashed: Mutex<Vec<FullMessage>>,
    reports: Mutex<Vec<Vec<ListenerInfo>>>,
    nonfatal: Mutex<HashSet<u64>>,
    fatal: Mutex<HashSet<u64>>,
    delays: Mutex<HashMap<u64, Duration>>,
}

impl TestStash {
    fn stashed_txnrs(&self) -> Vec<u64> {
        self.stashed.lock().iter().map(|m| m.txnr).collect()
    }
}

#[async_trait]
impl Stasher for TestStash {
    async fn stash(&self, msg: FullMessage) -> Result<(), StashError> {
        let delay = self.delays.lock().get(&msg.txnr).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fatal.lock().contains(&msg.txnr) {
            return Err(StashError::Fatal("injected fatal".into()));
        }
        if self.nonfatal.lock().contains(&msg.txnr) {
            return Err(StashError::NonFatal("injected rejection".into()));
        }
        self.stashed.lock().push(msg);
        Ok(())
    }
}

#[async_trait]
impl Reporter for TestStash {
    async fn report(&self, infos: &[ListenerInfo]) -> Result<(), ReportError> {
        self.reports.lock().push(infos.to_vec());
        Ok(())
    }
}

fn test_source(format: &str) -> RelpSourceConfig {
    RelpSourceConfig {
        ports: vec![0],
        bind_addr: "127.0.0.1".into(),
        format: format.into(),
        ..Default::default()
    }
}

/// Start a service and wait for its listener to be reported
async fn start_service(
    stash: &Arc<TestStash>,
    source: RelpSourceConfig,
    workers: usize,
) -> (RelpService, u16) {
    let service = RelpService::new(
        Arc::clone(stash) as Arc<dyn Reporter>,
        Arc::new(DirectBinder),
    )
    .unwrap();
    service.set_conf(vec![source], vec![], 128, 132_000, workers);
    service.start().await;

    for _ in 0..200 {
        if let Some(infos) = stash.reports.lock().last() {
            if let Some(info) = infos.first() {
                return (service, info.port);
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("service did not report a bound listener");
}

const OFFER: &[u8] = b"relp_version=0\nrelp_software=test\ncommands=syslog";

fn open_frame() -> Vec<u8> {
    let mut frame = format!("1 open {} ", OFFER.len()).into_bytes();
    frame.extend_from_slice(OFFER);
    frame.push(b'\n');
    frame
}

fn open_reply() -> Vec<u8> {
    let mut reply = format!("1 rsp {} 200 OK\n", OFFER.len() + 7).into_bytes();
    reply.extend_from_slice(OFFER);
    reply.push(b'\n');
    reply
}

fn syslog_frame(txnr: u64, data: &[u8]) -> Vec<u8> {
    let mut frame = format!("{} syslog {} ", txnr, data.len()).into_bytes();
    frame.extend_from_slice(data);
    frame.push(b'\n');
    frame
}

async fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf)).await;
    buf
}

#[tokio::test]
async fn test_happy_path() {
    let stash = Arc::new(TestStash::default());
    let (service, port) = start_service(&stash, test_source("auto"), 2).await;

    let mut wire = open_frame();
    wire.extend_from_slice(&syslog_frame(2, b"hello world"));
    wire.extend_from_slice(b"3 close 0\n");

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&wire).await.unwrap();
    let replies = read_to_end(&mut stream).await;

    let mut expected = open_reply();
    expected.extend_from_slice(b"2 rsp 6 200 OK\n");
    expected.extend_from_slice(b"3 rsp 0\n0 serverclose 0\n");
    assert_eq!(
        String::from_utf8_lossy(&replies),
        String::from_utf8_lossy(&expected)
    );

    // The payload made it downstream, byte for byte, before the ack
    let stashed = stash.stashed.lock();
    assert_eq!(stashed.len(), 1);
    assert_eq!(stashed[0].txnr, 2);
    assert_eq!(stashed[0].fields.message, "hello world");
    assert_eq!(stashed[0].client, "127.0.0.1");
    drop(stashed);

    let metrics = service.metrics();
    assert_eq!(
        metrics.answers.with_label_values(&["200", "127.0.0.1"]).get(),
        1
    );
    assert_eq!(
        metrics
            .connections
            .with_label_values(&["relp", "127.0.0.1", &port.to_string(), ""])
            .get(),
        1
    );

    service.stop().await;
}

#[tokio::test]
async fn test_out_of_order_completion_acks_in_order() {
    let stash = Arc::new(TestStash::default());
    // Hold txnr 2 in the stash so txnr 3 finishes first
    stash
        .delays
        .lock()
        .insert(2, Duration::from_millis(150));
    let (service, port) = start_service(&stash, test_source("auto"), 2).await;

    let mut wire = open_frame();
    wire.extend_from_slice(&syslog_frame(2, b"first"));
    wire.extend_from_slice(&syslog_frame(3, b"second"));
    wire.extend_from_slice(b"4 close 0\n");

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&wire).await.unwrap();
    let replies = read_to_end(&mut stream).await;

    let mut expected = open_reply();
    expected.extend_from_slice(b"2 rsp 6 200 OK\n");
    expected.extend_from_slice(b"3 rsp 6 200 OK\n");
    expected.extend_from_slice(b"4 rsp 0\n0 serverclose 0\n");
    assert_eq!(
        String::from_utf8_lossy(&replies),
        String::from_utf8_lossy(&expected),
        "acks must be in txnr order even when verdicts are not"
    );

    // Verify the verdicts really completed out of order
    assert_eq!(stash.stashed_txnrs(), vec![3, 2]);

    service.stop().await;
}

#[tokio::test]
async fn test_parse_error_on_first_of_two() {
    let stash = Arc::new(TestStash::default());
    let (service, port) = start_service(&stash, test_source("rfc5424"), 2).await;

    let mut wire = open_frame();
    wire.extend_from_slice(&syslog_frame(2, b"this is not rfc5424"));
    wire.extend_from_slice(&syslog_frame(3, b"<34>1 - host app - - - fine"));
    wire.extend_from_slice(b"4 close 0\n");

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&wire).await.unwrap();
    let replies = read_to_end(&mut stream).await;

    let mut expected = open_reply();
    expected.extend_from_slice(b"2 rsp 6 500 KO\n");
    expected.extend_from_slice(b"3 rsp 6 200 OK\n");
    expected.extend_from_slice(b"4 rsp 0\n0 serverclose 0\n");
    assert_eq!(
        String::from_utf8_lossy(&replies),
        String::from_utf8_lossy(&expected)
    );

    let metrics = service.metrics();
    assert_eq!(
        metrics
            .parsing_errors
            .with_label_values(&["relp", "127.0.0.1", "rfc5424"])
            .get(),
        1
    );
    assert_eq!(
        metrics.answers.with_label_values(&["500", "127.0.0.1"]).get(),
        1
    );
    assert_eq!(
        metrics.answers.with_label_values(&["200", "127.0.0.1"]).get(),
        1
    );

    service.stop().await;
}

#[tokio::test]
async fn test_txnr_regression_closes_connection() {
    let stash = Arc::new(TestStash::default());
    let (service, port) = start_service(&stash, test_source("auto"), 1).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&open_frame()).await.unwrap();
    stream.write_all(&syslog_frame(2, b"ok")).await.unwrap();

    // Wait for the open reply and the first ack
    let mut expected = open_reply();
    expected.extend_from_slice(b"2 rsp 6 200 OK\n");
    let mut buf = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(buf, expected);

    // Same txnr again: the server must hang up without answering
    stream.write_all(&syslog_frame(2, b"again")).await.unwrap();
    let rest = read_to_end(&mut stream).await;
    assert!(
        rest.is_empty(),
        "no rsp may follow a txnr regression, got {:?}",
        String::from_utf8_lossy(&rest)
    );
    assert_eq!(
        service
            .metrics()
            .protocol_errors
            .with_label_values(&["127.0.0.1"])
            .get(),
        1
    );

    service.stop().await;
}

#[tokio::test]
async fn test_syslog_before_open_is_protocol_error() {
    let stash = Arc::new(TestStash::default());
    let (service, port) = start_service(&stash, test_source("auto"), 1).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(b"1 syslog 5 hello\n").await.unwrap();
    let replies = read_to_end(&mut stream).await;

    assert!(replies.is_empty());
    assert!(stash.stashed.lock().is_empty());
    assert_eq!(
        service
            .metrics()
            .protocol_errors
            .with_label_values(&["127.0.0.1"])
            .get(),
        1
    );

    service.stop().await;
}

#[tokio::test]
async fn test_double_open_is_protocol_error() {
    let stash = Arc::new(TestStash::default());
    let (service, port) = start_service(&stash, test_source("auto"), 1).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&open_frame()).await.unwrap();
    let mut second = open_frame();
    second[0] = b'2';
    stream.write_all(&second).await.unwrap();

    let replies = read_to_end(&mut stream).await;
    assert_eq!(replies, open_reply(), "only the first open is answered");
    assert_eq!(
        service
            .metrics()
            .protocol_errors
            .with_label_values(&["127.0.0.1"])
            .get(),
        1
    );

    service.stop().await;
}

#[tokio::test]
async fn test_empty_syslog_data_is_accepted_without_stash() {
    let stash = Arc::new(TestStash::default());
    let (service, port) = start_service(&stash, test_source("auto"), 1).await;

    let mut wire = open_frame();
    wire.extend_from_slice(b"2 syslog 0\n");
    wire.extend_from_slice(b"3 close 0\n");

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&wire).await.unwrap();
    let replies = read_to_end(&mut stream).await;

    let mut expected = open_reply();
    expected.extend_from_slice(b"2 rsp 6 200 OK\n");
    expected.extend_from_slice(b"3 rsp 0\n0 serverclose 0\n");
    assert_eq!(replies, expected);
    assert!(stash.stashed.lock().is_empty());

    service.stop().await;
}

#[tokio::test]
async fn test_fatal_stash_stops_the_service() {
    let stash = Arc::new(TestStash::default());
    let (service, port) = start_service(&stash, test_source("auto"), 2).await;
    stash.fatal.lock().insert(5);
    let fatal = service.fatal_error();

    let mut wire = open_frame();
    for txnr in 2..=4 {
        wire.extend_from_slice(&syslog_frame(txnr, b"fine"));
    }
    wire.extend_from_slice(&syslog_frame(5, b"poison"));

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&wire).await.unwrap();
    let replies = read_to_end(&mut stream).await;

    // Everything answered in order, the poison frame NACKed, then the
    // connection torn down by the stopping service
    let text = String::from_utf8_lossy(&replies);
    let after_open = &text[String::from_utf8_lossy(&open_reply()).len()..];
    assert_eq!(
        after_open,
        "2 rsp 6 200 OK\n3 rsp 6 200 OK\n4 rsp 6 200 OK\n5 rsp 6 500 KO\n"
    );

    tokio::time::timeout(Duration::from_secs(5), fatal.cancelled())
        .await
        .expect("fatal must be broadcast");

    // The service parks in Waiting rather than dying
    let mut status = service.status().await;
    for _ in 0..100 {
        if status == Some(RelpStatus::Waiting) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = service.status().await;
    }
    assert_eq!(status, Some(RelpStatus::Waiting));

    service.stop().await;
}

#[tokio::test]
async fn test_stop_closes_listener_and_reports_empty() {
    let stash = Arc::new(TestStash::default());
    let (service, port) = start_service(&stash, test_source("auto"), 1).await;

    // A live connection mid-session
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&open_frame()).await.unwrap();
    let mut buf = vec![0u8; open_reply().len()];
    stream.read_exact(&mut buf).await.unwrap();

    service.stop().await;

    // The previous generation is gone: live connection over, port closed
    let rest = read_to_end(&mut stream).await;
    assert!(rest.is_empty());
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    assert_eq!(
        stash.reports.lock().last().map(Vec::len),
        Some(0),
        "final stop reports an empty listener set"
    );
}

#[tokio::test]
async fn test_unbindable_endpoints_are_skipped() {
    let stash = Arc::new(TestStash::default());
    let service = RelpService::new(
        Arc::clone(&stash) as Arc<dyn Reporter>,
        Arc::new(DirectBinder),
    )
    .unwrap();
    let source = RelpSourceConfig {
        ports: vec![0],
        bind_addr: "definitely not an address".into(),
        ..Default::default()
    };
    service.set_conf(vec![source], vec![], 16, 132_000, 1);
    service.start().await;

    for _ in 0..200 {
        if !stash.reports.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        stash.reports.lock().first().map(Vec::len),
        Some(0),
        "nothing bindable means an empty report, not a crash"
    );
    service.stop().await;
}

#[tokio::test]
async fn test_reload_restarts_with_new_config() {
    let stash = Arc::new(TestStash::default());
    let (service, old_port) = start_service(&stash, test_source("auto"), 1).await;

    // Swap the source for a fresh one; the supervisor must rebind
    service
        .reload(vec![test_source("rfc3164")], vec![], 64, 132_000, 1)
        .await;

    let mut new_port = 0;
    for _ in 0..200 {
        {
            let reports = stash.reports.lock();
            if reports.len() >= 2 {
                if let Some(info) = reports.last().and_then(|r| r.first()) {
                    new_port = info.port;
                }
            }
        }
        if new_port != 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_ne!(new_port, 0, "reload must report the new listener");

    // The old generation is gone, the new one answers
    if new_port != old_port {
        assert!(TcpStream::connect(("127.0.0.1", old_port)).await.is_err());
    }
    let mut wire = open_frame();
    wire.extend_from_slice(&syslog_frame(2, b"after reload"));
    wire.extend_from_slice(b"3 close 0\n");
    let mut stream = TcpStream::connect(("127.0.0.1", new_port)).await.unwrap();
    stream.write_all(&wire).await.unwrap();
    let replies = read_to_end(&mut stream).await;
    assert!(String::from_utf8_lossy(&replies).contains("2 rsp 6 200 OK\n"));

    service.stop().await;
}

#[tokio::test]
async fn test_read_timeout_closes_idle_connection() {
    let stash = Arc::new(TestStash::default());
    let source = RelpSourceConfig {
        timeout: Duration::from_millis(200),
        ..test_source("auto")
    };
    let (service, port) = start_service(&stash, source, 1).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&open_frame()).await.unwrap();
    let mut buf = vec![0u8; open_reply().len()];
    stream.read_exact(&mut buf).await.unwrap();

    // Stay idle; the server must hang up on its own
    let start = std::time::Instant::now();
    let rest = read_to_end(&mut stream).await;
    assert!(rest.is_empty());
    assert!(start.elapsed() < Duration::from_secs(5));

    service.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relp.sock");

    let stash = Arc::new(TestStash::default());
    let service = RelpService::new(
        Arc::clone(&stash) as Arc<dyn Reporter>,
        Arc::new(DirectBinder),
    )
    .unwrap();
    let source = RelpSourceConfig {
        ports: vec![],
        unix_socket_path: Some(path.clone()),
        format: "auto".into(),
        ..Default::default()
    };
    service.set_conf(vec![source], vec![], 16, 132_000, 1);
    service.start().await;

    for _ in 0..200 {
        if stash.reports.lock().last().is_some_and(|r| !r.is_empty()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut wire = open_frame();
    wire.extend_from_slice(&syslog_frame(2, b"via unix"));
    wire.extend_from_slice(b"3 close 0\n");

    let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
    stream.write_all(&wire).await.unwrap();
    let mut replies = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut replies)).await;

    let mut expected = open_reply();
    expected.extend_from_slice(b"2 rsp 6 200 OK\n");
    expected.extend_from_slice(b"3 rsp 0\n0 serverclose 0\n");
    assert_eq!(replies, expected);

    let stashed = stash.stashed.lock();
    assert_eq!(stashed.len(), 1);
    assert_eq!(stashed[0].client, "localhost");
    assert_eq!(stashed[0].unix_socket_path, path.display().to_string());
    drop(stashed);

    service.stop().await;
}
