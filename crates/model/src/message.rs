//! Raw and parsed message envelopes
//!
//! `RawMessage` is what a connection handler enqueues for the parser
//! workers; `FullMessage` is what a parser worker hands to the stash.

use bytes::BytesMut;
use serde::Serialize;
use uuid::Uuid;

use crate::syslog::SyslogMessage;

/// Opaque identifier for a live connection
///
/// Minted by the acknowledgement coordinator when a connection registers;
/// all per-connection queues are keyed by it so no component ever holds a
/// reference to another connection's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A raw frame payload plus origin metadata
///
/// The `message` buffer comes from the process-wide pool; whoever consumes
/// the struct releases the buffer back, on every path.
#[derive(Debug)]
pub struct RawMessage {
    /// Connection that produced the frame
    pub conn_id: ConnId,
    /// Transaction number of the frame
    pub txnr: u64,
    /// Client address (host part) for logs and metrics
    pub client: String,
    /// Local port the frame arrived on (0 for unix sockets)
    pub local_port: u16,
    /// Unix socket path the frame arrived on ("" for TCP)
    pub unix_socket_path: String,
    /// Parser key for this source
    pub format: String,
    /// Character encoding label for this source
    pub encoding: String,
    /// Skip structured-data parsing
    pub dont_parse_sd: bool,
    /// Fingerprint of the source configuration in force
    pub conf_id: Uuid,
    /// Payload bytes; `len()` is the exact DATA length
    pub message: BytesMut,
}

/// A parsed record ready for the stash
#[derive(Debug, Clone, Serialize)]
pub struct FullMessage {
    /// The parsed syslog fields
    pub fields: SyslogMessage,
    /// Client address
    pub client: String,
    /// Local port (0 for unix sockets)
    pub local_port: u16,
    /// Unix socket path ("" for TCP)
    pub unix_socket_path: String,
    /// Transaction number within the connection
    pub txnr: u64,
    /// Connection the record came from
    pub conn_id: ConnId,
    /// Source configuration fingerprint
    pub conf_id: Uuid,
    /// Freshly minted unique id for the record
    pub uid: Uuid,
}

/// A bound endpoint, announced through the `Reporter`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerInfo {
    /// Listening port (0 for unix sockets)
    pub port: u16,
    /// Bind address ("" for unix sockets)
    pub bind_addr: String,
    /// Unix socket path ("" for TCP)
    pub unix_socket_path: String,
    /// Source protocol, e.g. "relp"
    pub protocol: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_id_display() {
        assert_eq!(ConnId(42).to_string(), "42");
    }

    #[test]
    fn test_listener_info_serializes() {
        let info = ListenerInfo {
            port: 2514,
            bind_addr: "127.0.0.1".into(),
            unix_socket_path: String::new(),
            protocol: "relp".into(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("2514"));
        assert!(json.contains("relp"));
    }
}
