//! RELP source configuration
//!
//! Each `[[relp_source]]` block describes one family of listeners: a set
//! of TCP ports on a bind address, and optionally a unix socket path. All
//! listeners of a block share format, encoding, timeout and TLS settings.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on a single RELP frame, header included
pub const DEFAULT_MAX_FRAME_SIZE: usize = 132_000;

/// Default RELP port
const DEFAULT_PORT: u16 = 2514;

/// RELP source configuration
///
/// # Example
///
/// ```toml
/// [[relp_source]]
/// ports = [2514, 2515]
/// bind_addr = "0.0.0.0"
/// format = "rfc5424"
/// timeout = "1m"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelpSourceConfig {
    /// Whether this source is enabled
    /// Default: true
    pub enabled: bool,

    /// TCP ports to listen on
    /// Default: [2514]
    pub ports: Vec<u16>,

    /// Bind address for the TCP ports
    /// Default: "0.0.0.0"
    pub bind_addr: String,

    /// Optional unix stream socket to listen on
    pub unix_socket_path: Option<PathBuf>,

    /// Parser key for frames from this source
    /// Default: "auto"
    pub format: String,

    /// Character encoding of incoming payloads
    /// Default: "utf8"
    pub encoding: String,

    /// Skip parsing of RFC 5424 structured data
    pub dont_parse_structured_data: bool,

    /// Enable TCP keepalive on accepted connections
    /// Default: true
    pub keepalive: bool,

    /// Keepalive probe period
    /// Default: 75s
    #[serde(with = "humantime_serde")]
    pub keepalive_period: Duration,

    /// Per-read deadline; "0s" disables
    /// Default: 0s
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Optional transport security material
    pub tls: Option<TlsConfig>,

    /// How to treat client certificates when TLS is enabled
    pub client_auth_type: ClientAuthType,

    /// Fingerprint of this block, minted at load time
    #[serde(skip, default = "Uuid::new_v4")]
    pub conf_id: Uuid,
}

impl Default for RelpSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ports: vec![DEFAULT_PORT],
            bind_addr: "0.0.0.0".into(),
            unix_socket_path: None,
            format: "auto".into(),
            encoding: "utf8".into(),
            dont_parse_structured_data: false,
            keepalive: true,
            keepalive_period: Duration::from_secs(75),
            timeout: Duration::ZERO,
            tls: None,
            client_auth_type: ClientAuthType::default(),
            conf_id: Uuid::new_v4(),
        }
    }
}

impl RelpSourceConfig {
    /// Per-read deadline, `None` when disabled
    pub fn read_timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}

/// TLS material locations for a source
///
/// The core only validates and carries these; loading the material is the
/// business of whoever supplies the binder.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Server certificate (PEM)
    pub cert_file: PathBuf,
    /// Server private key (PEM)
    pub key_file: PathBuf,
    /// CA bundle for client verification
    pub ca_file: Option<PathBuf>,
}

/// Client certificate policy
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthType {
    /// No client certificate requested (default)
    #[default]
    None,
    /// Request a certificate but accept its absence
    Request,
    /// Require any certificate, without verification
    RequireAny,
    /// Verify a certificate if one is given
    VerifyIfGiven,
    /// Require and verify a certificate
    RequireAndVerify,
}
