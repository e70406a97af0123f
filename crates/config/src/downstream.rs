//! Downstream delivery configuration
//!
//! Where accepted records go once the stash owns them. The gateway binary
//! ships two modes: NDJSON on stdout (the default, pipe-friendly) and a
//! reconnecting TCP forwarder.

use serde::Deserialize;
use std::time::Duration;

/// Downstream delivery mode
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownstreamMode {
    /// Write NDJSON records to stdout (default)
    #[default]
    Stdout,
    /// Forward NDJSON records to a TCP endpoint
    Tcp,
}

/// Downstream delivery configuration
///
/// # Example
///
/// ```toml
/// [downstream]
/// mode = "tcp"
/// address = "collector.internal:6514"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Delivery mode (stdout, tcp)
    pub mode: DownstreamMode,

    /// Target address for `mode = "tcp"`
    pub address: String,

    /// In-flight records buffered between stash and writer
    /// Default: 10000
    pub queue_size: usize,

    /// Delay before reconnecting a failed TCP target
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            mode: DownstreamMode::Stdout,
            address: String::new(),
            queue_size: 10_000,
            retry_interval: Duration::from_secs(5),
        }
    }
}
