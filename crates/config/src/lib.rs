//! Spigot Configuration
//!
//! TOML-based configuration loading with sensible defaults. A minimal
//! config should just work - only specify what you need to change.
//!
//! # Example Minimal Config
//!
//! ```toml
//! [[relp_source]]
//! ports = [2514]
//! ```
//!
//! # Example Full Config
//!
//! ```toml
//! [main]
//! input_queue_size = 50000
//!
//! [log]
//! level = "debug"
//!
//! [[relp_source]]
//! ports = [2514, 2515]
//! bind_addr = "10.0.0.1"
//! format = "rfc5424"
//! encoding = "utf8"
//! timeout = "1m"
//!
//! [[parser]]
//! name = "cisco"
//! func = "rfc3164"
//!
//! [downstream]
//! mode = "tcp"
//! address = "collector.internal:6514"
//! ```

mod downstream;
mod error;
mod global;
mod logging;
mod parser;
mod relp;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

pub use downstream::{DownstreamConfig, DownstreamMode};
pub use error::{ConfigError, Result};
pub use global::MainConfig;
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use parser::{is_known_format, ParserConfig, KNOWN_FORMATS};
pub use relp::{ClientAuthType, RelpSourceConfig, TlsConfig, DEFAULT_MAX_FRAME_SIZE};

/// Root configuration
///
/// All sections are optional with sensible defaults, except that at least
/// one enabled `[[relp_source]]` must remain after validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Global settings (queue sizes, worker counts)
    pub main: MainConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// RELP sources
    pub relp_source: Vec<RelpSourceConfig>,

    /// Parser aliases
    pub parser: Vec<ParserConfig>,

    /// Downstream delivery
    pub downstream: DownstreamConfig,
}

impl Config {
    /// Load and validate configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        raw.parse()
    }

    /// Enabled RELP sources
    pub fn enabled_sources(&self) -> impl Iterator<Item = &RelpSourceConfig> {
        self.relp_source.iter().filter(|s| s.enabled)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
