//! Spigot - Syslog parsers
//!
//! Format parsers behind a narrow capability trait, looked up by string
//! key from a registry built once at service start. The ingestion core
//! never interprets payload bytes itself; it fetches a [`Parser`] from
//! the [`ParsersEnv`] using the source's `format` and delegates.
//!
//! # Builtins
//!
//! - `rfc5424` - IETF syslog with structured data
//! - `rfc3164` - BSD syslog
//! - `auto` - sniffs the version digit after the priority and dispatches
//!
//! `[[parser]]` config blocks add aliases for the builtins, so a source
//! can say `format = "cisco"` and resolve to `rfc3164`.

mod decoders;
mod rfc3164;
mod rfc5424;

use std::collections::HashMap;
use std::sync::Arc;

use spigot_config::ParserConfig;
use spigot_model::SyslogMessage;
use thiserror::Error;

pub use decoders::{decode, select_decoder};
pub use encoding_rs::Encoding;
pub use rfc3164::Rfc3164Parser;
pub use rfc5424::Rfc5424Parser;

/// Errors produced while turning payload bytes into a record
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not valid in the configured encoding
    #[error("payload is not valid {encoding}")]
    Encoding {
        /// Canonical name of the encoding
        encoding: &'static str,
    },

    /// The `<PRI>` header is missing or out of range
    #[error("invalid priority header: {0}")]
    Priority(String),

    /// The message violates its format
    #[error("malformed {format} message: {reason}")]
    Malformed {
        /// Format that was being parsed
        format: &'static str,
        /// What went wrong
        reason: String,
    },
}

/// A format-specific syslog parser
///
/// `Ok(None)` means the payload was empty or content-free: accepted, but
/// nothing to forward.
pub trait Parser: Send + Sync {
    /// Parser key, e.g. "rfc5424"
    fn name(&self) -> &'static str;

    /// Parse one payload
    fn parse(
        &self,
        raw: &[u8],
        encoding: &'static Encoding,
        dont_parse_sd: bool,
    ) -> Result<Option<SyslogMessage>, ParseError>;
}

/// Auto-detecting parser: RFC 5424 if a version digit follows the
/// priority, RFC 3164 otherwise
#[derive(Debug, Default)]
pub struct AutoParser {
    rfc5424: Rfc5424Parser,
    rfc3164: Rfc3164Parser,
}

impl Parser for AutoParser {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn parse(
        &self,
        raw: &[u8],
        encoding: &'static Encoding,
        dont_parse_sd: bool,
    ) -> Result<Option<SyslogMessage>, ParseError> {
        if looks_like_rfc5424(raw) {
            self.rfc5424.parse(raw, encoding, dont_parse_sd)
        } else {
            self.rfc3164.parse(raw, encoding, dont_parse_sd)
        }
    }
}

/// Sniff for `<PRI>1 ` at the start of the payload
fn looks_like_rfc5424(raw: &[u8]) -> bool {
    if raw.first() != Some(&b'<') {
        return false;
    }
    let Some(gt) = raw.iter().position(|&b| b == b'>') else {
        return false;
    };
    matches!(raw.get(gt + 1..gt + 3), Some(b"1 "))
}

/// Registry of parsers, keyed by format name
///
/// Built once from the parser configs; lookups on the parse hot path are
/// a single HashMap probe.
pub struct ParsersEnv {
    parsers: HashMap<String, Arc<dyn Parser>>,
}

impl ParsersEnv {
    /// Build the registry: builtins plus configured aliases
    ///
    /// Aliases referencing unknown builtins are skipped; configuration
    /// validation has already rejected them upstream.
    pub fn new(configs: &[ParserConfig]) -> Self {
        let mut parsers: HashMap<String, Arc<dyn Parser>> = HashMap::new();
        parsers.insert("auto".into(), Arc::new(AutoParser::default()));
        parsers.insert("rfc5424".into(), Arc::new(Rfc5424Parser));
        parsers.insert("rfc3164".into(), Arc::new(Rfc3164Parser));

        for config in configs {
            if config.name.is_empty() {
                continue;
            }
            if let Some(builtin) = parsers.get(&config.func).cloned() {
                parsers.insert(config.name.clone(), builtin);
            }
        }

        Self { parsers }
    }

    /// Look up a parser by format name
    pub fn get(&self, format: &str) -> Option<Arc<dyn Parser>> {
        self.parsers.get(format).cloned()
    }
}

#[cfg(test)]
#[path = "env_test.rs"]
mod tests;
