//! Cross-section configuration validation
//!
//! Runs after deserialization; everything that can be rejected before a
//! single socket is opened is rejected here.

use std::collections::HashSet;

use crate::error::{ConfigError, Result};
use crate::parser::{is_known_format, KNOWN_FORMATS};
use crate::{ClientAuthType, Config, DownstreamMode};

impl Config {
    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        let enabled: Vec<_> = self.relp_source.iter().filter(|s| s.enabled).collect();
        if enabled.is_empty() {
            return Err(ConfigError::NoSourcesEnabled);
        }

        let alias_names: HashSet<&str> = self.parser.iter().map(|p| p.name.as_str()).collect();

        let mut seen_ports = HashSet::new();
        for source in &enabled {
            if source.ports.is_empty() && source.unix_socket_path.is_none() {
                return Err(ConfigError::NoEndpoint {
                    name: source.bind_addr.clone(),
                });
            }
            for port in &source.ports {
                if !seen_ports.insert(*port) {
                    return Err(ConfigError::DuplicatePort { port: *port });
                }
            }
            if !is_known_format(&source.format) && !alias_names.contains(source.format.as_str()) {
                return Err(ConfigError::invalid_value(
                    "relp_source",
                    "format",
                    format!("'{}' is neither a builtin nor a parser alias", source.format),
                ));
            }
            if source.client_auth_type != ClientAuthType::None && source.tls.is_none() {
                return Err(ConfigError::invalid_value(
                    "relp_source",
                    "client_auth_type",
                    "client authentication requires a [relp_source.tls] section",
                ));
            }
            if let Some(tls) = &source.tls {
                if tls.cert_file.as_os_str().is_empty() || tls.key_file.as_os_str().is_empty() {
                    return Err(ConfigError::invalid_value(
                        "relp_source",
                        "tls",
                        "cert_file and key_file are both required",
                    ));
                }
            }
        }

        for parser in &self.parser {
            if !is_known_format(&parser.func) {
                return Err(ConfigError::UnknownFormat {
                    name: parser.name.clone(),
                    func: parser.func.clone(),
                    known: KNOWN_FORMATS.join(", "),
                });
            }
        }

        if self.main.input_queue_size == 0 {
            return Err(ConfigError::invalid_value(
                "main",
                "input_queue_size",
                "must be at least 1",
            ));
        }
        if self.main.max_input_message_size < 128 {
            return Err(ConfigError::invalid_value(
                "main",
                "max_input_message_size",
                "must be at least 128 bytes",
            ));
        }

        if self.downstream.mode == DownstreamMode::Tcp && self.downstream.address.is_empty() {
            return Err(ConfigError::invalid_value(
                "downstream",
                "address",
                "required when mode = \"tcp\"",
            ));
        }

        Ok(())
    }
}
