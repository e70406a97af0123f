//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A source defines neither TCP ports nor a unix socket path
    #[error("relp source '{name}' has no endpoint: set 'ports' or 'unix_socket_path'")]
    NoEndpoint {
        /// Bind address of the offending source (used as its name)
        name: String,
    },

    /// The same TCP port appears in several sources
    #[error("port {port} is used by multiple relp sources")]
    DuplicatePort {
        /// The conflicting port
        port: u16,
    },

    /// A parser alias points at an unknown builtin
    #[error("parser '{name}' references unknown format '{func}' (known: {known})")]
    UnknownFormat {
        /// Alias name
        name: String,
        /// The unknown builtin
        func: String,
        /// Comma-separated list of known formats
        known: String,
    },

    /// A field holds an invalid value
    #[error("{section} has invalid {field}: {message}")]
    InvalidValue {
        /// Config section, e.g. "relp_source"
        section: &'static str,
        /// Field name
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// No source is enabled
    #[error("no relp source is enabled - at least one must be")]
    NoSourcesEnabled,
}

impl ConfigError {
    /// Create an InvalidValue error
    pub fn invalid_value(
        section: &'static str,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            section,
            field,
            message: message.into(),
        }
    }
}
