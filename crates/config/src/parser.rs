//! Parser configuration
//!
//! `[[parser]]` blocks give configuration-level names to the builtin
//! format parsers, so a source's `format` can point at a site-specific
//! alias ("cisco" -> rfc3164) without touching code.

use serde::Deserialize;

/// Formats the gateway can parse out of the box
pub const KNOWN_FORMATS: [&str; 3] = ["auto", "rfc3164", "rfc5424"];

/// A named alias for a builtin parser
///
/// # Example
///
/// ```toml
/// [[parser]]
/// name = "cisco"
/// func = "rfc3164"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Alias name, usable as a source `format`
    pub name: String,

    /// Builtin the alias resolves to
    pub func: String,
}

/// Whether `format` is a builtin parser name
pub fn is_known_format(format: &str) -> bool {
    KNOWN_FORMATS.contains(&format)
}
