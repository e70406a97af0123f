//! Global gateway settings

use serde::Deserialize;

/// Default capacity of the raw-frame queue
const DEFAULT_QUEUE_SIZE: usize = 10_000;

/// Global settings shared by all sources
///
/// # Example
///
/// ```toml
/// [main]
/// input_queue_size = 50000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MainConfig {
    /// Capacity of the raw-frame queue between receipt and parsing
    /// Default: 10000
    pub input_queue_size: usize,

    /// Maximum size of one incoming frame, header included
    /// Default: 132000
    pub max_input_message_size: usize,

    /// Number of parser workers
    /// Default: one per CPU
    pub parser_workers: Option<usize>,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            input_queue_size: DEFAULT_QUEUE_SIZE,
            max_input_message_size: crate::relp::DEFAULT_MAX_FRAME_SIZE,
            parser_workers: None,
        }
    }
}

impl MainConfig {
    /// Effective parser worker count (configured value or CPU count)
    pub fn effective_parser_workers(&self) -> usize {
        self.parser_workers.unwrap_or_else(num_cpus).max(1)
    }
}

/// Detected CPU count, falling back to 1
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
