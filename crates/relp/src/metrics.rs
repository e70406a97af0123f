//! Prometheus metrics for the RELP service
//!
//! One registry per service instance, gathered through the service's
//! `gather()` hook. Exposition is somebody else's business.

use prometheus::proto::MetricFamily;
use prometheus::{IntCounterVec, Opts, Registry};

/// Provider label used on the shared counters
const PROVIDER: &str = "relp";

/// Counters of the RELP service
pub struct RelpMetrics {
    registry: Registry,

    /// `skw_relp_answers_total{status, client}`
    pub answers: IntCounterVec,
    /// `skw_relp_protocol_errors_total{client}`
    pub protocol_errors: IntCounterVec,
    /// `skw_incoming_messages_total{provider, client, port, path}`
    pub incoming: IntCounterVec,
    /// `skw_client_connections_total{provider, client, port, path}`
    pub connections: IntCounterVec,
    /// `skw_parsing_errors_total{provider, client, parsername}`
    pub parsing_errors: IntCounterVec,
}

impl RelpMetrics {
    /// Create and register the counter families
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let answers = IntCounterVec::new(
            Opts::new("skw_relp_answers_total", "number of RELP rsp answers"),
            &["status", "client"],
        )?;
        let protocol_errors = IntCounterVec::new(
            Opts::new(
                "skw_relp_protocol_errors_total",
                "number of RELP protocol errors",
            ),
            &["client"],
        )?;
        let incoming = IntCounterVec::new(
            Opts::new("skw_incoming_messages_total", "number of messages received"),
            &["provider", "client", "port", "path"],
        )?;
        let connections = IntCounterVec::new(
            Opts::new(
                "skw_client_connections_total",
                "number of client connections",
            ),
            &["provider", "client", "port", "path"],
        )?;
        let parsing_errors = IntCounterVec::new(
            Opts::new("skw_parsing_errors_total", "number of parsing errors"),
            &["provider", "client", "parsername"],
        )?;

        registry.register(Box::new(answers.clone()))?;
        registry.register(Box::new(protocol_errors.clone()))?;
        registry.register(Box::new(incoming.clone()))?;
        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(parsing_errors.clone()))?;

        Ok(Self {
            registry,
            answers,
            protocol_errors,
            incoming,
            connections,
            parsing_errors,
        })
    }

    /// Gather all metric families of this service
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Record one `rsp` answer with its status code
    #[inline]
    pub fn answer(&self, status: &str, client: &str) {
        self.answers.with_label_values(&[status, client]).inc();
    }

    /// Record a protocol violation by a client
    #[inline]
    pub fn protocol_error(&self, client: &str) {
        self.protocol_errors.with_label_values(&[client]).inc();
    }

    /// Record one accepted syslog frame
    #[inline]
    pub fn incoming_message(&self, client: &str, port: &str, path: &str) {
        self.incoming
            .with_label_values(&[PROVIDER, client, port, path])
            .inc();
    }

    /// Record a new client connection
    #[inline]
    pub fn client_connection(&self, client: &str, port: &str, path: &str) {
        self.connections
            .with_label_values(&[PROVIDER, client, port, path])
            .inc();
    }

    /// Record a message that could not be parsed
    #[inline]
    pub fn parsing_error(&self, client: &str, parser: &str) {
        self.parsing_errors
            .with_label_values(&[PROVIDER, client, parser])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_and_count() {
        let metrics = RelpMetrics::new().unwrap();

        metrics.answer("200", "10.0.0.1");
        metrics.answer("200", "10.0.0.1");
        metrics.answer("500", "10.0.0.1");
        metrics.protocol_error("10.0.0.1");
        metrics.incoming_message("10.0.0.1", "2514", "");
        metrics.client_connection("10.0.0.1", "2514", "");
        metrics.parsing_error("10.0.0.1", "rfc5424");

        assert_eq!(
            metrics.answers.with_label_values(&["200", "10.0.0.1"]).get(),
            2
        );
        assert_eq!(
            metrics.answers.with_label_values(&["500", "10.0.0.1"]).get(),
            1
        );
        assert_eq!(
            metrics.protocol_errors.with_label_values(&["10.0.0.1"]).get(),
            1
        );

        let families = metrics.gather();
        assert_eq!(families.len(), 5);
        assert!(families
            .iter()
            .any(|f| f.get_name() == "skw_relp_answers_total"));
    }

    #[test]
    fn test_registries_are_independent() {
        // Two service generations must not share counters
        let a = RelpMetrics::new().unwrap();
        let b = RelpMetrics::new().unwrap();
        a.answer("200", "x");
        assert_eq!(b.answers.with_label_values(&["200", "x"]).get(), 0);
    }
}
