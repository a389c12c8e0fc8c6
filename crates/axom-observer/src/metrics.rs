//! Observer counters.
//!
//! Holds the Prometheus collectors shared across the proxy and the exporter.
//! A private registry keeps the metrics isolated so tests are deterministic;
//! there is no exposition endpoint — the counters are read programmatically
//! and logged at shutdown.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// All observer metric collectors.
pub struct Metrics {
    registry: Registry,

    /// Signals successfully delivered to the ingest endpoint.
    pub signals_sent: IntCounter,
    /// Signals dropped — queue overflow or exhausted/failed export.
    pub signals_dropped: IntCounter,
    /// Intercepted AI requests, labelled by provider, operation and status.
    pub requests_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let signals_sent = IntCounter::new(
            "axom_signals_sent_total",
            "Total number of signals sent to the backend",
        )
        .expect("valid metric definition");
        let signals_dropped = IntCounter::new(
            "axom_signals_dropped_total",
            "Total number of signals dropped",
        )
        .expect("valid metric definition");
        let requests_total = IntCounterVec::new(
            Opts::new("axom_requests_total", "Total intercepted AI requests"),
            &["provider", "operation", "status"],
        )
        .expect("valid metric definition");

        registry
            .register(Box::new(signals_sent.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(signals_dropped.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(requests_total.clone()))
            .expect("metric registration");

        Self {
            registry,
            signals_sent,
            signals_dropped,
            requests_total,
        }
    }

    /// Render all collectors in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
