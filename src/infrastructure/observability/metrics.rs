//! Prometheus metrics definitions for dataflow
//!
//! All metrics use the `dataflow_` prefix. Nothing is served; the binary logs `render()`.

use prometheus::{
    CounterVec, Gauge, IntCounter, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Successful sink saves by vendor and sink kind
    pub messages_routed_total: CounterVec,
    /// Failed sink saves by sink kind
    pub routing_failures_total: CounterVec,
    /// Destinations that matched no sink kind
    pub unrecognized_destinations_total: IntCounter,
    /// Series excluded because symbol resolution failed
    pub resolution_failures_total: CounterVec,
    /// Streaming reconnection attempts
    pub stream_reconnects_total: CounterVec,
    /// Extractors currently inside their gate
    pub active_extractors: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let messages_routed_total = CounterVec::new(
            Opts::new(
                "dataflow_messages_routed_total",
                "Messages saved to a sink, by vendor and sink kind",
            ),
            &["vendor", "sink"],
        )?;
        registry.register(Box::new(messages_routed_total.clone()))?;

        let routing_failures_total = CounterVec::new(
            Opts::new(
                "dataflow_routing_failures_total",
                "Failed sink saves by sink kind",
            ),
            &["sink"],
        )?;
        registry.register(Box::new(routing_failures_total.clone()))?;

        let unrecognized_destinations_total = IntCounter::with_opts(Opts::new(
            "dataflow_unrecognized_destinations_total",
            "Destinations not matching any sink kind",
        ))?;
        registry.register(Box::new(unrecognized_destinations_total.clone()))?;

        let resolution_failures_total = CounterVec::new(
            Opts::new(
                "dataflow_resolution_failures_total",
                "Series excluded after failed symbol resolution",
            ),
            &["vendor"],
        )?;
        registry.register(Box::new(resolution_failures_total.clone()))?;

        let stream_reconnects_total = CounterVec::new(
            Opts::new(
                "dataflow_stream_reconnects_total",
                "Streaming reconnection attempts",
            ),
            &["vendor"],
        )?;
        registry.register(Box::new(stream_reconnects_total.clone()))?;

        let active_extractors = Gauge::with_opts(Opts::new(
            "dataflow_active_extractors",
            "Extractors currently running inside their gate",
        ))?;
        registry.register(Box::new(active_extractors.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            messages_routed_total,
            routing_failures_total,
            unrecognized_destinations_total,
            resolution_failures_total,
            stream_reconnects_total,
            active_extractors,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_routed(&self, vendor: &str, sink: &str) {
        self.messages_routed_total
            .with_label_values(&[vendor, sink])
            .inc();
    }

    pub fn inc_routing_failure(&self, sink: &str) {
        self.routing_failures_total.with_label_values(&[sink]).inc();
    }

    pub fn inc_resolution_failures(&self, vendor: &str, count: u64) {
        self.resolution_failures_total
            .with_label_values(&[vendor])
            .inc_by(count as f64);
    }

    pub fn inc_reconnects(&self, vendor: &str) {
        self.stream_reconnects_total
            .with_label_values(&[vendor])
            .inc();
    }
}
