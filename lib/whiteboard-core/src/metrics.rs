//! Prometheus metrics for the registrar

use crate::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;
use whiteboard_api::{EndpointFailure, RuntimeSnapshot};

/// Counters and gauges describing reconciliation activity
#[derive(Clone)]
pub struct RegistrarMetrics {
    /// Wirings (re)computed
    pub refresh_total: IntCounter,
    /// Failed wirings by failure code
    pub endpoint_failures_total: IntCounterVec,
    /// Registration events that changed the runtime
    pub changes_total: IntCounter,
    pub endpoints_published: IntGauge,
    pub endpoints_failed: IntGauge,
    pub handlers_bound: IntGauge,
    pub handlers_failed: IntGauge,
    pub registry: Arc<Registry>,
}

impl RegistrarMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let refresh_total = IntCounter::new(
            "whiteboard_refresh_total",
            "Total endpoint wirings computed",
        )?;

        let endpoint_failures_total = IntCounterVec::new(
            Opts::new(
                "whiteboard_endpoint_failures_total",
                "Failed endpoint wirings by failure code",
            ),
            &["code"],
        )?;

        let changes_total = IntCounter::new(
            "whiteboard_changes_total",
            "Registration events applied",
        )?;

        let endpoints_published = IntGauge::new(
            "whiteboard_endpoints_published",
            "Endpoints currently published",
        )?;
        let endpoints_failed = IntGauge::new(
            "whiteboard_endpoints_failed",
            "Implementors whose last wiring failed",
        )?;
        let handlers_bound = IntGauge::new(
            "whiteboard_handlers_bound",
            "Handlers with a bound instance",
        )?;
        let handlers_failed = IntGauge::new(
            "whiteboard_handlers_failed",
            "Handlers reported as failed",
        )?;

        registry.register(Box::new(refresh_total.clone()))?;
        registry.register(Box::new(endpoint_failures_total.clone()))?;
        registry.register(Box::new(changes_total.clone()))?;
        registry.register(Box::new(endpoints_published.clone()))?;
        registry.register(Box::new(endpoints_failed.clone()))?;
        registry.register(Box::new(handlers_bound.clone()))?;
        registry.register(Box::new(handlers_failed.clone()))?;

        Ok(Self {
            refresh_total,
            endpoint_failures_total,
            changes_total,
            endpoints_published,
            endpoints_failed,
            handlers_bound,
            handlers_failed,
            registry,
        })
    }

    pub(crate) fn record_failure(&self, code: EndpointFailure) {
        self.endpoint_failures_total
            .with_label_values(&[code.as_str()])
            .inc();
    }

    /// Set the gauges from a snapshot
    pub(crate) fn observe(&self, snapshot: &RuntimeSnapshot) {
        self.endpoints_published.set(snapshot.endpoints.len() as i64);
        self.endpoints_failed.set(snapshot.failed_endpoints.len() as i64);
        self.handlers_bound.set(snapshot.handlers.len() as i64);
        self.handlers_failed.set(snapshot.failed_handlers.len() as i64);
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
