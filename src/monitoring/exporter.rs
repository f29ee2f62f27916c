//! Prometheus metric sink.
//!
//! Engine metric names are dotted (`cache.users.get`), which Prometheus does
//! not accept as metric names, so each family carries the dotted name in a
//! `name` label instead.

use std::time::Duration;

use prometheus::{Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use super::sink::MetricSink;
use crate::error::{Error, Result};

/// Metric sink backed by a `prometheus::Registry`
#[derive(Clone)]
pub struct PrometheusSink {
    registry: Registry,
    durations: HistogramVec,
    counts: IntCounterVec,
    gauges: GaugeVec,
}

impl PrometheusSink {
    /// Register the metric families under `namespace` in a fresh registry
    pub fn new(namespace: &str) -> Result<Self> {
        Self::with_registry(namespace, Registry::new())
    }

    /// Register the metric families in an existing registry
    pub fn with_registry(namespace: &str, registry: Registry) -> Result<Self> {
        let durations = HistogramVec::new(
            HistogramOpts::new("operation_duration_seconds", "Cache operation latency")
                .namespace(namespace)
                .buckets(vec![
                    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ]),
            &["name"],
        )
        .map_err(registration_error)?;
        let counts = IntCounterVec::new(
            Opts::new("operations_total", "Cache operations by outcome").namespace(namespace),
            &["name", "outcome"],
        )
        .map_err(registration_error)?;
        let gauges = GaugeVec::new(
            Opts::new("gauge", "Sampled cache gauges").namespace(namespace),
            &["name"],
        )
        .map_err(registration_error)?;

        registry
            .register(Box::new(durations.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(counts.clone()))
            .map_err(registration_error)?;
        registry
            .register(Box::new(gauges.clone()))
            .map_err(registration_error)?;

        Ok(Self {
            registry,
            durations,
            counts,
            gauges,
        })
    }

    /// Underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn export_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Prometheus encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Prometheus output not UTF-8: {}", e)))
    }
}

fn registration_error(e: prometheus::Error) -> Error {
    Error::Config(format!("Prometheus registration failed: {}", e))
}

impl MetricSink for PrometheusSink {
    fn record_time(&self, name: &str, duration: Duration) {
        self.durations
            .with_label_values(&[name])
            .observe(duration.as_secs_f64());
    }

    fn record_count(&self, name: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.counts.with_label_values(&[name, outcome]).inc();
    }

    fn record_gauge(&self, name: &str, value: f64) {
        self.gauges.with_label_values(&[name]).set(value);
    }
}

// =============================================================================
// Tests
// =============================================================================
