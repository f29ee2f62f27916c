//! Metric and alert collaborators.
//!
//! The engine only ever calls these as fire-and-forget sinks. Every consumer
//! takes them as `Arc<dyn …>` with a no-op or log-only default.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

/// Destination for metric samples
pub trait MetricSink: Send + Sync {
    /// Record an operation duration
    fn record_time(&self, name: &str, duration: Duration);

    /// Record one occurrence, tagged with its outcome
    fn record_count(&self, name: &str, success: bool);

    /// Record a point-in-time value
    fn record_gauge(&self, name: &str, value: f64);
}

/// Destination for alerts
pub trait AlertSink: Send + Sync {
    /// Raise an alert identified by `key`
    fn alert(&self, key: &str, message: &str, cause: Option<&str>);
}

/// Metric sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricSink for NoopMetrics {
    fn record_time(&self, _name: &str, _duration: Duration) {}
    fn record_count(&self, _name: &str, _success: bool) {}
    fn record_gauge(&self, _name: &str, _value: f64) {}
}

/// Alert sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAlerts;

impl AlertSink for NoopAlerts {
    fn alert(&self, _key: &str, _message: &str, _cause: Option<&str>) {}
}

/// Alert sink that writes a warning log line per alert
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alert(&self, key: &str, message: &str, cause: Option<&str>) {
        match cause {
            Some(cause) => warn!(alert = key, cause, "{}", message),
            None => warn!(alert = key, "{}", message),
        }
    }
}

/// Shared no-op metric sink
pub fn noop_metrics() -> Arc<dyn MetricSink> {
    Arc::new(NoopMetrics)
}

/// Shared log-only alert sink
pub fn log_alerts() -> Arc<dyn AlertSink> {
    Arc::new(LogAlerts)
}
