//! Cache Observability
//!
//! Metric and alert sinks, health reports and the periodic cache monitor.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            Cache Monitor                                  │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────────┐  │
//! │  │ Metrics loop   │  │ Health loop    │  │ Alert loop                 │  │
//! │  │ (gauges)       │  │ (probe + 1/0)  │  │ (thresholds)               │  │
//! │  └────────────────┘  └────────────────┘  └────────────────────────────┘  │
//! │          │                   │                        │                  │
//! │          └───────────────────┴────────────────────────┘                  │
//! │                              │                                           │
//! │             ┌────────────────┴────────────────┐                          │
//! │             │ MetricSink            AlertSink │                          │
//! │             │ (Memory / Prometheus) (Log)     │                          │
//! │             └─────────────────────────────────┘                          │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

mod collector;
mod exporter;
mod health;
mod monitor;
mod performance;
mod sink;

pub use collector::{Counter, Gauge, MemoryMetrics, Timer};
pub use exporter::PrometheusSink;
pub use health::{HealthCheckResult, HealthResponse, HealthStatus};
pub use monitor::{
    CacheMonitor, MonitorAlert, MonitorConfig, ALERT_ERROR_RATE_HIGH, ALERT_HEALTH_FAILED,
    ALERT_HIT_RATE_LOW, ALERT_RESPONSE_TIME_HIGH,
};
pub use performance::{CachePerformanceReport, PerformanceMetrics};
pub use sink::{log_alerts, noop_metrics, AlertSink, LogAlerts, MetricSink, NoopAlerts, NoopMetrics};
