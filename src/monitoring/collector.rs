//! Metrics Collector
//!
//! In-process metric sink with lock-free counters. Handy for tests, the demo
//! binary and embedding applications that scrape values themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::sink::MetricSink;

/// Success/failure counter
#[derive(Debug, Default)]
pub struct Counter {
    success: AtomicU64,
    failure: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the bucket matching `success`
    pub fn inc(&self, success: bool) {
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Successful occurrences
    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    /// Failed occurrences
    pub fn failure(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }

    /// All occurrences
    pub fn total(&self) -> u64 {
        self.success() + self.failure()
    }

    /// Reset to zero
    pub fn reset(&self) {
        self.success.store(0, Ordering::Relaxed);
        self.failure.store(0, Ordering::Relaxed);
    }
}

/// Floating point gauge stored as raw bits
#[derive(Debug, Default)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    /// Create a new gauge
    pub fn new() -> Self {
        Self::default()
    }

    /// Set value
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Duration accumulator
#[derive(Debug, Default)]
pub struct Timer {
    count: AtomicU64,
    total_us: AtomicU64,
    max_us: AtomicU64,
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one duration
    pub fn observe(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    /// Number of samples
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean sample
    pub fn average(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.total_us.load(Ordering::Relaxed) / count)
    }

    /// Largest sample
    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_us.load(Ordering::Relaxed))
    }
}

/// In-memory metric sink
#[derive(Default)]
pub struct MemoryMetrics {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
    gauges: RwLock<HashMap<String, Arc<Gauge>>>,
    timers: RwLock<HashMap<String, Arc<Timer>>>,
}

/// Read-through then write-lock insert, shared by the three metric maps
fn get_or_create<T: Default>(map: &RwLock<HashMap<String, Arc<T>>>, name: &str) -> Arc<T> {
    if let Some(existing) = map.read().get(name) {
        return Arc::clone(existing);
    }
    let mut guard = map.write();
    Arc::clone(guard.entry(name.to_string()).or_default())
}

impl MemoryMetrics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a counter
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        get_or_create(&self.counters, name)
    }

    /// Get or create a gauge
    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        get_or_create(&self.gauges, name)
    }

    /// Get or create a timer
    pub fn timer(&self, name: &str) -> Arc<Timer> {
        get_or_create(&self.timers, name)
    }

    /// Current gauge value, if the gauge was ever set
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.read().get(name).map(|g| g.get())
    }

    /// Current counter total, 0 if never incremented
    pub fn count(&self, name: &str) -> u64 {
        self.counters.read().get(name).map(|c| c.total()).unwrap_or(0)
    }

    /// Snapshot of all counters as (success, failure)
    pub fn counters(&self) -> HashMap<String, (u64, u64)> {
        self.counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), (v.success(), v.failure())))
            .collect()
    }

    /// Snapshot of all gauges
    pub fn gauges(&self) -> HashMap<String, f64> {
        self.gauges
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.get()))
            .collect()
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in self.counters.read().values() {
            counter.reset();
        }
    }

    /// Export metrics as sorted `name value` lines
    pub fn export_text(&self) -> String {
        let mut lines = Vec::new();

        for (name, counter) in self.counters.read().iter() {
            lines.push(format!("{}{{outcome=\"success\"}} {}", name, counter.success()));
            lines.push(format!("{}{{outcome=\"failure\"}} {}", name, counter.failure()));
        }
        for (name, gauge) in self.gauges.read().iter() {
            lines.push(format!("{} {}", name, gauge.get()));
        }
        for (name, timer) in self.timers.read().iter() {
            lines.push(format!("{}_count {}", name, timer.count()));
            lines.push(format!("{}_avg_ms {}", name, timer.average().as_secs_f64() * 1000.0));
            lines.push(format!("{}_max_ms {}", name, timer.max().as_secs_f64() * 1000.0));
        }

        lines.sort();
        let mut output = lines.join("\n");
        output.push('\n');
        output
    }
}

impl MetricSink for MemoryMetrics {
    fn record_time(&self, name: &str, duration: Duration) {
        self.timer(name).observe(duration);
    }

    fn record_count(&self, name: &str, success: bool) {
        self.counter(name).inc(success);
    }

    fn record_gauge(&self, name: &str, value: f64) {
        self.gauge(name).set(value);
    }
}

// =============================================================================
// Tests
// =============================================================================
