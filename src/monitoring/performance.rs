//! Per-cache operation timing and the reports built from it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;

/// Running operation counters for one registered cache.
///
/// Only [`PerformanceMetrics::reset`] clears them.
#[derive(Debug, Default)]
pub struct PerformanceMetrics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    total_response_us: AtomicU64,
    max_response_us: AtomicU64,
}

impl PerformanceMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one operation
    pub fn record(&self, duration: Duration, success: bool) {
        let us = duration.as_micros() as u64;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_response_us.fetch_add(us, Ordering::Relaxed);
        self.max_response_us.fetch_max(us, Ordering::Relaxed);
    }

    /// Operations recorded
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Failed operations recorded
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// errors / requests, 0 with no requests
    pub fn error_rate(&self) -> f64 {
        let requests = self.request_count();
        if requests == 0 {
            0.0
        } else {
            self.error_count() as f64 / requests as f64
        }
    }

    /// Mean response time
    pub fn average_response_time(&self) -> Duration {
        let requests = self.request_count();
        if requests == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.total_response_us.load(Ordering::Relaxed) / requests)
    }

    /// Slowest response seen
    pub fn max_response_time(&self) -> Duration {
        Duration::from_micros(self.max_response_us.load(Ordering::Relaxed))
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.request_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.total_response_us.store(0, Ordering::Relaxed);
        self.max_response_us.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time performance report for one cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePerformanceReport {
    /// Registered cache name
    pub cache_name: String,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub error_rate: f64,
    /// Mean response time in milliseconds
    pub avg_response_time_ms: f64,
    /// Slowest response time in milliseconds
    pub max_response_time_ms: f64,
    /// Operations recorded through `record_operation`
    pub request_count: u64,
    pub size: u64,
    pub eviction_count: u64,
    pub generated_at: DateTime<Utc>,
}

impl CachePerformanceReport {
    /// Combine pulled stats with recorded timing
    pub fn new(cache_name: &str, stats: &CacheStats, perf: &PerformanceMetrics) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            hit_rate: stats.hit_rate(),
            miss_rate: stats.miss_rate(),
            error_rate: perf.error_rate(),
            avg_response_time_ms: perf.average_response_time().as_secs_f64() * 1000.0,
            max_response_time_ms: perf.max_response_time().as_secs_f64() * 1000.0,
            request_count: perf.request_count(),
            size: stats.size,
            eviction_count: stats.eviction_count,
            generated_at: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_rates() {
        let perf = PerformanceMetrics::new();
        perf.record(Duration::from_millis(10), true);
        perf.record(Duration::from_millis(30), false);

        assert_eq!(perf.request_count(), 2);
        assert_eq!(perf.error_count(), 1);
        assert!((perf.error_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(perf.average_response_time(), Duration::from_millis(20));
        assert_eq!(perf.max_response_time(), Duration::from_millis(30));
    }

    #[test]
    fn test_reset_is_explicit() {
        let perf = PerformanceMetrics::new();
        perf.record(Duration::from_millis(5), false);
        perf.reset();
        assert_eq!(perf.request_count(), 0);
        assert_eq!(perf.error_rate(), 0.0);
        assert_eq!(perf.max_response_time(), Duration::ZERO);
    }

    #[test]
    fn test_concurrent_max() {
        let perf = std::sync::Arc::new(PerformanceMetrics::new());
        let handles: Vec<_> = (1..=8u64)
            .map(|i| {
                let perf = perf.clone();
                std::thread::spawn(move || perf.record(Duration::from_millis(i), true))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(perf.max_response_time(), Duration::from_millis(8));
        assert_eq!(perf.request_count(), 8);
    }

    #[test]
    fn test_report_combines_sources() {
        let stats = CacheStats {
            hit_count: 3,
            miss_count: 1,
            size: 10,
            eviction_count: 2,
            ..Default::default()
        };
        let perf = PerformanceMetrics::new();
        perf.record(Duration::from_millis(4), true);

        let report = CachePerformanceReport::new("users", &stats, &perf);
        assert_eq!(report.cache_name, "users");
        assert!((report.hit_rate - 0.75).abs() < f64::EPSILON);
        assert!((report.miss_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(report.request_count, 1);
        assert_eq!(report.size, 10);
        assert!((report.avg_response_time_ms - 4.0).abs() < 1e-9);
    }
}
