//! Cache Monitor
//!
//! Periodically samples every registered cache, publishes derived gauges and
//! raises threshold alerts. Three loops run independently:
//!
//! - metrics collection (`monitor_interval`)
//! - health checks (`health_check_interval`)
//! - alert evaluation (`alert_interval`)
//!
//! Caches are held by `Weak` reference and probed concurrently with a
//! per-cache timeout, so one dead or stalled cache never blocks the others.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::performance::{CachePerformanceReport, PerformanceMetrics};
use super::sink::{log_alerts, noop_metrics, AlertSink, MetricSink};
use crate::cache::{CacheProbe, CacheStats};
use crate::error::{Error, Result};

/// Alert raised when a cache reports unhealthy
pub const ALERT_HEALTH_FAILED: &str = "cache.health.failed";
/// Alert raised when the hit rate drops below the floor
pub const ALERT_HIT_RATE_LOW: &str = "cache.hit_rate.low";
/// Alert raised when the error rate exceeds the ceiling
pub const ALERT_ERROR_RATE_HIGH: &str = "cache.error_rate.high";
/// Alert raised when the mean response time exceeds the ceiling
pub const ALERT_RESPONSE_TIME_HIGH: &str = "cache.response_time.high";

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Master switch for loops and operation recording
    pub enabled: bool,
    /// Metrics collection period
    #[serde(with = "humantime_serde")]
    pub monitor_interval: Duration,
    /// Health check period
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    /// Alert evaluation period
    #[serde(with = "humantime_serde")]
    pub alert_interval: Duration,
    /// Alert when the hit rate falls below this
    pub hit_rate_threshold: f64,
    /// Alert when the error rate rises above this
    pub error_rate_threshold: f64,
    /// Alert when the mean response time rises above this
    #[serde(with = "humantime_serde")]
    pub response_time_threshold: Duration,
    pub performance_monitoring_enabled: bool,
    pub health_check_enabled: bool,
    pub alerts_enabled: bool,
    /// Prefix of every emitted metric name
    pub metric_prefix: String,
    /// Upper bound on a single stats or health probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitor_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(60),
            alert_interval: Duration::from_secs(300),
            hit_rate_threshold: 0.8,
            error_rate_threshold: 0.05,
            response_time_threshold: Duration::from_millis(1000),
            performance_monitoring_enabled: true,
            health_check_enabled: true,
            alerts_enabled: true,
            metric_prefix: "cache".to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, interval) in [
            ("monitor_interval", self.monitor_interval),
            ("health_check_interval", self.health_check_interval),
            ("alert_interval", self.alert_interval),
            ("probe_timeout", self.probe_timeout),
        ] {
            if interval.is_zero() {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }
        for (name, value) in [
            ("hit_rate_threshold", self.hit_rate_threshold),
            ("error_rate_threshold", self.error_rate_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be between 0.0 and 1.0", name)));
            }
        }
        Ok(())
    }
}

/// An alert fired by [`CacheMonitor::check_alerts`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorAlert {
    pub cache_name: String,
    pub key: &'static str,
    pub message: String,
}

/// Periodic sampler and alerting loop over registered caches
pub struct CacheMonitor {
    config: MonitorConfig,
    caches: DashMap<String, Weak<dyn CacheProbe>>,
    performance: DashMap<String, Arc<PerformanceMetrics>>,
    metrics: Arc<dyn MetricSink>,
    alerts: Arc<dyn AlertSink>,
    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheMonitor {
    /// Create a monitor with a no-op metric sink and log-only alerts
    pub fn new(config: MonitorConfig) -> Result<Self> {
        Self::with_sinks(config, noop_metrics(), log_alerts())
    }

    /// Create a monitor with explicit collaborators
    pub fn with_sinks(
        config: MonitorConfig,
        metrics: Arc<dyn MetricSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            caches: DashMap::new(),
            performance: DashMap::new(),
            metrics,
            alerts,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Register a cache under `name`; the monitor keeps only a weak reference
    pub fn register<C>(&self, name: impl Into<String>, cache: &Arc<C>)
    where
        C: CacheProbe + 'static,
    {
        let name = name.into();
        let weak: Weak<C> = Arc::downgrade(cache);
        let weak: Weak<dyn CacheProbe> = weak;
        self.caches.insert(name.clone(), weak);
        self.performance
            .entry(name.clone())
            .or_insert_with(|| Arc::new(PerformanceMetrics::new()));
        info!(cache = %name, "Registered cache for monitoring");
    }

    /// Stop monitoring `name`
    pub fn unregister(&self, name: &str) {
        self.caches.remove(name);
        self.performance.remove(name);
        info!(cache = %name, "Unregistered cache from monitoring");
    }

    /// Names of currently registered caches
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Record one operation against a cache
    pub fn record_operation(&self, cache_name: &str, operation: &str, duration: Duration, success: bool) {
        if !self.config.enabled {
            return;
        }
        let perf = self
            .performance
            .entry(cache_name.to_string())
            .or_insert_with(|| Arc::new(PerformanceMetrics::new()))
            .clone();
        perf.record(duration, success);

        let base = format!("{}.{}.{}", self.config.metric_prefix, cache_name, operation);
        self.metrics.record_time(&base, duration);
        self.metrics.record_count(&format!("{}.count", base), success);
        if !success {
            self.metrics.record_count(&format!("{}.error", base), false);
        }
    }

    /// Timing counters of a cache
    pub fn performance(&self, cache_name: &str) -> Option<Arc<PerformanceMetrics>> {
        self.performance.get(cache_name).map(|p| Arc::clone(p.value()))
    }

    /// Build a report for one cache, `None` if it is gone or its stats failed
    pub async fn performance_report(&self, cache_name: &str) -> Option<CachePerformanceReport> {
        let cache = self.caches.get(cache_name)?.upgrade()?;
        let stats = self.probe_stats(cache_name, cache.as_ref()).await?;
        Some(self.report(cache_name, &stats))
    }

    /// Reports for every live cache
    pub async fn performance_reports(&self) -> Vec<CachePerformanceReport> {
        let caches = self.live_caches();
        let probes = caches.iter().map(|(name, cache)| async move {
            self.probe_stats(name, cache.as_ref())
                .await
                .map(|stats| self.report(name, &stats))
        });
        join_all(probes).await.into_iter().flatten().collect()
    }

    /// Publish derived gauges for every live cache
    #[instrument(skip(self))]
    pub async fn collect_metrics(&self) {
        let caches = self.live_caches();
        let probes = caches.iter().map(|(name, cache)| async move {
            if let Some(stats) = self.probe_stats(name, cache.as_ref()).await {
                let report = self.report(name, &stats);
                self.publish(&report);
            }
        });
        join_all(probes).await;
        debug!(caches = caches.len(), "Collected cache metrics");
    }

    /// Probe health of every live cache, alerting on failures
    #[instrument(skip(self))]
    pub async fn perform_health_checks(&self) -> HashMap<String, bool> {
        let caches = self.live_caches();
        let probes = caches.iter().map(|(name, cache)| async move {
            let outcome = self.probe_health(name, cache.as_ref()).await;
            let healthy = matches!(outcome, Ok(true));
            self.metrics.record_gauge(
                &format!("{}.{}.healthy", self.config.metric_prefix, name),
                if healthy { 1.0 } else { 0.0 },
            );
            if !healthy {
                let cause = outcome.err();
                self.alerts.alert(
                    ALERT_HEALTH_FAILED,
                    &format!("Cache {} health check failed", name),
                    cause.as_deref(),
                );
            }
            (name.clone(), healthy)
        });
        join_all(probes).await.into_iter().collect()
    }

    /// Compare every live cache against the thresholds and alert
    #[instrument(skip(self))]
    pub async fn check_alerts(&self) -> Vec<MonitorAlert> {
        let caches = self.live_caches();
        let probes = caches.iter().map(|(name, cache)| async move {
            match self.probe_stats(name, cache.as_ref()).await {
                Some(stats) => self.evaluate(name, &stats),
                None => Vec::new(),
            }
        });
        let fired: Vec<MonitorAlert> = join_all(probes).await.into_iter().flatten().collect();
        for alert in &fired {
            self.alerts.alert(alert.key, &alert.message, None);
        }
        fired
    }

    /// Reset timing counters of one cache
    pub fn reset_metrics(&self, cache_name: &str) {
        if let Some(perf) = self.performance.get(cache_name) {
            perf.reset();
            info!(cache = %cache_name, "Reset performance metrics");
        }
    }

    /// Reset timing counters of every cache
    pub fn reset_all(&self) {
        for perf in self.performance.iter() {
            perf.reset();
        }
    }

    /// Spawn the enabled monitoring loops.
    ///
    /// Only the first call spawns anything; a monitor that has been shut down
    /// cannot be restarted.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("Cache monitoring disabled");
            return;
        }
        if self.shutdown.is_cancelled() {
            warn!("Cache monitor already shut down, not starting");
            return;
        }
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("Cache monitor already started");
            return;
        }
        if self.config.performance_monitoring_enabled {
            self.spawn_loop("metrics", self.config.monitor_interval, |m| async move {
                m.collect_metrics().await
            });
        }
        if self.config.health_check_enabled {
            self.spawn_loop("health", self.config.health_check_interval, |m| async move {
                m.perform_health_checks().await;
            });
        }
        if self.config.alerts_enabled {
            self.spawn_loop("alerts", self.config.alert_interval, |m| async move {
                m.check_alerts().await;
            });
        }
        info!(
            monitor_interval = ?self.config.monitor_interval,
            alert_interval = ?self.config.alert_interval,
            "Cache monitor started"
        );
    }

    /// Stop all loops and wait for them to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Monitor task ended abnormally: {}", e);
            }
        }
        info!("Cache monitor stopped");
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let monitor = Arc::clone(self);
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately; start one period in
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => tick(Arc::clone(&monitor)).await,
                }
            }
            debug!(task = name, "Monitor loop exited");
        });
        self.tasks.lock().push(handle);
    }

    /// Upgrade every registration, dropping the ones whose cache is gone
    fn live_caches(&self) -> Vec<(String, Arc<dyn CacheProbe>)> {
        let mut live = Vec::new();
        let mut dead = Vec::new();
        for entry in self.caches.iter() {
            match entry.value().upgrade() {
                Some(cache) => live.push((entry.key().clone(), cache)),
                None => dead.push(entry.key().clone()),
            }
        }
        for name in dead {
            debug!(cache = %name, "Cache dropped, removing registration");
            self.caches.remove(&name);
            self.performance.remove(&name);
        }
        live
    }

    async fn probe_stats(&self, name: &str, cache: &dyn CacheProbe) -> Option<CacheStats> {
        match tokio::time::timeout(self.config.probe_timeout, cache.stats()).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                warn!(cache = %name, "Failed to read cache stats: {}", e);
                None
            }
            Err(_) => {
                warn!(cache = %name, timeout = ?self.config.probe_timeout, "Cache stats probe timed out");
                None
            }
        }
    }

    async fn probe_health(&self, name: &str, cache: &dyn CacheProbe) -> std::result::Result<bool, String> {
        match tokio::time::timeout(self.config.probe_timeout, cache.health_check()).await {
            Ok(Ok(healthy)) => Ok(healthy),
            Ok(Err(e)) => {
                warn!(cache = %name, "Health check errored: {}", e);
                Err(e.to_string())
            }
            Err(_) => {
                warn!(cache = %name, "Health check timed out");
                Err(format!("timed out after {:?}", self.config.probe_timeout))
            }
        }
    }

    fn report(&self, name: &str, stats: &CacheStats) -> CachePerformanceReport {
        let perf = self
            .performance
            .get(name)
            .map(|p| Arc::clone(p.value()))
            .unwrap_or_default();
        CachePerformanceReport::new(name, stats, &perf)
    }

    fn publish(&self, report: &CachePerformanceReport) {
        let prefix = format!("{}.{}", self.config.metric_prefix, report.cache_name);
        let gauges = [
            ("hit_rate", report.hit_rate),
            ("miss_rate", report.miss_rate),
            ("error_rate", report.error_rate),
            ("avg_response_time", report.avg_response_time_ms),
            ("max_response_time", report.max_response_time_ms),
            ("size", report.size as f64),
            ("eviction_count", report.eviction_count as f64),
        ];
        for (suffix, value) in gauges {
            self.metrics.record_gauge(&format!("{}.{}", prefix, suffix), value);
        }
    }

    fn evaluate(&self, name: &str, stats: &CacheStats) -> Vec<MonitorAlert> {
        let report = self.report(name, stats);
        let mut fired = Vec::new();

        // No traffic means no meaningful hit rate
        if stats.request_count() > 0 && report.hit_rate < self.config.hit_rate_threshold {
            fired.push(MonitorAlert {
                cache_name: name.to_string(),
                key: ALERT_HIT_RATE_LOW,
                message: format!(
                    "Cache {} hit rate {:.2}% below threshold {:.2}%",
                    name,
                    report.hit_rate * 100.0,
                    self.config.hit_rate_threshold * 100.0
                ),
            });
        }
        if report.error_rate > self.config.error_rate_threshold {
            fired.push(MonitorAlert {
                cache_name: name.to_string(),
                key: ALERT_ERROR_RATE_HIGH,
                message: format!(
                    "Cache {} error rate {:.2}% above threshold {:.2}%",
                    name,
                    report.error_rate * 100.0,
                    self.config.error_rate_threshold * 100.0
                ),
            });
        }
        let threshold_ms = self.config.response_time_threshold.as_secs_f64() * 1000.0;
        if report.avg_response_time_ms > threshold_ms {
            fired.push(MonitorAlert {
                cache_name: name.to_string(),
                key: ALERT_RESPONSE_TIME_HIGH,
                message: format!(
                    "Cache {} average response time {:.1}ms above threshold {:.1}ms",
                    name, report.avg_response_time_ms, threshold_ms
                ),
            });
        }
        fired
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::MemoryMetrics;
    use async_trait::async_trait;

    struct FakeCache {
        stats: CacheStats,
        healthy: bool,
        hang: bool,
    }

    impl FakeCache {
        fn new(hit: u64, miss: u64) -> Arc<Self> {
            Arc::new(Self {
                stats: CacheStats {
                    hit_count: hit,
                    miss_count: miss,
                    size: hit,
                    ..Default::default()
                },
                healthy: true,
                hang: false,
            })
        }
    }

    #[async_trait]
    impl CacheProbe for FakeCache {
        async fn stats(&self) -> Result<CacheStats> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.stats)
        }

        async fn health_check(&self) -> Result<bool> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.healthy)
        }
    }

    #[derive(Default)]
    struct RecordingAlerts {
        fired: Mutex<Vec<(String, Option<String>)>>,
    }

    impl AlertSink for RecordingAlerts {
        fn alert(&self, key: &str, _message: &str, cause: Option<&str>) {
            self.fired.lock().push((key.to_string(), cause.map(str::to_string)));
        }
    }

    fn make_monitor(config: MonitorConfig) -> (Arc<CacheMonitor>, Arc<MemoryMetrics>, Arc<RecordingAlerts>) {
        let metrics = Arc::new(MemoryMetrics::new());
        let alerts = Arc::new(RecordingAlerts::default());
        let monitor = CacheMonitor::with_sinks(config, metrics.clone(), alerts.clone()).unwrap();
        (Arc::new(monitor), metrics, alerts)
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = MonitorConfig::default();
        assert_eq!(config.monitor_interval, Duration::from_secs(60));
        assert_eq!(config.alert_interval, Duration::from_secs(300));
        assert_eq!(config.hit_rate_threshold, 0.8);
        assert_eq!(config.error_rate_threshold, 0.05);
        assert!(config.validate().is_ok());

        let bad = MonitorConfig {
            hit_rate_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_record_operation_emits_metrics() {
        let (monitor, metrics, _) = make_monitor(MonitorConfig::default());
        monitor.record_operation("users", "get", Duration::from_millis(2), true);
        monitor.record_operation("users", "get", Duration::from_millis(4), false);

        assert_eq!(metrics.count("cache.users.get.count"), 2);
        assert_eq!(metrics.count("cache.users.get.error"), 1);
        let perf = monitor.performance("users").unwrap();
        assert_eq!(perf.request_count(), 2);
        assert_eq!(perf.error_count(), 1);
    }

    #[tokio::test]
    async fn test_collect_metrics_publishes_gauges() {
        let (monitor, metrics, _) = make_monitor(MonitorConfig::default());
        let cache = FakeCache::new(3, 1);
        monitor.register("users", &cache);

        monitor.collect_metrics().await;
        assert_eq!(metrics.gauge_value("cache.users.hit_rate"), Some(0.75));
        assert_eq!(metrics.gauge_value("cache.users.size"), Some(3.0));
    }

    #[tokio::test]
    async fn test_low_hit_rate_and_high_error_rate_alerts() {
        let (monitor, _, alerts) = make_monitor(MonitorConfig::default());
        let cache = FakeCache::new(1, 9);
        monitor.register("users", &cache);
        monitor.record_operation("users", "get", Duration::from_millis(1), false);

        let fired = monitor.check_alerts().await;
        let keys: Vec<&str> = fired.iter().map(|a| a.key).collect();
        assert!(keys.contains(&ALERT_HIT_RATE_LOW));
        assert!(keys.contains(&ALERT_ERROR_RATE_HIGH));
        assert!(!keys.contains(&ALERT_RESPONSE_TIME_HIGH));
        assert_eq!(alerts.fired.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_idle_cache_does_not_alert_on_hit_rate() {
        let (monitor, _, _) = make_monitor(MonitorConfig::default());
        let cache = FakeCache::new(0, 0);
        monitor.register("idle", &cache);
        assert!(monitor.check_alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_cache_does_not_block_others() {
        let config = MonitorConfig {
            probe_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let (monitor, metrics, alerts) = make_monitor(config);
        let good = FakeCache::new(5, 0);
        let stalled = Arc::new(FakeCache {
            stats: CacheStats::default(),
            healthy: true,
            hang: true,
        });
        monitor.register("good", &good);
        monitor.register("stalled", &stalled);

        let health = monitor.perform_health_checks().await;
        assert_eq!(health.get("good"), Some(&true));
        assert_eq!(health.get("stalled"), Some(&false));
        assert_eq!(metrics.gauge_value("cache.stalled.healthy"), Some(0.0));

        let fired = alerts.fired.lock().clone();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, ALERT_HEALTH_FAILED);
        assert!(fired[0].1.is_some());

        monitor.collect_metrics().await;
        assert_eq!(metrics.gauge_value("cache.good.hit_rate"), Some(1.0));
    }

    #[tokio::test]
    async fn test_dropped_cache_is_unregistered() {
        let (monitor, _, _) = make_monitor(MonitorConfig::default());
        let cache = FakeCache::new(1, 0);
        monitor.register("temp", &cache);
        assert_eq!(monitor.registered(), vec!["temp".to_string()]);

        drop(cache);
        monitor.collect_metrics().await;
        assert!(monitor.registered().is_empty());
        assert!(monitor.performance_report("temp").await.is_none());
        assert!(monitor.performance("temp").is_none());
    }

    #[tokio::test]
    async fn test_reset_metrics() {
        let (monitor, _, _) = make_monitor(MonitorConfig::default());
        monitor.record_operation("users", "put", Duration::from_millis(1), true);
        monitor.reset_metrics("users");
        assert_eq!(monitor.performance("users").unwrap().request_count(), 0);
    }

    #[tokio::test]
    async fn test_loops_run_until_shutdown() {
        let config = MonitorConfig {
            monitor_interval: Duration::from_millis(20),
            health_check_interval: Duration::from_millis(20),
            alert_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let (monitor, metrics, _) = make_monitor(config);
        let cache = FakeCache::new(8, 2);
        monitor.register("users", &cache);

        monitor.start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        monitor.shutdown().await;

        assert_eq!(metrics.gauge_value("cache.users.hit_rate"), Some(0.8));
        assert_eq!(metrics.gauge_value("cache.users.healthy"), Some(1.0));
    }

    #[tokio::test]
    async fn test_start_spawns_loops_once() {
        let (monitor, _, _) = make_monitor(MonitorConfig::default());

        monitor.start();
        monitor.start();
        assert_eq!(monitor.tasks.lock().len(), 3);

        monitor.shutdown().await;
        assert!(monitor.tasks.lock().is_empty());

        monitor.start();
        assert!(monitor.tasks.lock().is_empty());
    }
}
