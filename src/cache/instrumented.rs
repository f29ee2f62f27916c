//! Instrumented tier: tracing spans, metric samples and monitor feed around
//! every operation of a wrapped tier.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{field, info_span, warn, Instrument, Span};

use super::config::CacheConfig;
use super::tier::{CacheProbe, Tier};
use super::types::{CacheStats, Expiry, Ttl};
use crate::error::Result;
use crate::monitoring::{noop_metrics, CacheMonitor, MetricSink};

/// Tier decorator that observes every call
pub struct Instrumented<T> {
    inner: T,
    name: String,
    metrics: Arc<dyn MetricSink>,
    monitor: Option<Arc<CacheMonitor>>,
    metrics_enabled: bool,
    trace_enabled: bool,
}

/// Builder for [`Instrumented`]
pub struct InstrumentedBuilder<T> {
    inner: T,
    name: String,
    metrics: Arc<dyn MetricSink>,
    monitor: Option<Arc<CacheMonitor>>,
    metrics_enabled: bool,
    trace_enabled: bool,
}

impl<T> InstrumentedBuilder<T> {
    /// Name used in span fields, metric names and monitor records
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Metric destination
    pub fn metrics(mut self, metrics: Arc<dyn MetricSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Feed every operation into a monitor
    pub fn monitor(mut self, monitor: Arc<CacheMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Take the metrics and trace toggles from a cache configuration
    pub fn config(mut self, config: &CacheConfig) -> Self {
        self.metrics_enabled = config.metrics_enabled;
        self.trace_enabled = config.trace_enabled;
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn trace_enabled(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    pub fn build(self) -> Instrumented<T> {
        Instrumented {
            inner: self.inner,
            name: self.name,
            metrics: self.metrics,
            monitor: self.monitor,
            metrics_enabled: self.metrics_enabled,
            trace_enabled: self.trace_enabled,
        }
    }
}

impl<T> Instrumented<T>
where
    T: Tier,
{
    /// Start building a decorator around `inner`
    pub fn builder(inner: T) -> InstrumentedBuilder<T> {
        InstrumentedBuilder {
            inner,
            name: "cache".to_string(),
            metrics: noop_metrics(),
            monitor: None,
            metrics_enabled: true,
            trace_enabled: true,
        }
    }

    /// Wrapped tier
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Cache name
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn observe<R, F>(&self, op: &'static str, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>> + Send,
    {
        let span = if self.trace_enabled {
            info_span!("cache_op", cache = %self.name, op, success = field::Empty)
        } else {
            Span::none()
        };

        let start = Instant::now();
        let result = fut.instrument(span.clone()).await;
        let elapsed = start.elapsed();
        let success = result.is_ok();
        span.record("success", success);

        if self.metrics_enabled {
            let base = format!("{}.{}", self.name, op);
            self.metrics.record_time(&base, elapsed);
            self.metrics.record_count(&format!("{}.count", base), success);
        }
        if let Some(monitor) = &self.monitor {
            monitor.record_operation(&self.name, op, elapsed, success);
        }
        if let Err(e) = &result {
            warn!(cache = %self.name, op, "Cache operation failed: {}", e);
        }
        result
    }
}

#[async_trait]
impl<T> CacheProbe for Instrumented<T>
where
    T: Tier,
{
    async fn stats(&self) -> Result<CacheStats> {
        self.inner.stats().await
    }

    async fn health_check(&self) -> Result<bool> {
        self.observe("health_check", self.inner.health_check()).await
    }
}

#[async_trait]
impl<T> Tier for Instrumented<T>
where
    T: Tier,
{
    type Value = T::Value;

    async fn get(&self, key: &str) -> Result<Option<Self::Value>> {
        self.observe("get", self.inner.get(key)).await
    }

    async fn put(&self, key: &str, value: Self::Value, expiry: Expiry) -> Result<()> {
        self.observe("put", self.inner.put(key, value, expiry)).await
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        self.observe("evict", self.inner.evict(key)).await
    }

    async fn evict_all(&self, keys: &[String]) -> Result<u64> {
        self.observe("evict_all", self.inner.evict_all(keys)).await
    }

    async fn evict_by_pattern(&self, pattern: &str) -> Result<u64> {
        self.observe("evict_by_pattern", self.inner.evict_by_pattern(pattern)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.observe("exists", self.inner.exists(key)).await
    }

    async fn expire(&self, key: &str, expiry: Expiry) -> Result<bool> {
        self.observe("expire", self.inner.expire(key, expiry)).await
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        self.observe("ttl", self.inner.ttl(key)).await
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Self::Value>> {
        self.observe("multi_get", self.inner.multi_get(keys)).await
    }

    async fn multi_put(&self, entries: HashMap<String, Self::Value>, expiry: Expiry) -> Result<()> {
        self.observe("multi_put", self.inner.multi_put(entries, expiry)).await
    }

    async fn clear(&self) -> Result<()> {
        self.observe("clear", self.inner.clear()).await
    }
}

// =============================================================================
// Tests
// =============================================================================
