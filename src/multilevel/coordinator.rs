//! Multi-Level Cache Coordinator
//!
//! Presents an L1/L2 pair as a single [`Tier`].
//!
//! # Read path
//!
//! L1 first; on a miss L2, and an L2 hit is copied back into L1 on the
//! write-back pool without delaying the caller.
//!
//! # Write path
//!
//! - `WriteThrough`: both tiers concurrently, outcome decided by [`WritePolicy`]
//! - `WriteBehind`: both writes queued on the pool, the caller returns at once
//!
//! Consistency is best effort: a queued write-back can land after, and
//! overwrite, a fresher write of the same key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::config::{MultiLevelConfig, TierLevel, WritePolicy, WriteStrategy};
use super::pool::WritebackPool;
use crate::cache::{CacheProbe, CacheStats, Expiry, KeyFormat, SharedTier, Tier, TierRegistry, Ttl};
use crate::error::{Error, Result};
use crate::monitoring::{noop_metrics, HealthCheckResult, HealthResponse, HealthStatus, MetricSink};

/// Metric recording and bounded tier writes, shared with background tasks
#[derive(Clone)]
struct Recorder {
    metrics: Arc<dyn MetricSink>,
    prefix: Arc<str>,
    write_timeout: Option<Duration>,
}

impl Recorder {
    fn count(&self, name: &str, success: bool) {
        self.metrics
            .record_count(&format!("{}.{}", self.prefix, name), success);
    }

    /// Run one tier write under the write timeout, recording its outcome
    async fn write<Fut>(&self, level: TierLevel, key: &str, write: Fut) -> Result<()>
    where
        Fut: Future<Output = Result<()>>,
    {
        let result = match self.write_timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: format!("{} write", level.label()),
                    after: limit,
                }),
            },
            None => write.await,
        };

        match &result {
            Ok(()) => self.count(&format!("{}.write.success", level.label()), true),
            Err(e) => {
                self.count(&format!("{}.write.error", level.label()), false);
                warn!(tier = %level, key, "Tier write failed: {}", e);
            }
        }
        result
    }
}

#[derive(Default)]
struct LoadCounters {
    loads: AtomicU64,
    failures: AtomicU64,
    total_nanos: AtomicU64,
}

impl LoadCounters {
    fn record(&self, elapsed: Duration, success: bool) {
        if success {
            self.loads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.total_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    fn apply(&self, stats: CacheStats) -> CacheStats {
        CacheStats {
            load_count: stats.load_count + self.loads.load(Ordering::Relaxed),
            load_exception_count: stats.load_exception_count + self.failures.load(Ordering::Relaxed),
            total_load_time: stats.total_load_time
                + Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed)),
            ..stats
        }
    }
}

/// Two-tier cache coordinator
pub struct MultiLevelCache<V> {
    l1: SharedTier<V>,
    l2: SharedTier<V>,
    config: MultiLevelConfig,
    keys: KeyFormat,
    recorder: Recorder,
    pool: WritebackPool,
    loads: LoadCounters,
}

/// Builder for [`MultiLevelCache`]
pub struct MultiLevelCacheBuilder<V> {
    l1: SharedTier<V>,
    l2: SharedTier<V>,
    config: MultiLevelConfig,
    metrics: Arc<dyn MetricSink>,
}

impl<V> MultiLevelCacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn config(mut self, config: MultiLevelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validate the configuration and build the coordinator
    pub fn build(self) -> Result<MultiLevelCache<V>> {
        self.config.validate()?;
        let recorder = Recorder {
            metrics: self.metrics,
            prefix: Arc::from(self.config.metric_prefix.as_str()),
            write_timeout: self.config.write_timeout,
        };
        info!(
            strategy = ?self.config.write_strategy,
            policy = ?self.config.write_policy,
            pool_size = self.config.async_pool_size,
            "Multi-level cache created"
        );
        Ok(MultiLevelCache {
            keys: KeyFormat::new(self.config.key_pattern.clone()),
            pool: WritebackPool::new(self.config.metric_prefix.clone(), self.config.async_pool_size),
            l1: self.l1,
            l2: self.l2,
            config: self.config,
            recorder,
            loads: LoadCounters::default(),
        })
    }
}

impl<V> MultiLevelCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start building a coordinator over two tiers
    pub fn builder(l1: SharedTier<V>, l2: SharedTier<V>) -> MultiLevelCacheBuilder<V> {
        MultiLevelCacheBuilder {
            l1,
            l2,
            config: MultiLevelConfig::default(),
            metrics: noop_metrics(),
        }
    }

    /// Start building a coordinator whose tiers are created from `config.l1`
    /// and `config.l2` through `registry`
    pub fn from_registry(
        registry: &TierRegistry<V>,
        config: MultiLevelConfig,
    ) -> Result<MultiLevelCacheBuilder<V>> {
        let l1 = registry.create(&config.l1)?;
        let l2 = registry.create(&config.l2)?;
        Ok(Self::builder(l1, l2).config(config))
    }

    /// Get configuration
    pub fn config(&self) -> &MultiLevelConfig {
        &self.config
    }

    pub fn l1(&self) -> &SharedTier<V> {
        &self.l1
    }

    pub fn l2(&self) -> &SharedTier<V> {
        &self.l2
    }

    /// Background writes not yet reaped
    pub fn pending_writes(&self) -> usize {
        self.pool.pending()
    }

    /// Store a value for `l2_default_ttl`
    pub async fn put_default(&self, key: &str, value: V) -> Result<()> {
        self.put(key, value, Expiry::After(self.config.l2_default_ttl))
            .await
    }

    /// Read `key`, calling `loader` on a miss and storing what it returns
    pub async fn get_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<Option<V>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Option<V>>> + Send,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(Some(value));
        }

        let start = Instant::now();
        match loader().await {
            Ok(loaded) => {
                self.loads.record(start.elapsed(), true);
                if let Some(value) = &loaded {
                    if let Err(e) = self.put_default(key, value.clone()).await {
                        warn!(key, "Failed to store loaded value: {}", e);
                    }
                }
                Ok(loaded)
            }
            Err(e) => {
                self.loads.record(start.elapsed(), false);
                Err(Error::Loader(e))
            }
        }
    }

    /// Per-tier health with an overall status.
    ///
    /// In relaxed mode one tier down is `Degraded`; in strict mode it is
    /// `Unhealthy`.
    pub async fn health_report(&self) -> HealthResponse {
        let (l1, l2) = tokio::join!(self.check_tier(TierLevel::L1), self.check_tier(TierLevel::L2));
        let status = match (l1.status.is_healthy(), l2.status.is_healthy()) {
            (true, true) => HealthStatus::Healthy,
            (false, false) => HealthStatus::Unhealthy,
            _ if self.config.strict_health_check => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        HealthResponse::with_status(status, vec![l1, l2])
    }

    /// Close the write-back pool and wait for queued writes.
    ///
    /// Returns how many queued writes did not complete.
    pub async fn shutdown(&self) -> usize {
        self.pool
            .shutdown(self.config.shutdown_grace, self.config.shutdown_force)
            .await
    }

    fn tier(&self, level: TierLevel) -> &SharedTier<V> {
        match level {
            TierLevel::L1 => &self.l1,
            TierLevel::L2 => &self.l2,
        }
    }

    /// Expiry actually sent to `level`; L1 never outlives `l1_default_ttl`
    fn expiry_for(&self, level: TierLevel, expiry: Expiry) -> Expiry {
        match (level, expiry) {
            (TierLevel::L1, Expiry::After(d)) => Expiry::After(d.min(self.config.l1_default_ttl)),
            _ => expiry,
        }
    }

    async fn check_tier(&self, level: TierLevel) -> HealthCheckResult {
        let start = Instant::now();
        let result = match self.tier(level).health_check().await {
            Ok(true) => HealthCheckResult::healthy(level.label()),
            Ok(false) => HealthCheckResult::unhealthy(level.label(), "reported unhealthy"),
            Err(e) => HealthCheckResult::unhealthy(level.label(), e.to_string()),
        };
        result.with_duration(start.elapsed())
    }

    /// Queue a copy of L2 hits into L1
    fn write_back(&self, entries: HashMap<String, V>) {
        if !self.config.l1_write_back_enabled || entries.is_empty() {
            return;
        }
        let l1 = Arc::clone(&self.l1);
        let recorder = self.recorder.clone();
        let expiry = Expiry::After(self.config.l1_default_ttl);
        let submitted = self.pool.submit(async move {
            if entries.len() == 1 {
                for (key, value) in entries {
                    let _ = recorder.write(TierLevel::L1, &key, l1.put(&key, value, expiry)).await;
                }
            } else {
                let label = format!("{} keys", entries.len());
                let _ = recorder.write(TierLevel::L1, &label, l1.multi_put(entries, expiry)).await;
            }
        });
        if submitted.is_err() {
            debug!("Write-back pool closed, skipping L1 write-back");
        }
    }

    /// Decide a write-through outcome from the per-tier results
    fn settle(&self, key: &str, results: [(TierLevel, Option<Result<()>>); 2]) -> Result<()> {
        let mut succeeded = 0;
        let mut failures = Vec::new();
        for (level, result) in results {
            match result {
                Some(Ok(())) => succeeded += 1,
                Some(Err(e)) => failures.push(format!("{}: {}", level, e)),
                None => {}
            }
        }

        let ok = match self.config.write_policy {
            WritePolicy::AnyTier => succeeded > 0,
            WritePolicy::AllTiers => failures.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::WriteFailed {
                key: key.to_string(),
                failures,
            })
        }
    }

    /// Queue one background write per enabled tier
    fn write_behind<W, Fut>(&self, key: &str, write: W) -> Result<()>
    where
        W: Fn(SharedTier<V>, TierLevel) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        for level in [TierLevel::L1, TierLevel::L2] {
            if !self.config.write_enabled(level) {
                continue;
            }
            let recorder = self.recorder.clone();
            let key = key.to_string();
            let fut = write(Arc::clone(self.tier(level)), level);
            self.pool.submit(async move {
                let _ = recorder.write(level, &key, fut).await;
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl<V> CacheProbe for MultiLevelCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Additive merge of both tiers plus this coordinator's load counters
    async fn stats(&self) -> Result<CacheStats> {
        let (l1, l2) = tokio::join!(self.l1.stats(), self.l2.stats());
        let merged = match (l1, l2) {
            (Ok(a), Ok(b)) => a.merge(&b),
            (Ok(a), Err(e)) | (Err(e), Ok(a)) => {
                warn!("Tier stats unavailable, reporting partial stats: {}", e);
                a
            }
            (Err(e), Err(_)) => return Err(e),
        };
        Ok(self.loads.apply(merged))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.health_report().await.status.is_operational())
    }
}

#[async_trait]
impl<V> Tier for MultiLevelCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    async fn get(&self, key: &str) -> Result<Option<V>> {
        let key = self.keys.format(key);

        match self.l1.get(&key).await {
            Ok(Some(value)) => {
                self.recorder.count("l1.hit", true);
                return Ok(Some(value));
            }
            Ok(None) => self.recorder.count("l1.miss", true),
            Err(e) => {
                self.recorder.count("l1.error", false);
                warn!(key = %key, "L1 read failed, falling through to L2: {}", e);
            }
        }

        let l2 = self.l2.get(&key).await;
        match l2 {
            Ok(Some(value)) => {
                self.recorder.count("l2.hit", true);
                self.write_back(HashMap::from([(key, value.clone())]));
                Ok(Some(value))
            }
            Ok(None) => {
                self.recorder.count("l2.miss", true);
                Ok(None)
            }
            Err(e) => {
                self.recorder.count("l2.error", false);
                warn!(key = %key, "L2 read failed: {}", e);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: V, expiry: Expiry) -> Result<()> {
        let key = self.keys.format(key);

        match self.config.write_strategy {
            WriteStrategy::WriteThrough => {
                let l1_value = value.clone();
                let l1_write = async {
                    if !self.config.l1_write_enabled {
                        return None;
                    }
                    let expiry = self.expiry_for(TierLevel::L1, expiry);
                    Some(
                        self.recorder
                            .write(TierLevel::L1, &key, self.l1.put(&key, l1_value, expiry))
                            .await,
                    )
                };
                let l2_write = async {
                    if !self.config.l2_write_enabled {
                        return None;
                    }
                    Some(
                        self.recorder
                            .write(TierLevel::L2, &key, self.l2.put(&key, value, expiry))
                            .await,
                    )
                };
                let (l1, l2) = tokio::join!(l1_write, l2_write);
                self.settle(&key, [(TierLevel::L1, l1), (TierLevel::L2, l2)])
            }
            WriteStrategy::WriteBehind => self.write_behind(&key, |tier, level| {
                let key = key.clone();
                let value = value.clone();
                let expiry = self.expiry_for(level, expiry);
                async move { tier.put(&key, value, expiry).await }
            }),
        }
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        let key = self.keys.format(key);
        let (l1, l2) = tokio::join!(self.l1.evict(&key), self.l2.evict(&key));
        match (l1, l2) {
            (Err(e), Err(_)) => Err(e),
            (l1, l2) => Ok(l1.unwrap_or(false) | l2.unwrap_or(false)),
        }
    }

    async fn evict_all(&self, keys: &[String]) -> Result<u64> {
        let keys: Vec<String> = keys.iter().map(|k| self.keys.format(k)).collect();
        let (l1, l2) = tokio::join!(self.l1.evict_all(&keys), self.l2.evict_all(&keys));
        prefer_l1("evict_all", l1, l2)
    }

    async fn evict_by_pattern(&self, pattern: &str) -> Result<u64> {
        let (l1, l2) = tokio::join!(
            self.l1.evict_by_pattern(pattern),
            self.l2.evict_by_pattern(pattern)
        );
        prefer_l1("evict_by_pattern", l1, l2)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = self.keys.format(key);
        if matches!(self.l1.exists(&key).await, Ok(true)) {
            return Ok(true);
        }
        Ok(matches!(self.l2.exists(&key).await, Ok(true)))
    }

    async fn expire(&self, key: &str, expiry: Expiry) -> Result<bool> {
        let key = self.keys.format(key);
        let (l1, l2) = tokio::join!(
            self.l1.expire(&key, self.expiry_for(TierLevel::L1, expiry)),
            self.l2.expire(&key, expiry)
        );
        match (l1, l2) {
            (Err(e), Err(_)) => Err(e),
            (l1, l2) => Ok(l1.unwrap_or(false) | l2.unwrap_or(false)),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        let key = self.keys.format(key);
        for tier in [&self.l1, &self.l2] {
            match tier.ttl(&key).await {
                Ok(ttl) if ttl.is_present() => return Ok(ttl),
                Ok(_) => {}
                Err(e) => debug!(key = %key, "TTL lookup failed: {}", e),
            }
        }
        Ok(Ttl::Absent)
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, V>> {
        let formatted: Vec<String> = keys.iter().map(|k| self.keys.format(k)).collect();

        let l1_hits = self.l1.multi_get(&formatted).await.unwrap_or_else(|e| {
            warn!("L1 batch read failed: {}", e);
            HashMap::new()
        });

        let mut found = HashMap::with_capacity(keys.len());
        let mut misses = Vec::new();
        for (key, formatted) in keys.iter().zip(formatted) {
            match l1_hits.get(&formatted) {
                Some(value) => {
                    found.insert(key.clone(), value.clone());
                }
                None => misses.push((key, formatted)),
            }
        }
        if misses.is_empty() {
            return Ok(found);
        }

        let miss_keys: Vec<String> = misses.iter().map(|(_, f)| f.clone()).collect();
        let l2_hits = self.l2.multi_get(&miss_keys).await.unwrap_or_else(|e| {
            warn!("L2 batch read failed: {}", e);
            HashMap::new()
        });

        let mut promoted = HashMap::new();
        for (key, formatted) in misses {
            if let Some(value) = l2_hits.get(&formatted) {
                found.insert(key.clone(), value.clone());
                promoted.insert(formatted, value.clone());
            }
        }
        debug!(
            requested = keys.len(),
            found = found.len(),
            promoted = promoted.len(),
            "Batch read"
        );
        self.write_back(promoted);
        Ok(found)
    }

    async fn multi_put(&self, entries: HashMap<String, V>, expiry: Expiry) -> Result<()> {
        let entries: HashMap<String, V> = entries
            .into_iter()
            .map(|(k, v)| (self.keys.format(&k), v))
            .collect();
        let label = format!("{} keys", entries.len());

        match self.config.write_strategy {
            WriteStrategy::WriteThrough => {
                let l1_entries = entries.clone();
                let l1_write = async {
                    if !self.config.l1_write_enabled {
                        return None;
                    }
                    let expiry = self.expiry_for(TierLevel::L1, expiry);
                    Some(
                        self.recorder
                            .write(TierLevel::L1, &label, self.l1.multi_put(l1_entries, expiry))
                            .await,
                    )
                };
                let l2_write = async {
                    if !self.config.l2_write_enabled {
                        return None;
                    }
                    Some(
                        self.recorder
                            .write(TierLevel::L2, &label, self.l2.multi_put(entries, expiry))
                            .await,
                    )
                };
                let (l1, l2) = tokio::join!(l1_write, l2_write);
                self.settle(&label, [(TierLevel::L1, l1), (TierLevel::L2, l2)])
            }
            WriteStrategy::WriteBehind => self.write_behind(&label, |tier, level| {
                let entries = entries.clone();
                let expiry = self.expiry_for(level, expiry);
                async move { tier.multi_put(entries, expiry).await }
            }),
        }
    }

    async fn clear(&self) -> Result<()> {
        let (l1, l2) = tokio::join!(self.l1.clear(), self.l2.clear());
        match (l1, l2) {
            (Err(e), Err(_)) => Err(e),
            (l1, l2) => {
                for (level, result) in [(TierLevel::L1, l1), (TierLevel::L2, l2)] {
                    if let Err(e) = result {
                        warn!(tier = %level, "Clear failed: {}", e);
                    }
                }
                Ok(())
            }
        }
    }
}

/// L1 count if L1 answered, otherwise L2's
fn prefer_l1(operation: &str, l1: Result<u64>, l2: Result<u64>) -> Result<u64> {
    match (l1, l2) {
        (Ok(n), _) => Ok(n),
        (Err(e), Ok(n)) => {
            warn!(operation, "L1 failed, using L2 count: {}", e);
            Ok(n)
        }
        (Err(e), Err(_)) => Err(e),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::monitoring::MemoryMetrics;
    use crate::testing::MockTier;
    use assert_matches::assert_matches;

    struct Fixture {
        l1: Arc<MockTier>,
        l2: Arc<MockTier>,
        metrics: Arc<MemoryMetrics>,
        cache: MultiLevelCache<String>,
    }

    fn fixture(config: MultiLevelConfig) -> Fixture {
        let l1 = Arc::new(MockTier::new("l1"));
        let l2 = Arc::new(MockTier::new("l2"));
        let metrics = Arc::new(MemoryMetrics::new());
        let cache = MultiLevelCache::<String>::builder(l1.clone(), l2.clone())
            .config(config)
            .metrics(metrics.clone())
            .build()
            .unwrap();
        Fixture {
            l1,
            l2,
            metrics,
            cache,
        }
    }

    fn plain() -> MultiLevelConfig {
        MultiLevelConfig {
            key_pattern: "{}".to_string(),
            ..Default::default()
        }
    }

    fn secs(n: u64) -> Expiry {
        Expiry::After(Duration::from_secs(n))
    }

    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_l1_hit_skips_l2() {
        let f = fixture(plain());
        f.l1.inner.put("a", "1".to_string(), secs(60)).await.unwrap();

        assert_eq!(f.cache.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(f.l2.gets(), 0);
        assert_eq!(f.metrics.count("cache.multilevel.l1.hit"), 1);
    }

    #[tokio::test]
    async fn test_l2_hit_is_written_back_to_l1() {
        let f = fixture(plain());
        f.l2.inner.put("a", "2".to_string(), secs(3600)).await.unwrap();

        assert_eq!(f.cache.get("a").await.unwrap(), Some("2".to_string()));
        assert_eq!(f.metrics.count("cache.multilevel.l2.hit"), 1);

        let l1 = f.l1.clone();
        assert!(eventually(|| {
            let l1 = l1.clone();
            async move { l1.inner.exists("a").await.unwrap() }
        })
        .await);
        let ttl = f.l1.inner.ttl("a").await.unwrap().remaining().unwrap();
        assert!(ttl <= Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_write_back_disabled() {
        let f = fixture(MultiLevelConfig {
            l1_write_back_enabled: false,
            ..plain()
        });
        f.l2.inner.put("a", "2".to_string(), secs(60)).await.unwrap();
        f.cache.get("a").await.unwrap();
        f.cache.shutdown().await;
        assert!(!f.l1.inner.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_errors_degrade_to_miss() {
        let f = fixture(plain());
        f.l2.inner.put("a", "2".to_string(), secs(60)).await.unwrap();
        f.l1.set_fail_reads(true);
        assert_eq!(f.cache.get("a").await.unwrap(), Some("2".to_string()));

        f.l2.set_fail_reads(true);
        assert_eq!(f.cache.get("a").await.unwrap(), None);
        assert_eq!(f.metrics.count("cache.multilevel.l2.error"), 1);
    }

    #[tokio::test]
    async fn test_put_caps_l1_expiry() {
        let f = fixture(plain());
        f.cache.put("a", "v".to_string(), secs(7200)).await.unwrap();

        let l1 = f.l1.inner.ttl("a").await.unwrap().remaining().unwrap();
        let l2 = f.l2.inner.ttl("a").await.unwrap().remaining().unwrap();
        assert!(l1 <= Duration::from_secs(1800));
        assert!(l2 > Duration::from_secs(1800));

        f.cache.put("b", "v".to_string(), Expiry::Never).await.unwrap();
        assert_eq!(f.l1.inner.ttl("b").await.unwrap(), Ttl::Never);
        assert_eq!(f.metrics.count("cache.multilevel.l1.write.success"), 2);
    }

    #[tokio::test]
    async fn test_any_tier_policy() {
        let f = fixture(plain());
        f.l1.set_fail_writes(true);
        assert!(f.cache.put("a", "v".to_string(), secs(60)).await.is_ok());
        assert_eq!(f.metrics.count("cache.multilevel.l1.write.error"), 1);

        f.l2.set_fail_writes(true);
        let err = f.cache.put("a", "v".to_string(), secs(60)).await.unwrap_err();
        assert_matches!(err, Error::WriteFailed { ref failures, .. } if failures.len() == 2);
    }

    #[tokio::test]
    async fn test_all_tiers_policy() {
        let f = fixture(MultiLevelConfig {
            write_policy: WritePolicy::AllTiers,
            ..plain()
        });
        f.l2.set_fail_writes(true);
        let err = f.cache.put("a", "v".to_string(), secs(60)).await.unwrap_err();
        assert_matches!(err, Error::WriteFailed { ref key, ref failures } if key == "a" && failures.len() == 1);
    }

    #[tokio::test]
    async fn test_disabled_tier_is_not_written() {
        let f = fixture(MultiLevelConfig {
            l1_write_enabled: false,
            ..plain()
        });
        f.cache.put("a", "v".to_string(), secs(60)).await.unwrap();
        assert_eq!(f.l1.puts(), 0);
        assert_eq!(f.l2.puts(), 1);
    }

    #[tokio::test]
    async fn test_write_timeout() {
        let f = fixture(MultiLevelConfig {
            write_timeout: Some(Duration::from_millis(30)),
            write_policy: WritePolicy::AllTiers,
            ..plain()
        });
        f.l2.set_write_delay(Duration::from_millis(300));
        let err = f.cache.put("a", "v".to_string(), secs(60)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{}", err);
    }

    #[tokio::test]
    async fn test_write_behind_returns_immediately() {
        let f = fixture(MultiLevelConfig {
            write_strategy: WriteStrategy::WriteBehind,
            ..plain()
        });
        f.l2.set_write_delay(Duration::from_millis(100));

        let start = Instant::now();
        f.cache.put("a", "v".to_string(), secs(60)).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));

        assert_eq!(f.cache.shutdown().await, 0);
        assert!(f.l1.inner.exists("a").await.unwrap());
        assert!(f.l2.inner.exists("a").await.unwrap());

        let err = f.cache.put("b", "v".to_string(), secs(60)).await.unwrap_err();
        assert_matches!(err, Error::PoolShutdown);
    }

    #[tokio::test]
    async fn test_write_back_skipped_after_shutdown() {
        let f = fixture(plain());
        f.cache.shutdown().await;
        f.l2.inner.put("a", "2".to_string(), secs(60)).await.unwrap();
        assert_eq!(f.cache.get("a").await.unwrap(), Some("2".to_string()));
        assert!(!f.l1.inner.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_key_pattern_formatting() {
        let f = fixture(MultiLevelConfig {
            key_pattern: "user:{}".to_string(),
            ..Default::default()
        });
        f.cache.put("42", "v".to_string(), secs(60)).await.unwrap();
        assert!(f.l1.inner.exists("user:42").await.unwrap());
        assert!(f.cache.exists("42").await.unwrap());

        let f = fixture(MultiLevelConfig {
            key_pattern: "user".to_string(),
            ..Default::default()
        });
        f.cache.put("42", "v".to_string(), secs(60)).await.unwrap();
        assert!(f.l2.inner.exists("user:42").await.unwrap());

        let f = fixture(MultiLevelConfig::default());
        f.cache.put("42", "v".to_string(), secs(60)).await.unwrap();
        assert!(f.l1.inner.exists(":42").await.unwrap());
    }

    #[tokio::test]
    async fn test_evict_by_pattern_is_not_formatted() {
        let f = fixture(MultiLevelConfig {
            key_pattern: "user:{}".to_string(),
            ..Default::default()
        });
        for id in ["1", "2", "3"] {
            f.cache.put(id, "v".to_string(), secs(60)).await.unwrap();
        }
        f.l1.inner.put("order:1", "v".to_string(), secs(60)).await.unwrap();

        assert_eq!(f.cache.evict_by_pattern("user:*").await.unwrap(), 3);
        assert!(f.l1.inner.exists("order:1").await.unwrap());
        assert!(!f.l2.inner.exists("user:2").await.unwrap());
    }

    #[tokio::test]
    async fn test_multi_get_merges_and_writes_back() {
        let f = fixture(MultiLevelConfig {
            key_pattern: "k:{}".to_string(),
            ..Default::default()
        });
        f.l1.inner.put("k:a", "1".to_string(), secs(60)).await.unwrap();
        f.l2.inner.put("k:b", "2".to_string(), secs(60)).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let found = f.cache.multi_get(&keys).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("a"), Some(&"1".to_string()));
        assert_eq!(found.get("b"), Some(&"2".to_string()));

        f.cache.shutdown().await;
        assert!(f.l1.inner.exists("k:b").await.unwrap());
    }

    #[tokio::test]
    async fn test_multi_put_writes_both_tiers() {
        let f = fixture(plain());
        let entries: HashMap<String, String> = (0..3).map(|i| (format!("k{}", i), i.to_string())).collect();
        f.cache.multi_put(entries, secs(60)).await.unwrap();
        assert!(f.l1.inner.exists("k2").await.unwrap());
        assert!(f.l2.inner.exists("k0").await.unwrap());
    }

    #[tokio::test]
    async fn test_evict_semantics() {
        let f = fixture(plain());
        f.l2.inner.put("a", "v".to_string(), secs(60)).await.unwrap();
        assert!(f.cache.evict("a").await.unwrap());
        assert!(!f.cache.evict("a").await.unwrap());

        f.l1.set_fail_writes(true);
        f.l2.inner.put("b", "v".to_string(), secs(60)).await.unwrap();
        assert!(f.cache.evict("b").await.unwrap());

        f.l2.set_fail_writes(true);
        assert!(f.cache.evict("c").await.is_err());
    }

    #[tokio::test]
    async fn test_evict_all_prefers_l1_count() {
        let f = fixture(plain());
        f.l1.inner.put("a", "v".to_string(), secs(60)).await.unwrap();
        for k in ["a", "b", "c"] {
            f.l2.inner.put(k, "v".to_string(), secs(60)).await.unwrap();
        }
        let keys: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(f.cache.evict_all(&keys).await.unwrap(), 1);

        for k in ["a", "b"] {
            f.l2.inner.put(k, "v".to_string(), secs(60)).await.unwrap();
        }
        f.l1.set_fail_writes(true);
        assert_eq!(f.cache.evict_all(&keys).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ttl_falls_back_to_l2() {
        let f = fixture(plain());
        f.l2.inner.put("a", "v".to_string(), Expiry::Never).await.unwrap();
        assert_eq!(f.cache.ttl("a").await.unwrap(), Ttl::Never);

        f.l1.inner.put("a", "v".to_string(), secs(60)).await.unwrap();
        assert!(f.cache.ttl("a").await.unwrap().remaining().is_some());

        assert_eq!(f.cache.ttl("missing").await.unwrap(), Ttl::Absent);
        f.l1.set_fail_reads(true);
        f.l2.set_fail_reads(true);
        assert_eq!(f.cache.ttl("a").await.unwrap(), Ttl::Absent);
    }

    #[tokio::test]
    async fn test_expire_either_tier() {
        let f = fixture(plain());
        f.l2.inner.put("a", "v".to_string(), Expiry::Never).await.unwrap();
        assert!(f.cache.expire("a", secs(10)).await.unwrap());
        assert!(!f.cache.expire("missing", secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_tolerates_one_failure() {
        let f = fixture(plain());
        f.cache.put("a", "v".to_string(), secs(60)).await.unwrap();
        f.l1.set_fail_writes(true);
        assert!(f.cache.clear().await.is_ok());
        assert!(!f.l2.inner.exists("a").await.unwrap());

        f.l2.set_fail_writes(true);
        assert!(f.cache.clear().await.is_err());
    }

    #[tokio::test]
    async fn test_stats_merge_and_partial() {
        let f = fixture(plain());
        f.l1.inner.put("a", "v".to_string(), secs(60)).await.unwrap();
        f.l2.inner.put("a", "v".to_string(), secs(60)).await.unwrap();
        f.l2.inner.put("b", "v".to_string(), secs(60)).await.unwrap();

        let stats = f.cache.stats().await.unwrap();
        assert_eq!(stats.size, 3);

        f.l1.set_fail_reads(true);
        assert_eq!(f.cache.stats().await.unwrap().size, 2);

        f.l2.set_fail_reads(true);
        assert!(f.cache.stats().await.is_err());
    }

    #[tokio::test]
    async fn test_health_relaxed_and_strict() {
        let f = fixture(plain());
        assert!(f.cache.health_check().await.unwrap());

        f.l1.set_unhealthy(true);
        assert!(f.cache.health_check().await.unwrap());
        let report = f.cache.health_report().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.checks.len(), 2);

        f.l2.set_unhealthy(true);
        assert!(!f.cache.health_check().await.unwrap());

        let f = fixture(MultiLevelConfig {
            strict_health_check: true,
            ..plain()
        });
        f.l2.set_unhealthy(true);
        assert!(!f.cache.health_check().await.unwrap());
        assert_eq!(f.cache.health_report().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_get_or_load_counts_loads() {
        let f = fixture(plain());
        let value = f
            .cache
            .get_or_load("a", || async { Ok(Some("loaded".to_string())) })
            .await
            .unwrap();
        assert_eq!(value, Some("loaded".to_string()));
        assert!(f.l2.inner.exists("a").await.unwrap());

        let err = f
            .cache
            .get_or_load("b", || async { Err(anyhow::anyhow!("backend down")) })
            .await
            .unwrap_err();
        assert_matches!(err, Error::Loader(_));

        let stats = f.cache.stats().await.unwrap();
        assert_eq!(stats.load_count, 1);
        assert_eq!(stats.load_exception_count, 1);
    }

    #[tokio::test]
    async fn test_put_default_uses_l2_ttl() {
        let f = fixture(plain());
        f.cache.put_default("a", "v".to_string()).await.unwrap();
        let l2 = f.l2.inner.ttl("a").await.unwrap().remaining().unwrap();
        assert!(l2 > Duration::from_secs(7000));
    }

    #[tokio::test]
    async fn test_from_registry() {
        let registry = TierRegistry::<String>::with_defaults();
        let cache = MultiLevelCache::from_registry(&registry, MultiLevelConfig::default())
            .unwrap()
            .build()
            .unwrap();
        cache.put("a", "v".to_string(), secs(60)).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some("v".to_string()));

        let config = MultiLevelConfig {
            l2: CacheConfig {
                cache_type: "redis".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = MultiLevelCache::<String>::from_registry(&registry, config).err().unwrap();
        assert_matches!(err, Error::UnknownCacheType(t) if t == "redis");
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let f = fixture(plain());
        assert_eq!(f.cache.shutdown().await, 0);
        assert_eq!(f.cache.shutdown().await, 0);
    }
}
