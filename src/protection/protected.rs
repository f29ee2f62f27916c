//! Protected tier: applies a [`ProtectionEngine`] to every write of a wrapped
//! tier and exposes the guarded load path.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::config::ProtectionConfig;
use super::engine::ProtectionEngine;
use crate::cache::{CacheConfig, CacheProbe, CacheStats, Expiry, Tier, Ttl};
use crate::error::Result;

/// Tier decorator adding jitter, existence recording and guarded loads.
///
/// Wrap either the individual tiers or the coordinator, not both, or writes
/// are jittered twice.
pub struct Protected<T> {
    inner: T,
    engine: Arc<ProtectionEngine>,
}

impl<T> Protected<T>
where
    T: Tier,
{
    /// Wrap `inner` with a fresh engine
    pub fn new(inner: T, config: ProtectionConfig) -> Result<Self> {
        Ok(Self::with_engine(inner, Arc::new(ProtectionEngine::new(config)?)))
    }

    /// Wrap `inner` using the protection toggles of its cache configuration
    pub fn from_cache_config(inner: T, config: &CacheConfig) -> Result<Self> {
        Self::new(inner, ProtectionConfig::from(config))
    }

    /// Wrap `inner` with a shared engine
    pub fn with_engine(inner: T, engine: Arc<ProtectionEngine>) -> Self {
        Self { inner, engine }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn engine(&self) -> &Arc<ProtectionEngine> {
        &self.engine
    }

    /// Read `key`, loading it through the engine on a miss
    pub async fn get_or_load<F, Fut>(&self, key: &str, expiry: Expiry, loader: F) -> Result<Option<T::Value>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Option<T::Value>>> + Send,
    {
        self.engine.get_or_load(&self.inner, key, expiry, loader).await
    }

    /// Run engine cleanup every `interval` until the returned task is dropped
    pub fn spawn_cleanup(&self, interval: Duration) -> CleanupTask {
        let engine: Weak<ProtectionEngine> = Arc::downgrade(&self.engine);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match engine.upgrade() {
                    Some(engine) => engine.cleanup(),
                    None => break,
                }
            }
            debug!("Protection cleanup task exited");
        });
        CleanupTask { handle }
    }
}

/// Periodic cleanup task, aborted on drop
pub struct CleanupTask {
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Stop the task
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[async_trait]
impl<T> CacheProbe for Protected<T>
where
    T: Tier,
{
    async fn stats(&self) -> Result<CacheStats> {
        self.inner.stats().await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }
}

#[async_trait]
impl<T> Tier for Protected<T>
where
    T: Tier,
{
    type Value = T::Value;

    async fn get(&self, key: &str) -> Result<Option<Self::Value>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Self::Value, expiry: Expiry) -> Result<()> {
        self.inner.put(key, value, self.engine.jitter(expiry)).await?;
        if !expiry.is_immediate() {
            self.engine.record_key_exists(key);
        }
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        self.inner.evict(key).await
    }

    async fn evict_all(&self, keys: &[String]) -> Result<u64> {
        self.inner.evict_all(keys).await
    }

    async fn evict_by_pattern(&self, pattern: &str) -> Result<u64> {
        self.inner.evict_by_pattern(pattern).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, expiry: Expiry) -> Result<bool> {
        self.inner.expire(key, self.engine.jitter(expiry)).await
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        self.inner.ttl(key).await
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Self::Value>> {
        self.inner.multi_get(keys).await
    }

    async fn multi_put(&self, entries: HashMap<String, Self::Value>, expiry: Expiry) -> Result<()> {
        let keys: Vec<String> = entries.keys().cloned().collect();
        self.inner.multi_put(entries, self.engine.jitter(expiry)).await?;
        if !expiry.is_immediate() {
            for key in &keys {
                self.engine.record_key_exists(key);
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalTier;

    fn protected() -> Protected<LocalTier<String>> {
        let config = ProtectionConfig {
            random_ttl_range: Duration::from_millis(500),
            ..Default::default()
        };
        Protected::new(LocalTier::new(CacheConfig::default()), config).unwrap()
    }

    #[tokio::test]
    async fn test_put_records_existence_and_jitters() {
        let cache = protected();
        assert!(!cache.engine().might_exist("a"));

        cache
            .put("a", "1".to_string(), Expiry::After(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(cache.engine().might_exist("a"));

        let remaining = cache.ttl("a").await.unwrap().remaining().unwrap();
        assert!(remaining <= Duration::from_millis(10_500));
        assert!(remaining > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_written_key_loads_after_eviction() {
        let cache = protected();
        cache.put("a", "1".to_string(), Expiry::Never).await.unwrap();
        cache.evict("a").await.unwrap();

        let value = cache
            .get_or_load("a", Expiry::Never, || async { Ok(Some("2".to_string())) })
            .await
            .unwrap();
        assert_eq!(value, Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_multi_put_records_every_key() {
        let cache = protected();
        let entries: HashMap<String, String> = [("x", "1"), ("y", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        cache.multi_put(entries, Expiry::Never).await.unwrap();

        assert!(cache.engine().might_exist("x"));
        assert!(cache.engine().might_exist("y"));
        assert_eq!(cache.get("y").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_spawned_cleanup_runs_and_stops_on_drop() {
        let config = ProtectionConfig {
            penetration_protection: false,
            null_value_ttl: Duration::from_millis(20),
            ..Default::default()
        };
        let cache = Protected::new(LocalTier::<String>::new(CacheConfig::default()), config).unwrap();
        cache
            .get_or_load("none", Expiry::Never, || async { Ok(None) })
            .await
            .unwrap();
        assert_eq!(cache.engine().stats().negative_entries, 1);

        let task = cache.spawn_cleanup(Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.engine().stats().negative_entries, 0);

        drop(task);
    }
}
