//! Local Tier - In-Process Cache
//!
//! Bounded in-process tier on a sharded map.
//!
//! # Design
//!
//! - Lazy expiry: an expired entry is removed by the first access that sees it
//! - Capacity is counted in entries; when full, expired entries are purged
//!   first, then the highest eviction scores until the low watermark
//! - Hit/miss/eviction counters are plain atomics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::key::GlobPattern;
use super::shard::{ShardedMap, DEFAULT_SHARD_COUNT};
use super::tier::{CacheProbe, Tier};
use super::types::{CacheStats, Expiry, Ttl};
use crate::error::Result;

/// Fraction of capacity to shrink to once eviction kicks in
const LOW_WATERMARK: f64 = 0.90;

/// In-process cache tier
pub struct LocalTier<V> {
    /// Name used in logs
    name: String,
    /// Sharded storage
    storage: ShardedMap<CacheEntry<V>>,
    /// Configuration
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V> LocalTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a tier with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        Self::with_name("local", config)
    }

    /// Create a named tier
    pub fn with_name(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            storage: ShardedMap::new(DEFAULT_SHARD_COUNT),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Tier name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of stored entries, including expired ones not yet reclaimed
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if the tier is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Look up a live entry, reclaiming it if expired
    fn live_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.storage.get(key)?;
        if entry.is_expired() {
            if self.storage.remove_if(key, |e| e.is_expired()).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        }
        Some(entry)
    }

    fn store(&self, key: &str, value: V, expiry: Expiry) {
        if expiry.is_immediate() {
            self.storage.remove(key);
            return;
        }

        // Soft bound: concurrent writers may briefly overshoot
        if !self.storage.contains_key(key) && self.storage.len() as u64 >= self.config.max_size {
            self.evict_for_capacity();
        }
        self.storage
            .insert(key.to_string(), CacheEntry::new(value, expiry));
    }

    /// Purge expired entries, then evict by score down to the low watermark
    fn evict_for_capacity(&self) {
        let now = Instant::now();
        let expired = self.storage.retain(|_, e| !e.is_expired_at(now));
        self.evictions.fetch_add(expired as u64, Ordering::Relaxed);

        let max = self.config.max_size as usize;
        let len = self.storage.len();
        if len < max {
            return;
        }

        let target = ((max as f64 * LOW_WATERMARK) as usize).min(max.saturating_sub(1));
        let mut candidates: Vec<(String, f64)> = self
            .storage
            .entries()
            .into_iter()
            .map(|(k, e)| (k, e.metadata.eviction_score()))
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut evicted = 0u64;
        let mut remaining = len;
        for (key, _) in candidates {
            if remaining <= target {
                break;
            }
            if self.storage.remove(&key).is_some() {
                evicted += 1;
                remaining -= 1;
            }
        }
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!(tier = %self.name, expired, evicted, "Capacity eviction");
    }
}

#[async_trait]
impl<V> CacheProbe for LocalTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
            size: self.storage.len() as u64,
            ..Default::default()
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[async_trait]
impl<V> Tier for LocalTier<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    async fn get(&self, key: &str) -> Result<Option<V>> {
        match self.live_entry(key) {
            Some(entry) => {
                entry.record_access();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.into_value()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: V, expiry: Expiry) -> Result<()> {
        trace!(tier = %self.name, key, %expiry, "put");
        self.store(key, value, expiry);
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        Ok(matches!(self.storage.remove(key), Some(e) if !e.is_expired()))
    }

    async fn evict_by_pattern(&self, pattern: &str) -> Result<u64> {
        let glob = GlobPattern::new(pattern)?;
        let removed = self.storage.retain(|k, _| !glob.matches(k));
        debug!(tier = %self.name, pattern, removed, "Evicted by pattern");
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_entry(key).is_some())
    }

    async fn expire(&self, key: &str, expiry: Expiry) -> Result<bool> {
        if expiry.is_immediate() {
            return self.evict(key).await;
        }
        Ok(self.storage.update(key, |current| {
            if current.is_expired() {
                None
            } else {
                Some(current.with_expiry(expiry))
            }
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        Ok(match self.live_entry(key) {
            Some(entry) => entry.ttl(),
            None => Ttl::Absent,
        })
    }

    async fn clear(&self) -> Result<()> {
        let dropped = self.storage.clear();
        debug!(tier = %self.name, dropped, "Cleared");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_tier(max_size: u64) -> LocalTier<String> {
        let config = CacheConfig::builder().max_size(max_size).build().unwrap();
        LocalTier::new(config)
    }

    fn secs(n: u64) -> Expiry {
        Expiry::After(Duration::from_secs(n))
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let tier = make_tier(100);
        tier.put("a", "1".to_string(), secs(60)).await.unwrap();
        assert_eq!(tier.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(tier.get("b").await.unwrap(), None);

        let stats = tier.stats().await.unwrap();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_absent_and_is_reclaimed() {
        let tier = make_tier(100);
        tier.put("a", "1".to_string(), Expiry::After(Duration::from_millis(100)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(tier.len(), 1);
        assert_eq!(tier.get("a").await.unwrap(), None);
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.ttl("a").await.unwrap(), Ttl::Absent);
        assert!(!tier.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_immediate_expiry() {
        let tier = make_tier(100);
        tier.put("a", "old".to_string(), Expiry::Never).await.unwrap();
        tier.put("a", "new".to_string(), Expiry::After(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(tier.get("a").await.unwrap(), None);
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_ttl_states() {
        let tier = make_tier(100);
        tier.put("forever", "v".to_string(), Expiry::Never).await.unwrap();
        tier.put("timed", "v".to_string(), secs(30)).await.unwrap();

        assert_eq!(tier.ttl("forever").await.unwrap(), Ttl::Never);
        assert!(tier.ttl("timed").await.unwrap().remaining().is_some());
        assert_eq!(tier.ttl("missing").await.unwrap(), Ttl::Absent);
    }

    #[tokio::test]
    async fn test_max_duration_ttl_is_kept_forever() {
        let tier = make_tier(100);
        tier.put("a", "v".to_string(), Expiry::After(Duration::MAX))
            .await
            .unwrap();
        assert_eq!(tier.get("a").await.unwrap(), Some("v".to_string()));
        assert_eq!(tier.ttl("a").await.unwrap(), Ttl::Never);

        assert!(tier.expire("a", Expiry::After(Duration::MAX)).await.unwrap());
        assert!(tier.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_existing_and_missing() {
        let tier = make_tier(100);
        tier.put("a", "v".to_string(), Expiry::Never).await.unwrap();

        assert!(tier.expire("a", secs(10)).await.unwrap());
        assert!(tier.ttl("a").await.unwrap().remaining().is_some());
        assert!(!tier.expire("missing", secs(10)).await.unwrap());

        assert!(tier.expire("a", Expiry::After(Duration::ZERO)).await.unwrap());
        assert!(!tier.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_evict_and_evict_all() {
        let tier = make_tier(100);
        for k in ["a", "b", "c"] {
            tier.put(k, k.to_string(), Expiry::Never).await.unwrap();
        }
        assert!(tier.evict("a").await.unwrap());
        assert!(!tier.evict("a").await.unwrap());

        let keys = vec!["b".to_string(), "c".to_string(), "zzz".to_string()];
        assert_eq!(tier.evict_all(&keys).await.unwrap(), 2);
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_evict_by_pattern() {
        let tier = make_tier(100);
        for k in ["user:1", "user:2", "user:10", "order:1"] {
            tier.put(k, k.to_string(), Expiry::Never).await.unwrap();
        }
        assert_eq!(tier.evict_by_pattern("user:?").await.unwrap(), 2);
        assert!(tier.exists("user:10").await.unwrap());
        assert_eq!(tier.evict_by_pattern("*").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_evict_by_pattern_spans_newlines() {
        let tier = make_tier(100);
        tier.put("user:a\nb", "v".to_string(), Expiry::Never).await.unwrap();
        tier.put("user:\n", "v".to_string(), Expiry::Never).await.unwrap();
        assert_eq!(tier.evict_by_pattern("user:?").await.unwrap(), 1);
        assert_eq!(tier.evict_by_pattern("user:*").await.unwrap(), 1);
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_multi_get_only_present_keys() {
        let tier = make_tier(100);
        let mut batch = HashMap::new();
        batch.insert("a".to_string(), "1".to_string());
        batch.insert("b".to_string(), "2".to_string());
        tier.multi_put(batch, secs(60)).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let found = tier.multi_get(&keys).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("b"), Some(&"2".to_string()));
    }

    #[tokio::test]
    async fn test_capacity_eviction() {
        let tier = make_tier(10);
        for i in 0..25 {
            tier.put(&format!("k{}", i), i.to_string(), Expiry::Never)
                .await
                .unwrap();
        }
        assert!(tier.len() <= 10);
        assert!(tier.stats().await.unwrap().eviction_count >= 15);
        // The most recent write always lands
        assert_eq!(tier.get("k24").await.unwrap(), Some("24".to_string()));
    }

    #[tokio::test]
    async fn test_clear() {
        let tier = make_tier(100);
        tier.put("a", "1".to_string(), Expiry::Never).await.unwrap();
        tier.clear().await.unwrap();
        assert!(tier.is_empty());
        assert!(tier.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let tier = Arc::new(make_tier(10_000));
        let mut handles = Vec::new();
        for t in 0..8 {
            let tier = Arc::clone(&tier);
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    let key = format!("t{}-{}", t, i);
                    tier.put(&key, key.clone(), Expiry::Never).await.unwrap();
                    assert_eq!(tier.get(&key).await.unwrap(), Some(key));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tier.len(), 800);
    }
}
