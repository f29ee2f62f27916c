//! Tier contract
//!
//! Every backend (in-process map, networked store, decorator, coordinator)
//! implements [`Tier`]. The read-only stats/health surface is split out into
//! [`CacheProbe`] so the monitor can hold caches of any value type.

use std::collections::HashMap;

use async_trait::async_trait;

use super::types::{CacheStats, Expiry, Ttl};
use crate::error::Result;

/// Stats and health surface of a cache
#[async_trait]
pub trait CacheProbe: Send + Sync {
    /// Current statistics
    async fn stats(&self) -> Result<CacheStats>;

    /// Whether the cache can currently serve requests
    async fn health_check(&self) -> Result<bool>;
}

/// Uniform cache tier operations.
///
/// `Ok(None)` is a miss, `Err` is a backend failure. Implementations must
/// treat an expired entry exactly like a missing one.
#[async_trait]
pub trait Tier: CacheProbe {
    /// Value type stored in this tier
    type Value: Clone + Send + Sync + 'static;

    /// Get a value
    async fn get(&self, key: &str) -> Result<Option<Self::Value>>;

    /// Store a value
    async fn put(&self, key: &str, value: Self::Value, expiry: Expiry) -> Result<()>;

    /// Remove a value, true iff something was removed
    async fn evict(&self, key: &str) -> Result<bool>;

    /// Remove several values, returning how many were removed
    async fn evict_all(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if self.evict(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every key matching a glob (`*` any run, `?` one character)
    async fn evict_by_pattern(&self, pattern: &str) -> Result<u64>;

    /// Check whether a live value exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Reset the expiry of an existing value, false if absent
    async fn expire(&self, key: &str, expiry: Expiry) -> Result<bool>;

    /// Query the remaining time to live
    async fn ttl(&self, key: &str) -> Result<Ttl>;

    /// Get several values; only present keys appear in the result
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Self::Value>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Store several values with the same expiry
    async fn multi_put(&self, entries: HashMap<String, Self::Value>, expiry: Expiry) -> Result<()> {
        for (key, value) in entries {
            self.put(&key, value, expiry).await?;
        }
        Ok(())
    }

    /// Remove everything
    async fn clear(&self) -> Result<()>;
}
