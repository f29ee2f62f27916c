//! Protection Engine
//!
//! Guards the load path of a tier against three failure modes:
//!
//! - **Penetration**: repeated lookups of keys that never exist. An existence
//!   filter rejects keys it has never seen and a negative cache remembers
//!   keys the loader confirmed absent.
//! - **Breakdown**: a hot key expiring under load. Loads of hot keys are
//!   bounded by a per-key semaphore; callers that cannot get a permit wait
//!   briefly and re-read instead of loading.
//! - **Avalanche**: many keys expiring together. Write TTLs get random jitter.
//!
//! The existence filter only knows what it was told. Keys are recorded on
//! every successful load and every write through [`super::Protected`];
//! anything else must be seeded with [`ProtectionEngine::record_key_exists`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::bloom::BloomFilter;
use super::config::ProtectionConfig;
use crate::cache::{Expiry, Tier};
use crate::error::{Error, Result};

/// Backoff before the single re-read of a caller that lost the permit race
const CONTENDED_BACKOFF: Duration = Duration::from_millis(50);

/// Access count of a key within the current window
#[derive(Debug, Clone, Copy)]
struct AccessWindow {
    started: Instant,
    count: u64,
}

/// Protection engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionStats {
    /// Keys with a live access window
    pub tracked_keys: u64,
    /// Keys in the negative cache
    pub negative_entries: u64,
    /// Per-key load semaphores alive
    pub semaphores: u64,
    /// Loads rejected by the existence filter
    pub rejected: u64,
    /// Loads that ran under a hot-key permit
    pub guarded_loads: u64,
    /// Callers that found no value after backing off
    pub gave_up: u64,
}

/// Penetration, hot-key and avalanche protection
pub struct ProtectionEngine {
    config: ProtectionConfig,
    bloom: BloomFilter,
    negative: DashMap<String, Instant>,
    access: DashMap<String, AccessWindow>,
    semaphores: DashMap<String, Arc<Semaphore>>,
    rejected: AtomicU64,
    guarded_loads: AtomicU64,
    gave_up: AtomicU64,
}

impl ProtectionEngine {
    /// Create an engine
    pub fn new(config: ProtectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            bloom: BloomFilter::new(config.bloom_filter_size, config.bloom_hash_functions),
            config,
            negative: DashMap::new(),
            access: DashMap::new(),
            semaphores: DashMap::new(),
            rejected: AtomicU64::new(0),
            guarded_loads: AtomicU64::new(0),
            gave_up: AtomicU64::new(0),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    /// Record that `key` holds a value
    pub fn record_key_exists(&self, key: &str) {
        if self.config.penetration_protection {
            self.bloom.insert(key);
        }
        self.negative.remove(key);
    }

    /// False only when penetration protection is on and the key was never recorded
    pub fn might_exist(&self, key: &str) -> bool {
        !self.config.penetration_protection || self.bloom.might_contain(key)
    }

    /// Apply avalanche jitter to a write expiry
    pub fn jitter(&self, expiry: Expiry) -> Expiry {
        let range_ms = self.config.random_ttl_range.as_millis() as u64;
        if !self.config.avalanche_protection || range_ms == 0 || expiry.is_immediate() {
            return expiry;
        }
        match expiry {
            Expiry::Never => Expiry::Never,
            Expiry::After(d) => {
                let extra = rand::thread_rng().gen_range(0..range_ms);
                Expiry::After(d.saturating_add(Duration::from_millis(extra)))
            }
        }
    }

    /// Read `key` from `tier`, loading it on a miss under the configured guards.
    ///
    /// `Ok(None)` covers a rejected key, a negative-cache hit, a loader that
    /// found nothing and a hot-key caller that gave up.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        tier: &T,
        key: &str,
        expiry: Expiry,
        loader: F,
    ) -> Result<Option<T::Value>>
    where
        T: Tier + ?Sized,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Option<T::Value>>> + Send,
    {
        let accesses = self.record_access(key);

        if let Some(value) = self.read(tier, key).await {
            return Ok(Some(value));
        }

        if !self.might_exist(key) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Existence filter rejected load");
            return Ok(None);
        }

        if self.is_negative(key) {
            debug!(key, "Negative cache hit");
            return Ok(None);
        }

        if self.config.hot_key_protection && accesses > self.config.hot_key_threshold {
            self.guarded_load(tier, key, expiry, loader).await
        } else {
            self.load_and_cache(tier, key, expiry, loader).await
        }
    }

    /// Drop stale access windows, negative entries and idle semaphores
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.config.hot_key_window;
        let null_ttl = self.config.null_value_ttl;
        let max_permits = self.config.max_concurrent_loads;

        self.access
            .retain(|_, w| now.duration_since(w.started) < window);
        self.negative
            .retain(|_, recorded| now.duration_since(*recorded) < null_ttl);
        self.semaphores.retain(|key, semaphore| {
            self.access.contains_key(key) || semaphore.available_permits() < max_permits
        });

        debug!(
            tracked = self.access.len(),
            negative = self.negative.len(),
            semaphores = self.semaphores.len(),
            "Protection cleanup"
        );
    }

    /// Snapshot of the engine counters
    pub fn stats(&self) -> ProtectionStats {
        ProtectionStats {
            tracked_keys: self.access.len() as u64,
            negative_entries: self.negative.len() as u64,
            semaphores: self.semaphores.len() as u64,
            rejected: self.rejected.load(Ordering::Relaxed),
            guarded_loads: self.guarded_loads.load(Ordering::Relaxed),
            gave_up: self.gave_up.load(Ordering::Relaxed),
        }
    }

    /// Count one access, restarting the window once it has elapsed
    fn record_access(&self, key: &str) -> u64 {
        let now = Instant::now();
        let mut window = self.access.entry(key.to_string()).or_insert(AccessWindow {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= self.config.hot_key_window {
            window.started = now;
            window.count = 0;
        }
        window.count += 1;
        window.count
    }

    fn is_negative(&self, key: &str) -> bool {
        let recorded = match self.negative.get(key) {
            Some(entry) => *entry.value(),
            None => return false,
        };
        if recorded.elapsed() < self.config.null_value_ttl {
            return true;
        }
        self.negative
            .remove_if(key, |_, at| at.elapsed() >= self.config.null_value_ttl);
        false
    }

    /// Tier read where a failure is a logged miss
    async fn read<T>(&self, tier: &T, key: &str) -> Option<T::Value>
    where
        T: Tier + ?Sized,
    {
        match tier.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "Tier read failed, treating as miss: {}", e);
                None
            }
        }
    }

    async fn guarded_load<T, F, Fut>(
        &self,
        tier: &T,
        key: &str,
        expiry: Expiry,
        loader: F,
    ) -> Result<Option<T::Value>>
    where
        T: Tier + ?Sized,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Option<T::Value>>> + Send,
    {
        let semaphore = self
            .semaphores
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrent_loads)))
            .clone();

        let permit = semaphore.try_acquire();
        match permit {
            Ok(_permit) => {
                self.guarded_loads.fetch_add(1, Ordering::Relaxed);
                // Another holder may have filled it while we raced for the permit
                if let Some(value) = self.read(tier, key).await {
                    return Ok(Some(value));
                }
                self.load_and_cache(tier, key, expiry, loader).await
            }
            Err(_) => {
                tokio::time::sleep(CONTENDED_BACKOFF).await;
                if let Some(value) = self.read(tier, key).await {
                    return Ok(Some(value));
                }
                self.gave_up.fetch_add(1, Ordering::Relaxed);
                warn!(key, "Hot key load contended, no value after backoff");
                Ok(None)
            }
        }
    }

    async fn load_and_cache<T, F, Fut>(
        &self,
        tier: &T,
        key: &str,
        expiry: Expiry,
        loader: F,
    ) -> Result<Option<T::Value>>
    where
        T: Tier + ?Sized,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Option<T::Value>>> + Send,
    {
        match loader().await {
            Ok(Some(value)) => {
                self.record_key_exists(key);
                if let Err(e) = tier.put(key, value.clone(), self.jitter(expiry)).await {
                    warn!(key, "Failed to cache loaded value: {}", e);
                }
                Ok(Some(value))
            }
            Ok(None) => {
                self.negative.insert(key.to_string(), Instant::now());
                Ok(None)
            }
            Err(e) => Err(Error::Loader(e)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
