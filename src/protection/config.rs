//! Protection configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::{Error, Result};

/// Tuning for the penetration, hot-key and avalanche guards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub penetration_protection: bool,
    pub hot_key_protection: bool,
    pub avalanche_protection: bool,
    /// Bits in the existence filter
    pub bloom_filter_size: usize,
    /// Hash functions per key
    pub bloom_hash_functions: u32,
    /// How long a confirmed-absent key short-circuits loads
    #[serde(with = "humantime_serde")]
    pub null_value_ttl: Duration,
    /// Accesses per window above which a key is hot
    pub hot_key_threshold: u64,
    /// Access counting window
    #[serde(with = "humantime_serde")]
    pub hot_key_window: Duration,
    /// Concurrent loads allowed per hot key
    pub max_concurrent_loads: usize,
    /// Upper bound (exclusive) of the TTL jitter
    #[serde(with = "humantime_serde")]
    pub random_ttl_range: Duration,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            penetration_protection: true,
            hot_key_protection: true,
            avalanche_protection: true,
            bloom_filter_size: 1_000_000,
            bloom_hash_functions: 3,
            null_value_ttl: Duration::from_secs(300),
            hot_key_threshold: 100,
            hot_key_window: Duration::from_secs(60),
            max_concurrent_loads: 10,
            random_ttl_range: Duration::from_secs(300),
        }
    }
}

impl ProtectionConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bloom_filter_size == 0 {
            return Err(Error::Config("bloom_filter_size must be greater than 0".to_string()));
        }
        if self.bloom_hash_functions == 0 {
            return Err(Error::Config("bloom_hash_functions must be greater than 0".to_string()));
        }
        if self.max_concurrent_loads == 0 {
            return Err(Error::Config("max_concurrent_loads must be greater than 0".to_string()));
        }
        if self.hot_key_window.is_zero() {
            return Err(Error::Config("hot_key_window must be greater than 0".to_string()));
        }
        Ok(())
    }
}

impl From<&CacheConfig> for ProtectionConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            penetration_protection: config.penetration_protection,
            hot_key_protection: config.hot_key_protection,
            avalanche_protection: config.avalanche_protection,
            random_ttl_range: config.random_ttl_range,
            ..Default::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
