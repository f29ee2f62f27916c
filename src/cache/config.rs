//! Per-tier cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Cache type served by the built-in in-process tier
pub const LOCAL_CACHE_TYPE: &str = "local";

/// Immutable configuration of a single cache tier.
///
/// Values are never changed in place: use [`CacheConfig::to_builder`] to
/// derive a modified copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Tier implementation selector, resolved through a `TierRegistry`
    pub cache_type: String,
    /// Maximum number of entries
    pub max_size: u64,
    /// TTL used when the caller does not provide one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Emit per-operation metric samples
    pub metrics_enabled: bool,
    /// Open a tracing span per operation
    pub trace_enabled: bool,
    /// Reject loads for keys the existence filter has never seen
    pub penetration_protection: bool,
    /// Bound concurrent loads of hot keys
    pub hot_key_protection: bool,
    /// Add random jitter to write TTLs
    pub avalanche_protection: bool,
    /// Upper bound (exclusive) of the TTL jitter
    #[serde(with = "humantime_serde")]
    pub random_ttl_range: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: LOCAL_CACHE_TYPE.to_string(),
            max_size: 10_000,
            default_ttl: Duration::from_secs(3600),
            metrics_enabled: true,
            trace_enabled: true,
            penetration_protection: false,
            hot_key_protection: false,
            avalanche_protection: false,
            random_ttl_range: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new builder starting from defaults
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder {
            config: CacheConfig::default(),
        }
    }

    /// Create a builder seeded with this configuration
    pub fn to_builder(&self) -> CacheConfigBuilder {
        CacheConfigBuilder {
            config: self.clone(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_type.trim().is_empty() {
            return Err(Error::Config("cache_type must not be empty".to_string()));
        }
        if self.max_size == 0 {
            return Err(Error::Config("max_size must be greater than 0".to_string()));
        }
        if self.default_ttl.is_zero() {
            return Err(Error::Config("default_ttl must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// True when any protection mechanism is switched on
    pub fn any_protection(&self) -> bool {
        self.penetration_protection || self.hot_key_protection || self.avalanche_protection
    }
}

/// Builder for [`CacheConfig`]
#[derive(Debug, Clone)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Set the tier implementation selector
    pub fn cache_type(mut self, cache_type: impl Into<String>) -> Self {
        self.config.cache_type = cache_type.into();
        self
    }

    /// Set maximum number of entries
    pub fn max_size(mut self, max_size: u64) -> Self {
        self.config.max_size = max_size;
        self
    }

    /// Set default TTL
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Enable or disable metric samples
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.config.metrics_enabled = enabled;
        self
    }

    /// Enable or disable tracing spans
    pub fn trace_enabled(mut self, enabled: bool) -> Self {
        self.config.trace_enabled = enabled;
        self
    }

    /// Enable or disable penetration protection
    pub fn penetration_protection(mut self, enabled: bool) -> Self {
        self.config.penetration_protection = enabled;
        self
    }

    /// Enable or disable hot-key protection
    pub fn hot_key_protection(mut self, enabled: bool) -> Self {
        self.config.hot_key_protection = enabled;
        self
    }

    /// Enable or disable avalanche protection
    pub fn avalanche_protection(mut self, enabled: bool) -> Self {
        self.config.avalanche_protection = enabled;
        self
    }

    /// Set jitter range for avalanche protection
    pub fn random_ttl_range(mut self, range: Duration) -> Self {
        self.config.random_ttl_range = range;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<CacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// Tests
// =============================================================================
