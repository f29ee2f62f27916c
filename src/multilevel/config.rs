//! Multi-level coordinator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::{Error, Result};

/// Tier position inside the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierLevel {
    /// Near tier (fast, small)
    L1,
    /// Far tier (slower, large)
    L2,
}

impl TierLevel {
    /// Lowercase label used in metric names
    pub fn label(&self) -> &'static str {
        match self {
            TierLevel::L1 => "l1",
            TierLevel::L2 => "l2",
        }
    }
}

impl std::fmt::Display for TierLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierLevel::L1 => write!(f, "L1"),
            TierLevel::L2 => write!(f, "L2"),
        }
    }
}

/// How writes reach the tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// Write both tiers and wait
    #[default]
    WriteThrough,
    /// Queue both writes on the write-back pool and return
    WriteBehind,
}

/// How many tier writes must succeed for a write-through call to succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// At least one enabled tier
    #[default]
    AnyTier,
    /// Every enabled tier
    AllTiers,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiLevelConfig {
    /// Key pattern applied to every key (see `KeyFormat`)
    pub key_pattern: String,
    pub write_strategy: WriteStrategy,
    pub write_policy: WritePolicy,
    /// Concurrent write-back tasks
    pub async_pool_size: usize,
    /// Copy L2 hits back into L1
    pub l1_write_back_enabled: bool,
    pub l1_write_enabled: bool,
    pub l2_write_enabled: bool,
    /// Require both tiers healthy instead of either
    pub strict_health_check: bool,
    /// Upper bound of any L1 expiry, and the write-back expiry
    #[serde(with = "humantime_serde")]
    pub l1_default_ttl: Duration,
    /// Expiry of `put_default` and loader fills
    #[serde(with = "humantime_serde")]
    pub l2_default_ttl: Duration,
    /// L1 tier configuration
    pub l1: CacheConfig,
    /// L2 tier configuration
    pub l2: CacheConfig,
    /// Bound on each individual tier write
    #[serde(with = "humantime_serde")]
    pub write_timeout: Option<Duration>,
    /// How long shutdown waits for queued writes
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    /// How long shutdown waits after aborting what is left
    #[serde(with = "humantime_serde")]
    pub shutdown_force: Duration,
    /// Prefix of every coordinator metric
    pub metric_prefix: String,
}

impl Default for MultiLevelConfig {
    fn default() -> Self {
        Self {
            key_pattern: String::new(),
            write_strategy: WriteStrategy::default(),
            write_policy: WritePolicy::default(),
            async_pool_size: 4,
            l1_write_back_enabled: true,
            l1_write_enabled: true,
            l2_write_enabled: true,
            strict_health_check: false,
            l1_default_ttl: Duration::from_secs(30 * 60),
            l2_default_ttl: Duration::from_secs(2 * 60 * 60),
            l1: CacheConfig {
                max_size: 10_000,
                ..Default::default()
            },
            l2: CacheConfig {
                max_size: 100_000,
                ..Default::default()
            },
            write_timeout: None,
            shutdown_grace: Duration::from_secs(5),
            shutdown_force: Duration::from_secs(2),
            metric_prefix: "cache.multilevel".to_string(),
        }
    }
}

impl MultiLevelConfig {
    /// Load configuration from a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.async_pool_size == 0 {
            return Err(Error::Config("async_pool_size must be greater than 0".to_string()));
        }
        if !self.l1_write_enabled && !self.l2_write_enabled {
            return Err(Error::Config("at least one tier must accept writes".to_string()));
        }
        if self.l1_default_ttl.is_zero() || self.l2_default_ttl.is_zero() {
            return Err(Error::Config("default TTLs must be greater than 0".to_string()));
        }
        if matches!(self.write_timeout, Some(t) if t.is_zero()) {
            return Err(Error::Config("write_timeout must be greater than 0".to_string()));
        }
        self.l1.validate()?;
        self.l2.validate()?;
        Ok(())
    }

    /// Whether writes to `level` are enabled
    pub fn write_enabled(&self, level: TierLevel) -> bool {
        match level {
            TierLevel::L1 => self.l1_write_enabled,
            TierLevel::L2 => self.l2_write_enabled,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
