//! Tier registry: resolves a configured cache type to a tier factory.
//!
//! An unknown type is a construction-time error and is never replaced by a
//! default.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::config::{CacheConfig, LOCAL_CACHE_TYPE};
use super::local::LocalTier;
use super::tier::Tier;
use crate::error::{Error, Result};

/// Shared tier handle
pub type SharedTier<V> = Arc<dyn Tier<Value = V>>;

/// Factory building a tier from its configuration
pub type TierFactory<V> = Arc<dyn Fn(&CacheConfig) -> Result<SharedTier<V>> + Send + Sync>;

/// Registry of tier factories keyed by cache type
pub struct TierRegistry<V> {
    factories: HashMap<String, TierFactory<V>>,
}

impl<V> TierRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the in-process tier under "local" and "caffeine"
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let local: TierFactory<V> = Arc::new(|config: &CacheConfig| {
            Ok(Arc::new(LocalTier::with_name(config.cache_type.clone(), config.clone())) as SharedTier<V>)
        });
        registry.factories.insert(LOCAL_CACHE_TYPE.to_string(), Arc::clone(&local));
        registry.factories.insert("caffeine".to_string(), local);
        registry
    }

    /// Register (or replace) a factory
    pub fn register<F>(&mut self, cache_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&CacheConfig) -> Result<SharedTier<V>> + Send + Sync + 'static,
    {
        let cache_type = cache_type.into().to_lowercase();
        debug!(cache_type = %cache_type, "Registering tier factory");
        self.factories.insert(cache_type, Arc::new(factory));
        self
    }

    /// Check whether a cache type is known
    pub fn supports(&self, cache_type: &str) -> bool {
        self.factories.contains_key(&cache_type.to_lowercase())
    }

    /// Registered cache types
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Validate `config` and build the tier it selects
    pub fn create(&self, config: &CacheConfig) -> Result<SharedTier<V>> {
        config.validate()?;
        let factory = self
            .factories
            .get(&config.cache_type.to_lowercase())
            .ok_or_else(|| Error::UnknownCacheType(config.cache_type.clone()))?;
        factory(config)
    }
}

impl<V> Default for TierRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::with_defaults()
    }
}

// =============================================================================
// Tests
// =============================================================================
