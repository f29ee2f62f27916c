//! Sharded Map Implementation
//!
//! Concurrent hashmap split into power-of-two shards, each behind its own
//! `parking_lot::RwLock`, so unrelated keys rarely contend.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

/// Default number of shards
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Single shard containing a hashmap
pub struct Shard<V> {
    map: RwLock<HashMap<String, V>>,
}

impl<V> Default for Shard<V> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Shard<V> {
    /// Number of entries in this shard
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

/// Sharded map keyed by `String`
pub struct ShardedMap<V> {
    shards: Box<[Shard<V>]>,
    mask: usize,
}

impl<V> Default for ShardedMap<V> {
    fn default() -> Self {
        Self::new(DEFAULT_SHARD_COUNT)
    }
}

impl<V> ShardedMap<V> {
    /// Create a map with `shard_count` shards, rounded up to a power of two
    pub fn new(shard_count: usize) -> Self {
        let count = shard_count.max(1).next_power_of_two();
        let shards: Vec<Shard<V>> = (0..count).map(|_| Shard::default()).collect();
        Self {
            shards: shards.into_boxed_slice(),
            mask: count - 1,
        }
    }

    /// Get the shard count
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard(&self, key: &str) -> &Shard<V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.mask]
    }

    /// Total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Get a clone of a value
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).map.read().get(key).cloned()
    }

    /// Check if a key exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.shard(key).map.read().contains_key(key)
    }

    /// Insert a value, returning the old value if present
    pub fn insert(&self, key: String, value: V) -> Option<V> {
        self.shard(&key).map.write().insert(key, value)
    }

    /// Remove a value, returning it if present
    pub fn remove(&self, key: &str) -> Option<V> {
        self.shard(key).map.write().remove(key)
    }

    /// Remove a value only if `predicate` holds under the write lock
    pub fn remove_if<F>(&self, key: &str, predicate: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        let mut guard = self.shard(key).map.write();
        if guard.get(key).map(predicate).unwrap_or(false) {
            guard.remove(key)
        } else {
            None
        }
    }

    /// Replace a value only if present; returns true if replaced
    pub fn update<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&V) -> Option<V>,
    {
        let mut guard = self.shard(key).map.write();
        let replacement = match guard.get(key) {
            Some(current) => f(current),
            None => return false,
        };
        match replacement {
            Some(value) => {
                guard.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Keep only entries for which `keep` returns true; returns removed count
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&str, &V) -> bool,
    {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut guard = shard.map.write();
            let before = guard.len();
            guard.retain(|k, v| keep(k, v));
            removed += before - guard.len();
        }
        removed
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<(String, V)>
    where
        V: Clone,
    {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let guard = shard.map.read();
            out.extend(guard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    /// Clear all shards, returning how many entries were dropped
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        for shard in self.shards.iter() {
            let mut guard = shard.map.write();
            dropped += guard.len();
            guard.clear();
        }
        dropped
    }
}

// =============================================================================
// Tests
// =============================================================================
