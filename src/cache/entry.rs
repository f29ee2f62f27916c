//! Cache Entry Types
//!
//! An entry pairs a value with its expiry deadline and the access metadata
//! used for capacity eviction.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::types::{Expiry, Ttl};

/// Access metadata shared between clones of an entry
#[derive(Debug)]
pub struct EntryMetadata {
    /// Reference point for the relative timestamps below
    created_at: Instant,
    /// Last access, in milliseconds since `created_at`
    last_access_ms: AtomicU64,
    /// Access count for frequency-based eviction
    access_count: AtomicU32,
}

impl EntryMetadata {
    fn new(now: Instant) -> Self {
        Self {
            created_at: now,
            last_access_ms: AtomicU64::new(0),
            access_count: AtomicU32::new(1),
        }
    }

    /// Record an access and return the new count
    #[inline]
    pub fn record_access(&self) -> u32 {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_access_ms.store(elapsed, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get access count
    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Time since the last recorded access
    pub fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_access_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last)
    }

    /// Eviction score (higher = more likely to evict)
    ///
    /// Idle time divided by access frequency, so cold and rarely used
    /// entries go first.
    pub fn eviction_score(&self) -> f64 {
        let idle = self.idle().as_secs_f64();
        let frequency = self.access_count() as f64;
        idle / (frequency + 1.0)
    }
}

/// Cache entry containing a value and its expiry
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    /// Absolute deadline, `None` = never expires
    expires_at: Option<Instant>,
    /// Entry metadata
    pub metadata: Arc<EntryMetadata>,
}

impl<V> CacheEntry<V> {
    /// Create an entry expiring according to `expiry`
    pub fn new(value: V, expiry: Expiry) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: expiry.deadline(now),
            metadata: Arc::new(EntryMetadata::new(now)),
        }
    }

    /// Same value and access history, new expiry
    pub fn with_expiry(&self, expiry: Expiry) -> Self
    where
        V: Clone,
    {
        Self {
            value: self.value.clone(),
            expires_at: expiry.deadline(Instant::now()),
            metadata: Arc::clone(&self.metadata),
        }
    }

    /// Borrow the value
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consume the entry
    pub fn into_value(self) -> V {
        self.value
    }

    /// Check if the entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Check expiry against a fixed instant
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }

    /// Remaining time to live
    pub fn ttl(&self) -> Ttl {
        match self.expires_at {
            None => Ttl::Never,
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    Ttl::Expired
                } else {
                    Ttl::Remaining(deadline - now)
                }
            }
        }
    }

    /// Record access
    #[inline]
    pub fn record_access(&self) -> u32 {
        self.metadata.record_access()
    }
}

// =============================================================================
// Tests
// =============================================================================
