//! Cache value types: write-side expiry, read-side TTL and statistics.

use std::fmt;
use std::ops::Add;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Expiry requested when writing a value.
///
/// `After(Duration::ZERO)` means immediate expiry: the value is not stored and
/// any existing value under the key is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expiry {
    /// Stored until explicitly evicted
    Never,
    /// Expires after the given duration
    After(#[serde(with = "humantime_serde")] Duration),
}

impl Expiry {
    /// True when the entry must not outlive the write
    #[inline]
    pub fn is_immediate(&self) -> bool {
        matches!(self, Expiry::After(d) if d.is_zero())
    }

    /// Absolute deadline relative to `now`.
    ///
    /// `None` for `Never`, and for a duration too large for the clock to
    /// represent, which then behaves as never expiring.
    pub fn deadline(&self, now: Instant) -> Option<Instant> {
        match self {
            Expiry::Never => None,
            Expiry::After(d) => now.checked_add(*d),
        }
    }

    /// Duration, if finite
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Expiry::Never => None,
            Expiry::After(d) => Some(*d),
        }
    }

    /// The shorter of two expiries (`Never` is the longest)
    pub fn cap(self, other: Expiry) -> Expiry {
        match (self, other) {
            (Expiry::Never, e) | (e, Expiry::Never) => e,
            (Expiry::After(a), Expiry::After(b)) => Expiry::After(a.min(b)),
        }
    }
}

impl From<Duration> for Expiry {
    fn from(d: Duration) -> Self {
        Expiry::After(d)
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expiry::Never => write!(f, "never"),
            Expiry::After(d) => write!(f, "{:?}", d),
        }
    }
}

/// Result of a TTL query.
///
/// The three non-duration states are separate variants and can never be
/// mistaken for a remaining duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ttl {
    /// Key exists and never expires
    Never,
    /// Key does not exist
    Absent,
    /// Key exists but its deadline has passed and it was not yet reclaimed
    Expired,
    /// Key exists with this much time left
    Remaining(#[serde(with = "humantime_serde")] Duration),
}

impl Ttl {
    /// True when the key holds a live value
    #[inline]
    pub fn is_present(&self) -> bool {
        matches!(self, Ttl::Never | Ttl::Remaining(_))
    }

    /// Remaining duration, if finite and live
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Ttl::Remaining(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ttl::Never => write!(f, "never"),
            Ttl::Absent => write!(f, "absent"),
            Ttl::Expired => write!(f, "expired"),
            Ttl::Remaining(d) => write!(f, "{:?}", d),
        }
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that found a value
    pub hit_count: u64,
    /// Lookups that found nothing
    pub miss_count: u64,
    /// Successful loader invocations
    pub load_count: u64,
    /// Failed loader invocations
    pub load_exception_count: u64,
    /// Time spent inside loaders
    #[serde(with = "humantime_serde")]
    pub total_load_time: Duration,
    /// Entries removed by capacity pressure or expiry
    pub eviction_count: u64,
    /// Current number of entries
    pub size: u64,
}

impl CacheStats {
    /// Total lookups
    pub fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    /// Hit rate (0.0 - 1.0), 0 when there were no requests
    pub fn hit_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    /// Miss rate (0.0 - 1.0), 0 when there were no requests
    pub fn miss_rate(&self) -> f64 {
        if self.request_count() == 0 {
            0.0
        } else {
            1.0 - self.hit_rate()
        }
    }

    /// Mean time per load attempt
    pub fn average_load_time(&self) -> Duration {
        let loads = self.load_count + self.load_exception_count;
        if loads == 0 {
            return Duration::ZERO;
        }
        self.total_load_time / loads as u32
    }

    /// Fraction of load attempts that failed
    pub fn load_exception_rate(&self) -> f64 {
        let loads = self.load_count + self.load_exception_count;
        if loads == 0 {
            0.0
        } else {
            self.load_exception_count as f64 / loads as f64
        }
    }

    /// Additive merge; rates are derived, so they follow automatically
    pub fn merge(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count + other.hit_count,
            miss_count: self.miss_count + other.miss_count,
            load_count: self.load_count + other.load_count,
            load_exception_count: self.load_exception_count + other.load_exception_count,
            total_load_time: self.total_load_time + other.total_load_time,
            eviction_count: self.eviction_count + other.eviction_count,
            size: self.size + other.size,
        }
    }
}

impl Add for CacheStats {
    type Output = CacheStats;

    fn add(self, rhs: CacheStats) -> CacheStats {
        self.merge(&rhs)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} hit_rate={:.2}% loads={} load_errors={} evictions={} size={}",
            self.hit_count,
            self.miss_count,
            self.hit_rate() * 100.0,
            self.load_count,
            self.load_exception_count,
            self.eviction_count,
            self.size
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
