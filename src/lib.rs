//! tiercache - Multi-Level Cache Engine
//!
//! A two-tier (L1/L2) cache coordinator with protection against cache
//! penetration, hot-key breakdown and TTL avalanches, plus a periodic monitor
//! that samples caches, publishes metrics and raises alerts.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Application                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Protected   │───▶│  MultiLevel  │───▶│  L1  /  L2   │       │
//! │  │  (guards)    │    │  (coordinator│    │  (Tier impls)│       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          ▲                   ▲                   ▲              │
//! │          └──────── CacheMonitor (weak refs) ─────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tier contract, in-process tier, registry, key formatting
//! - [`error`] - Error types
//! - [`monitoring`] - Metric/alert sinks, health reports, cache monitor
//! - [`multilevel`] - L1/L2 coordinator and write-back pool
//! - [`protection`] - Penetration, hot-key and avalanche protection

pub mod cache;
pub mod error;
pub mod monitoring;
pub mod multilevel;
pub mod protection;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use cache::{
    CacheConfig, CacheProbe, CacheStats, Expiry, Instrumented, KeyFormat, LocalTier, SharedTier,
    Tier, TierRegistry, Ttl,
};
pub use error::{Error, Result};
pub use monitoring::{CacheMonitor, MonitorConfig};
pub use multilevel::{MultiLevelCache, MultiLevelConfig, WritePolicy, WriteStrategy};
pub use protection::{Protected, ProtectionConfig, ProtectionEngine};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
