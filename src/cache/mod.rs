//! Cache Tiers
//!
//! The tier contract, the in-process tier and the shared value types.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        Tier (trait)                            │
//! │  get / put / evict / evict_by_pattern / exists / expire / ttl  │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────────┐   │
//! │  │ LocalTier    │   │ Instrumented │   │ Protected         │   │
//! │  │ (sharded)    │   │ (decorator)  │   │ (decorator)       │   │
//! │  └──────────────┘   └──────────────┘   └───────────────────┘   │
//! │          ▲                                                     │
//! │          │ TierRegistry: cache type → factory                  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values are handled as the tier's associated `Value` type; serialization
//! to and from a wire format is the concern of networked tiers.

mod config;
mod entry;
mod instrumented;
mod key;
mod local;
mod registry;
mod shard;
mod tier;
mod types;

pub use config::{CacheConfig, CacheConfigBuilder, LOCAL_CACHE_TYPE};
pub use entry::{CacheEntry, EntryMetadata};
pub use instrumented::{Instrumented, InstrumentedBuilder};
pub use key::{GlobPattern, KeyFormat, PLACEHOLDER};
pub use local::LocalTier;
pub use registry::{SharedTier, TierFactory, TierRegistry};
pub use shard::{ShardedMap, DEFAULT_SHARD_COUNT};
pub use tier::{CacheProbe, Tier};
pub use types::{CacheStats, Expiry, Ttl};
