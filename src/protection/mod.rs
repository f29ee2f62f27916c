//! Cache Protection
//!
//! Penetration, breakdown and avalanche guards for the load path.
//!
//! ```text
//! get_or_load(key)
//!     │
//!     ├─ count access ─────────────── hot-key window
//!     ├─ tier.get ─────────────────── hit → return
//!     ├─ existence filter ─────────── never seen → None
//!     ├─ negative cache ───────────── recently absent → None
//!     └─ hot? ── yes → per-key semaphore → double-check → load
//!              └ no  → load
//!                        └─ Some → record + put(jittered ttl)
//!                        └─ None → negative cache
//! ```

mod bloom;
mod config;
mod engine;
mod protected;

pub use bloom::BloomFilter;
pub use config::ProtectionConfig;
pub use engine::{ProtectionEngine, ProtectionStats};
pub use protected::{CleanupTask, Protected};
