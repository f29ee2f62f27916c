//! Multi-Level Cache
//!
//! L1/L2 coordinator with write-through or write-behind writes and an
//! asynchronous write-back pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MultiLevelCache                         │
//! │        KeyFormat ─ every key except evict_by_pattern        │
//! ├─────────────────────────────────────────────────────────────┤
//! │   get ──► L1 ──miss──► L2 ──hit──► WritebackPool ──► L1     │
//! │                                                             │
//! │   put ──► WriteThrough: join(L1, L2) + WritePolicy          │
//! │       └─► WriteBehind:  WritebackPool ──► L1, L2            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod coordinator;
mod pool;

pub use config::{MultiLevelConfig, TierLevel, WritePolicy, WriteStrategy};
pub use coordinator::{MultiLevelCache, MultiLevelCacheBuilder};
pub use pool::WritebackPool;
