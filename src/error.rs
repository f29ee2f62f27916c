//! Error types for the tiered cache engine

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// A tier backend failed (unreachable, refused, corrupt payload)
    #[error("Backend error in tier {tier}: {reason}")]
    Backend { tier: String, reason: String },

    /// An operation exceeded its time budget
    #[error("Operation '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Write did not reach enough tiers to satisfy the write policy
    #[error("Write failed for key {key}: {}", failures.join("; "))]
    WriteFailed { key: String, failures: Vec<String> },

    /// Async worker pool no longer accepts tasks
    #[error("Write-back pool has been shut down")]
    PoolShutdown,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No tier factory registered for the requested cache type
    #[error("Unknown cache type: {0}")]
    UnknownCacheType(String),

    /// Glob pattern could not be compiled
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(String),

    // =========================================================================
    // Loader Errors
    // =========================================================================
    /// The miss loader failed; the source error is preserved untouched
    #[error("Loader failed: {0}")]
    Loader(#[source] anyhow::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a backend error for the named tier
    pub fn backend(tier: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Backend {
            tier: tier.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for failures that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Backend { .. } | Error::Timeout { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================
