//! Health Reports
//!
//! Per-tier health results and the aggregated response served by the demo
//! binary's `/healthz` endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Fully healthy
    Healthy,
    /// Serving, with at least one tier down
    Degraded,
    /// Not serving
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if status is healthy
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Health check result for one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Component name
    pub name: String,
    /// Status
    pub status: HealthStatus,
    /// Message
    pub message: Option<String>,
    /// Duration of check
    pub duration_ms: u64,
}

impl HealthCheckResult {
    /// Create a healthy result
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            duration_ms: 0,
        }
    }

    /// Create an unhealthy result
    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    /// Set duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: HealthStatus,
    /// Individual check results
    pub checks: Vec<HealthCheckResult>,
    /// Crate version
    pub version: String,
}

impl HealthResponse {
    /// Worst status wins
    pub fn worst_of(checks: Vec<HealthCheckResult>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max_by_key(|s| s.severity())
            .unwrap_or(HealthStatus::Healthy);
        Self::with_status(status, checks)
    }

    /// Explicit overall status
    pub fn with_status(status: HealthStatus, checks: Vec<HealthCheckResult>) -> Self {
        Self {
            status,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
