//! Health Checks
//!
//! Per-tier probe results and the daemon's view of the latest report.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cache::CacheTier;

/// Health status of one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Probe round trip succeeded
    Healthy,
    /// Backend answered but the probe value did not come back
    Unhealthy,
    /// Backend call failed or timed out
    Error,
}

impl HealthStatus {
    /// Check if status is healthy
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    fn severity(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unhealthy => 1,
            HealthStatus::Error => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Error => write!(f, "error"),
        }
    }
}

/// Probe result for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierHealth {
    /// Status
    pub status: HealthStatus,
    /// Human-readable detail
    pub detail: String,
    /// Duration of the probe
    pub duration_ms: u64,
}

impl TierHealth {
    /// Create a healthy result
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: detail.into(),
            duration_ms: 0,
        }
    }

    /// Create an unhealthy result
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            detail: detail.into(),
            duration_ms: 0,
        }
    }

    /// Create an error result
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            detail: detail.into(),
            duration_ms: 0,
        }
    }

    /// Set duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Health of every mounted tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst tier status (healthy when no tier is mounted)
    pub status: HealthStatus,
    /// Per-tier results
    pub tiers: BTreeMap<CacheTier, TierHealth>,
    /// When the probes ran
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Build a report, deriving the overall status from the worst tier
    pub fn new(tiers: BTreeMap<CacheTier, TierHealth>, checked_at: DateTime<Utc>) -> Self {
        let status = tiers
            .values()
            .map(|t| t.status)
            .max_by_key(|s| s.severity())
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            tiers,
            checked_at,
        }
    }

    /// Tiers that are not healthy
    pub fn failing(&self) -> Vec<CacheTier> {
        self.tiers
            .iter()
            .filter(|(_, h)| !h.status.is_healthy())
            .map(|(tier, _)| *tier)
            .collect()
    }
}

/// Daemon health state: liveness plus the most recent tier report
pub struct HealthState {
    start_time: Instant,
    live: AtomicBool,
    latest: RwLock<Option<HealthReport>>,
}

impl HealthState {
    /// Create a new health state
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            live: AtomicBool::new(true),
            latest: RwLock::new(None),
        }
    }

    /// Get uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check liveness
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    /// Set liveness
    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    /// Replace the latest report
    pub fn update(&self, report: HealthReport) {
        *self.latest.write() = Some(report);
    }

    /// Latest report, if a check has run
    pub fn latest(&self) -> Option<HealthReport> {
        self.latest.read().clone()
    }

    /// Ready once a check has run and every tier passed
    pub fn is_ready(&self) -> bool {
        self.latest
            .read()
            .as_ref()
            .map(|r| r.status.is_healthy())
            .unwrap_or(false)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
