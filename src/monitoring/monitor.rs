//! Cache Monitor
//!
//! Background task that keeps the hierarchy tidy and observable: on every
//! tick it sweeps expired records from all tiers, probes tier health, logs a
//! stats summary and refreshes the exporter.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::exporter::PrometheusExporter;
use super::health::{HealthReport, HealthState, HealthStatus};
use crate::cache::CacheManager;
use crate::config::MonitorConfig;

/// Outcome of one monitor tick
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    /// Expired records removed by the sweep
    pub swept: u64,
    /// Records held across all reporting tiers after the sweep
    pub total_items: u64,
    /// Payload bytes held across all reporting tiers
    pub total_bytes: u64,
    /// Overall hit ratio so far
    pub hit_ratio: f64,
    /// True when `total_items` exceeded the warning threshold
    pub over_threshold: bool,
    /// Health probe results
    pub health: HealthReport,
}

/// Periodic sweeper and reporter
pub struct CacheMonitor {
    manager: Arc<CacheManager>,
    config: MonitorConfig,
    health: Arc<HealthState>,
    exporter: Option<Arc<PrometheusExporter>>,
}

impl CacheMonitor {
    /// Create a monitor over `manager`
    pub fn new(manager: Arc<CacheManager>, config: MonitorConfig) -> Self {
        Self {
            manager,
            config,
            health: Arc::new(HealthState::new()),
            exporter: None,
        }
    }

    /// Share a health state with the HTTP endpoints
    pub fn with_health_state(mut self, health: Arc<HealthState>) -> Self {
        self.health = health;
        self
    }

    /// Refresh this exporter on every tick
    pub fn with_exporter(mut self, exporter: Arc<PrometheusExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Health state updated by each tick
    pub fn health_state(&self) -> &Arc<HealthState> {
        &self.health
    }

    /// Run one sweep/report cycle
    pub async fn tick(&self) -> MonitorReport {
        let swept = self.manager.clear_expired(None).await;
        let stats = self.manager.stats().await;
        let health = self.manager.health_check().await;

        let total_items = stats.total_items();
        let over_threshold = total_items > self.config.item_warning_threshold;

        info!(
            swept,
            total_items,
            total_bytes = stats.total_bytes(),
            requests = stats.overall.requests,
            hit_ratio = stats.overall.hit_ratio,
            errors = stats.overall.errors,
            health = %health.status,
            "Cache stats"
        );
        for (tier, backend) in &stats.by_tier {
            info!(
                tier = %tier,
                backend = %backend.backend,
                items = backend.item_count,
                bytes = backend.total_bytes,
                avg_access_count = backend.avg_access_count,
                "Tier stats"
            );
        }

        if over_threshold {
            warn!(
                total_items,
                threshold = self.config.item_warning_threshold,
                "Cache item count exceeds warning threshold"
            );
        }
        if health.status != HealthStatus::Healthy {
            warn!(failing = ?health.failing(), "Cache tiers unhealthy");
        }

        if let Some(exporter) = &self.exporter {
            exporter.update(&stats);
            exporter.update_health(&health);
        }
        self.health.update(health.clone());

        MonitorReport {
            swept,
            total_items,
            total_bytes: stats.total_bytes(),
            hit_ratio: stats.overall.hit_ratio,
            over_threshold,
            health,
        }
    }

    /// Tick on the configured interval until `shutdown` is cancelled
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval_secs,
            item_warning_threshold = self.config.item_warning_threshold,
            "Starting cache monitor"
        );

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Cache monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
