//! Prometheus Exporter
//!
//! Mirrors [`ManagerStats`] and the latest [`HealthReport`] into gauges on a
//! private registry, rendered in the text exposition format.

use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::cache::{CacheTier, ManagerStats};
use crate::error::Result;
use crate::monitoring::health::HealthReport;

const NAMESPACE: &str = "tiercache";

/// Gauges refreshed from manager snapshots
pub struct PrometheusExporter {
    registry: Registry,

    // Manager-level
    requests: Gauge,
    hits: Gauge,
    misses: Gauge,
    hit_ratio: Gauge,
    errors: Gauge,
    policy_rejections: Gauge,

    // Per-tier, labelled by tier
    tier_items: GaugeVec,
    tier_bytes: GaugeVec,
    tier_hits: GaugeVec,
    tier_misses: GaugeVec,
    tier_errors: GaugeVec,
    tier_promotions: GaugeVec,
    tier_read_latency: GaugeVec,
    tier_healthy: GaugeVec,
}

impl PrometheusExporter {
    /// Create the exporter with its own registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let exporter = Self {
            requests: gauge("requests_total", "Cache lookups")?,
            hits: gauge("hits_total", "Lookups answered by any tier")?,
            misses: gauge("misses_total", "Lookups no tier answered")?,
            hit_ratio: gauge("hit_ratio", "Overall hit ratio")?,
            errors: gauge("errors_total", "Failed backend calls")?,
            policy_rejections: gauge(
                "policy_rejections_total",
                "Writes refused by the write policy",
            )?,
            tier_items: tier_gauge("tier_items", "Records held")?,
            tier_bytes: tier_gauge("tier_bytes", "Payload bytes held")?,
            tier_hits: tier_gauge("tier_hits_total", "Per-tier hits")?,
            tier_misses: tier_gauge("tier_misses_total", "Per-tier misses")?,
            tier_errors: tier_gauge("tier_errors_total", "Per-tier failed backend calls")?,
            tier_promotions: tier_gauge(
                "tier_promotions_total",
                "Records promoted into the tier",
            )?,
            tier_read_latency: tier_gauge(
                "tier_read_latency_microseconds",
                "Read latency moving average",
            )?,
            tier_healthy: tier_gauge("tier_healthy", "1 if the last health probe passed")?,
            registry,
        };

        for collector in [
            &exporter.requests,
            &exporter.hits,
            &exporter.misses,
            &exporter.hit_ratio,
            &exporter.errors,
            &exporter.policy_rejections,
        ] {
            exporter.registry.register(Box::new(collector.clone()))?;
        }
        for collector in [
            &exporter.tier_items,
            &exporter.tier_bytes,
            &exporter.tier_hits,
            &exporter.tier_misses,
            &exporter.tier_errors,
            &exporter.tier_promotions,
            &exporter.tier_read_latency,
            &exporter.tier_healthy,
        ] {
            exporter.registry.register(Box::new(collector.clone()))?;
        }

        Ok(exporter)
    }

    /// Refresh from a stats snapshot
    pub fn update(&self, stats: &ManagerStats) {
        let overall = &stats.overall;
        self.requests.set(overall.requests as f64);
        self.hits.set(overall.hits as f64);
        self.misses.set(overall.misses as f64);
        self.hit_ratio.set(overall.hit_ratio);
        self.errors.set(overall.errors as f64);
        self.policy_rejections.set(overall.policy_rejections as f64);

        for (tier, counters) in &overall.tiers {
            let label = [tier.as_str()];
            self.tier_hits.with_label_values(&label).set(counters.hits as f64);
            self.tier_misses.with_label_values(&label).set(counters.misses as f64);
            self.tier_errors.with_label_values(&label).set(counters.errors as f64);
            self.tier_promotions
                .with_label_values(&label)
                .set(counters.promotions as f64);
            self.tier_read_latency
                .with_label_values(&label)
                .set(counters.read_latency_us as f64);
        }

        for (tier, backend) in &stats.by_tier {
            let label = [tier.as_str()];
            self.tier_items.with_label_values(&label).set(backend.item_count as f64);
            self.tier_bytes.with_label_values(&label).set(backend.total_bytes as f64);
        }
    }

    /// Refresh per-tier health
    pub fn update_health(&self, report: &HealthReport) {
        for (tier, health) in &report.tiers {
            let up = if health.status.is_healthy() { 1.0 } else { 0.0 };
            self.tier_healthy.with_label_values(&[tier.as_str()]).set(up);
        }
    }

    /// Current item gauge for one tier
    pub fn tier_items(&self, tier: CacheTier) -> f64 {
        self.tier_items.with_label_values(&[tier.as_str()]).get()
    }

    /// Render every registered metric
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Content type of [`gather`](Self::gather) output
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

fn gauge(name: &str, help: &str) -> Result<Gauge> {
    Ok(Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?)
}

fn tier_gauge(name: &str, help: &str) -> Result<GaugeVec> {
    Ok(GaugeVec::new(
        Opts::new(name, help).namespace(NAMESPACE),
        &["tier"],
    )?)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_export_manager_stats() {
        let manager = CacheManager::in_memory().unwrap();
        manager
            .set("k", Bytes::from_static(b"v"), None, &Default::default())
            .await;
        manager.get("k").await;

        let exporter = PrometheusExporter::new().unwrap();
        exporter.update(&manager.stats().await);
        exporter.update_health(&manager.health_check().await);

        assert_eq!(exporter.tier_items(CacheTier::L1Memory), 1.0);
        assert_eq!(exporter.tier_items(CacheTier::L2Local), 1.0);

        let text = exporter.gather().unwrap();
        assert!(text.contains("tiercache_requests_total 1"));
        assert!(text.contains("tiercache_tier_hits_total{tier=\"l1_memory\"} 1"));
        assert!(text.contains("tiercache_tier_healthy{tier=\"l6_semantic\"} 1"));
    }

    #[test]
    fn test_independent_registries() {
        // Each exporter owns its registry, so two never collide
        assert!(PrometheusExporter::new().is_ok());
        assert!(PrometheusExporter::new().is_ok());
    }
}
