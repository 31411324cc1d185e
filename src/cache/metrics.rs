//! Cache Metrics Collection
//!
//! Lock-free counters for the manager and every tier slot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::backend::ratio;
use super::tier::CacheTier;

/// Per-tier counters
#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    promotions: AtomicU64,
    deletes: AtomicU64,

    // Operation latencies (microseconds, exponential moving average)
    read_latency_us: AtomicU64,
    write_latency_us: AtomicU64,
}

impl TierCounters {
    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.writes,
            &self.write_failures,
            &self.errors,
            &self.timeouts,
            &self.promotions,
            &self.deletes,
            &self.read_latency_us,
            &self.write_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Manager-level
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    policy_rejections: AtomicU64,

    tiers: [TierCounters; CacheTier::COUNT],
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    // Manager-level
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_policy_rejection(&self) {
        self.policy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    // Per-tier
    pub fn record_tier_hit(&self, tier: CacheTier) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier_miss(&self, tier: CacheTier) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, tier: CacheTier) {
        self.tier(tier).writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_writes(&self, tier: CacheTier, count: u64) {
        if count > 0 {
            self.tier(tier).writes.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_write_failure(&self, tier: CacheTier) {
        self.tier(tier).write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed backend call against the tier and the overall total
    pub fn record_error(&self, tier: CacheTier) {
        self.tier(tier).errors.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self, tier: CacheTier) {
        self.tier(tier).timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a promotion into `tier`
    pub fn record_promotion(&self, tier: CacheTier) {
        self.tier(tier).promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletes(&self, tier: CacheTier, count: u64) {
        if count > 0 {
            self.tier(tier).deletes.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_read_latency(&self, tier: CacheTier, duration: Duration) {
        update_latency_ema(&self.tier(tier).read_latency_us, duration);
    }

    pub fn record_write_latency(&self, tier: CacheTier, duration: Duration) {
        update_latency_ema(&self.tier(tier).write_latency_us, duration);
    }

    pub fn tier_hits(&self, tier: CacheTier) -> u64 {
        self.tier(tier).hits.load(Ordering::Relaxed)
    }

    pub fn tier_misses(&self, tier: CacheTier) -> u64 {
        self.tier(tier).misses.load(Ordering::Relaxed)
    }

    pub fn read_latency(&self, tier: CacheTier) -> Duration {
        Duration::from_micros(self.tier(tier).read_latency_us.load(Ordering::Relaxed))
    }

    pub fn write_latency(&self, tier: CacheTier) -> Duration {
        Duration::from_micros(self.tier(tier).write_latency_us.load(Ordering::Relaxed))
    }

    #[inline]
    fn tier(&self, tier: CacheTier) -> &TierCounters {
        &self.tiers[tier.index()]
    }

    /// Get overall cache hit ratio (manager-level lookups only)
    pub fn overall_hit_ratio(&self) -> f64 {
        ratio(self.hits(), self.misses())
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tiers = CacheTier::ALL
            .iter()
            .map(|&tier| {
                let c = self.tier(tier);
                let hits = c.hits.load(Ordering::Relaxed);
                let misses = c.misses.load(Ordering::Relaxed);
                (
                    tier,
                    TierMetricsSnapshot {
                        hits,
                        misses,
                        hit_ratio: ratio(hits, misses),
                        writes: c.writes.load(Ordering::Relaxed),
                        write_failures: c.write_failures.load(Ordering::Relaxed),
                        errors: c.errors.load(Ordering::Relaxed),
                        timeouts: c.timeouts.load(Ordering::Relaxed),
                        promotions: c.promotions.load(Ordering::Relaxed),
                        deletes: c.deletes.load(Ordering::Relaxed),
                        read_latency_us: c.read_latency_us.load(Ordering::Relaxed),
                        write_latency_us: c.write_latency_us.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            requests: self.requests(),
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.overall_hit_ratio(),
            errors: self.errors(),
            policy_rejections: self.policy_rejections.load(Ordering::Relaxed),
            tiers,
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.policy_rejections.store(0, Ordering::Relaxed);
        for tier in &self.tiers {
            tier.reset();
        }
    }
}

fn update_latency_ema(target: &AtomicU64, duration: Duration) {
    let new_us = duration.as_micros() as u64;
    let alpha = 0.1; // EMA smoothing factor

    loop {
        let current = target.load(Ordering::Relaxed);
        let updated = if current == 0 {
            new_us
        } else {
            ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
        };

        if target
            .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

/// Counters for one tier at a point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub writes: u64,
    pub write_failures: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub promotions: u64,
    pub deletes: u64,
    pub read_latency_us: u64,
    pub write_latency_us: u64,
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub errors: u64,
    pub policy_rejections: u64,
    pub tiers: BTreeMap<CacheTier, TierMetricsSnapshot>,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
