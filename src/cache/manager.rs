//! Cache Manager - Unified Multi-Tier Cache
//!
//! Orchestrates every mounted tier: cascading reads with promotion into
//! faster tiers, policy-driven write fan-out, tag invalidation, sweeps,
//! statistics and health probing.
//!
//! No operation here ever fails because a tier failed. Backend errors are
//! absorbed by the [`Tier`] wrapper and show up as misses, failed writes and
//! error counters.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{BackendStats, CacheBackend, ProbeOutcome, Tier};
use super::clock::{system_clock, SharedClock};
use super::fast::FastCache;
use super::memory::MemoryBackend;
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::policy::{SizeTieredPolicy, WritePolicy};
use super::record::{BatchEntry, CacheRecord, Lifetime, TagSet};
use super::semantic::{SemanticCache, SemanticConfig, SemanticMatch};
use super::tier::CacheTier;
use super::{DEFAULT_PROBE_TTL, HEALTH_PROBE_PREFIX};
use crate::error::{Error, Result};
use crate::monitoring::health::{HealthReport, TierHealth};

/// Promotion behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Copy hits into faster tiers
    pub enabled: bool,
    /// Spawn the copies on the runtime instead of awaiting them
    pub background: bool,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            background: false,
        }
    }
}

/// Per-tier mount options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TierOptions {
    /// Per-call deadline
    pub timeout: Option<Duration>,
    /// TTL for writes that carry none
    pub default_ttl: Option<Duration>,
}

/// Cache lookup result
#[derive(Debug, Clone)]
pub struct CacheResult {
    /// The record as the answering tier returned it
    pub record: CacheRecord,
    /// Which tier answered
    pub tier: CacheTier,
    /// Lookup latency
    pub latency: Duration,
}

impl CacheResult {
    /// Cached payload
    pub fn value(&self) -> &Bytes {
        &self.record.value
    }
}

/// Outcome of a fan-out write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Tiers that accepted the write
    pub stored: Vec<CacheTier>,
    /// Tiers that were targeted but failed
    pub failed: Vec<CacheTier>,
}

impl WriteReport {
    /// At least one tier accepted the write
    pub fn is_stored(&self) -> bool {
        !self.stored.is_empty()
    }
}

/// Manager-wide statistics
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    /// Manager and per-tier counters
    pub overall: MetricsSnapshot,
    /// Backend summaries; tiers that failed to report are absent
    pub by_tier: BTreeMap<CacheTier, BackendStats>,
}

impl ManagerStats {
    /// Records held across all reporting tiers
    pub fn total_items(&self) -> u64 {
        self.by_tier.values().map(|s| s.item_count).sum()
    }

    /// Payload bytes held across all reporting tiers
    pub fn total_bytes(&self) -> u64 {
        self.by_tier.values().map(|s| s.total_bytes).sum()
    }
}

/// Unified cache manager
pub struct CacheManager {
    /// Mounted tiers, fastest first
    tiers: BTreeMap<CacheTier, Tier>,
    /// Direct handle for similarity lookups
    semantic: Option<Arc<SemanticCache>>,
    /// Cascading read order
    read_order: Vec<CacheTier>,
    /// Write target selection
    policy: Arc<dyn WritePolicy>,
    promotion: PromotionConfig,
    probe_ttl: Duration,
    clock: SharedClock,
    /// Metrics collector
    metrics: Arc<CacheMetrics>,
}

impl CacheManager {
    /// Start building a manager
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    /// All six tiers on in-process stores (for testing and embedding)
    pub fn in_memory() -> Result<Self> {
        Self::builder()
            .fast(Arc::new(FastCache::new()), TierOptions::default())
            .mount(CacheTier::L2Local, Arc::new(MemoryBackend::new("local")), TierOptions::default())
            .mount(
                CacheTier::L3Relational,
                Arc::new(MemoryBackend::new("relational")),
                TierOptions::default(),
            )
            .mount(
                CacheTier::L4KeyValue,
                Arc::new(MemoryBackend::new("key_value")),
                TierOptions::default(),
            )
            .mount(
                CacheTier::L5Document,
                Arc::new(MemoryBackend::new("document")),
                TierOptions::default(),
            )
            .semantic(
                Arc::new(SemanticCache::with_hashing_embedder(SemanticConfig::default())),
                TierOptions::default(),
            )
            .build()
    }

    /// Look `key` up tier by tier in read order. The first hit is returned
    /// and copied into every tier read before it.
    pub async fn get(&self, key: &str) -> Option<CacheResult> {
        self.metrics.record_request();
        let start = Instant::now();

        for (position, tier_id) in self.read_order.iter().enumerate() {
            let Some(tier) = self.tiers.get(tier_id) else {
                continue;
            };

            if let Some(record) = tier.get(key).await {
                self.metrics.record_hit();
                debug!(key, tier = %tier_id, "Cache hit");

                if self.promotion.enabled && position > 0 {
                    self.promote(key, &record, &self.read_order[..position]).await;
                }

                return Some(CacheResult {
                    record,
                    tier: *tier_id,
                    latency: start.elapsed(),
                });
            }
        }

        self.metrics.record_miss();
        debug!(key, "Cache miss");
        None
    }

    /// Payload only
    pub async fn get_value(&self, key: &str) -> Option<Bytes> {
        self.get(key).await.map(|hit| hit.record.value)
    }

    /// Copy a hit into `targets`, keeping its tags and remaining lifetime
    async fn promote(&self, key: &str, record: &CacheRecord, targets: &[CacheTier]) {
        let ttl = match record.expires_at {
            Some(_) => match record.remaining_ttl(self.clock.now()) {
                Some(left) if !left.is_zero() => Some(left),
                _ => return,
            },
            None => None,
        };

        let tiers: Vec<Tier> = targets
            .iter()
            .filter_map(|id| self.tiers.get(id))
            .cloned()
            .collect();
        if tiers.is_empty() {
            return;
        }

        let key = key.to_string();
        let value = record.value.clone();
        let tags = record.tags.clone();
        let metrics = Arc::clone(&self.metrics);

        let copy = async move {
            for tier in tiers {
                if tier.set(&key, value.clone(), ttl, &tags).await {
                    metrics.record_promotion(tier.id());
                    debug!(key = %key, tier = %tier.id(), "Promoted record");
                }
            }
        };

        if self.promotion.background {
            tokio::spawn(copy);
        } else {
            copy.await;
        }
    }

    /// Write through the write policy. True if at least one tier stored it.
    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>, tags: &TagSet) -> bool {
        match self.set_with_report(key, value, ttl, tags).await {
            Ok(report) => report.is_stored(),
            Err(e) => {
                debug!(key, error = %e, "Write not cached");
                false
            }
        }
    }

    /// Write through the write policy, reporting per-tier outcomes.
    ///
    /// Only a policy rejection is an error; tier failures land in
    /// [`WriteReport::failed`].
    pub async fn set_with_report(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: &TagSet,
    ) -> Result<WriteReport> {
        let available = self.writable_tiers();

        let decision = match self.policy.select(key, value.len(), &available) {
            Ok(decision) => decision,
            Err(e) => {
                self.metrics.record_policy_rejection();
                return Err(e);
            }
        };

        let targets: Vec<&Tier> = decision
            .tiers
            .iter()
            .filter_map(|id| self.tiers.get(id))
            .collect();
        let outcomes = join_all(
            targets
                .iter()
                .map(|tier| tier.set(key, value.clone(), ttl, tags)),
        )
        .await;

        let mut report = WriteReport::default();
        for (tier, ok) in targets.iter().zip(outcomes) {
            if ok {
                report.stored.push(tier.id());
            } else {
                report.failed.push(tier.id());
            }
        }

        if !report.is_stored() {
            warn!(key, tiers = ?report.failed, "Write failed on every target tier");
        } else if decision.fallback {
            debug!(key, tiers = ?report.stored, "Write used fallback tiers");
        }
        Ok(report)
    }

    /// Write a batch through the write policy. Each tier receives its share
    /// as one backend batch. Returns how many entries landed in at least one
    /// tier; rejected entries are counted and skipped.
    pub async fn set_many(&self, entries: &[BatchEntry]) -> u64 {
        let available = self.writable_tiers();

        let mut batches: BTreeMap<CacheTier, Vec<usize>> = BTreeMap::new();
        for (index, entry) in entries.iter().enumerate() {
            match self.policy.select(&entry.key, entry.value.len(), &available) {
                Ok(decision) => {
                    for tier in decision.tiers {
                        batches.entry(tier).or_default().push(index);
                    }
                }
                Err(e) => {
                    self.metrics.record_policy_rejection();
                    debug!(key = %entry.key, error = %e, "Batch entry not cached");
                }
            }
        }

        let writes = batches.iter().filter_map(|(id, indices)| {
            let tier = self.tiers.get(id)?;
            let batch: Vec<BatchEntry> = indices.iter().map(|i| entries[*i].clone()).collect();
            Some(async move { (tier.set_many(&batch).await, indices) })
        });

        let mut stored = vec![false; entries.len()];
        for (ok, indices) in join_all(writes).await {
            if ok {
                for index in indices {
                    stored[*index] = true;
                }
            }
        }

        let count = stored.iter().filter(|s| **s).count();
        if count < entries.len() {
            warn!(stored = count, total = entries.len(), "Batch write incomplete");
        }
        count as u64
    }

    /// Remaining lifetime of `key` in the first tier (read order) holding
    /// it. Not an access: no counters move and nothing is promoted.
    pub async fn ttl(&self, key: &str) -> Option<Lifetime> {
        for tier_id in &self.read_order {
            let Some(tier) = self.tiers.get(tier_id) else {
                continue;
            };
            if let Some(lifetime) = tier.ttl(key).await {
                return Some(lifetime);
            }
        }
        None
    }

    /// Mounted tiers the write policy may pick from
    fn writable_tiers(&self) -> Vec<CacheTier> {
        self.tiers
            .keys()
            .copied()
            .filter(|tier| *tier != CacheTier::L6Semantic)
            .collect()
    }

    /// Delete `key` from `tiers` (default: every mounted tier). Returns the
    /// number of tiers that actually held it.
    pub async fn delete(&self, key: &str, tiers: Option<&[CacheTier]>) -> usize {
        let targets = self.select(tiers, self.tiers.keys().copied().collect());
        join_all(targets.iter().map(|tier| tier.delete(key)))
            .await
            .into_iter()
            .filter(|removed| *removed)
            .count()
    }

    /// Delete every record carrying any of `tags` from `tiers` (default:
    /// the persistent tiers). Returns the total removed.
    pub async fn delete_by_tags(&self, tags: &TagSet, tiers: Option<&[CacheTier]>) -> u64 {
        let default = self
            .tiers
            .keys()
            .copied()
            .filter(|tier| tier.is_persistent())
            .collect();
        let targets = self.select(tiers, default);
        let removed: u64 = join_all(targets.iter().map(|tier| tier.delete_by_tags(tags)))
            .await
            .into_iter()
            .sum();

        info!(tags = ?tags, removed, "Invalidated by tags");
        removed
    }

    /// Clear `tiers` (default: every mounted tier). True if every one cleared.
    pub async fn clear(&self, tiers: Option<&[CacheTier]>) -> bool {
        let targets = self.select(tiers, self.tiers.keys().copied().collect());
        join_all(targets.iter().map(|tier| tier.clear()))
            .await
            .into_iter()
            .all(|ok| ok)
    }

    /// Eager expiry sweep over `tiers` (default: every mounted tier)
    pub async fn clear_expired(&self, tiers: Option<&[CacheTier]>) -> u64 {
        let targets = self.select(tiers, self.tiers.keys().copied().collect());
        join_all(targets.iter().map(|tier| tier.clear_expired()))
            .await
            .into_iter()
            .sum()
    }

    /// True if any tier in read order holds a live record for `key`.
    /// Touches no bookkeeping and no hit/miss counters.
    pub async fn exists(&self, key: &str) -> bool {
        for tier_id in &self.read_order {
            if let Some(tier) = self.tiers.get(tier_id) {
                if tier.contains(key).await {
                    return true;
                }
            }
        }
        false
    }

    /// Similarity lookup against the semantic tier only
    pub async fn get_semantic(&self, text: &str) -> Option<SemanticMatch> {
        let (Some(semantic), Some(tier)) = (&self.semantic, self.tiers.get(&CacheTier::L6Semantic))
        else {
            return None;
        };

        self.metrics.record_request();
        let found = tier
            .guard("get_semantic", text, semantic.get(text, None))
            .await
            .flatten();

        match found {
            Some(m) => {
                self.metrics.record_tier_hit(CacheTier::L6Semantic);
                self.metrics.record_hit();
                Some(m)
            }
            None => {
                self.metrics.record_tier_miss(CacheTier::L6Semantic);
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Ranked similarity search against the semantic tier
    pub async fn search_semantic(
        &self,
        text: &str,
        limit: usize,
        min_similarity: Option<f32>,
    ) -> Vec<SemanticMatch> {
        let (Some(semantic), Some(tier)) = (&self.semantic, self.tiers.get(&CacheTier::L6Semantic))
        else {
            return Vec::new();
        };
        tier.guard(
            "search_semantic",
            text,
            semantic.search_similar(text, limit, min_similarity),
        )
        .await
        .unwrap_or_default()
    }

    /// Store `value` in the semantic tier under `text`
    pub async fn set_semantic(
        &self,
        text: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: &TagSet,
    ) -> bool {
        match self.tiers.get(&CacheTier::L6Semantic) {
            Some(tier) => tier.set(text, value, ttl, tags).await,
            None => false,
        }
    }

    /// Counters plus a summary from every tier that could report
    pub async fn stats(&self) -> ManagerStats {
        let reports = join_all(
            self.tiers
                .values()
                .map(|tier| async move { (tier.id(), tier.stats().await) }),
        )
        .await;

        ManagerStats {
            overall: self.metrics.snapshot(),
            by_tier: reports
                .into_iter()
                .filter_map(|(id, stats)| stats.map(|s| (id, s)))
                .collect(),
        }
    }

    /// Probe every mounted tier with a short-lived synthetic key. The probe
    /// key is removed afterwards whatever the outcome.
    pub async fn health_check(&self) -> HealthReport {
        let checks = self.tiers.values().map(|tier| async move {
            let key = format!("{}:{}:{}", HEALTH_PROBE_PREFIX, tier.id().as_str(), Uuid::new_v4());
            let value = Bytes::from(format!("probe-{}", Uuid::new_v4()));
            let start = Instant::now();

            let health = match tier.probe(&key, value, self.probe_ttl).await {
                Ok(ProbeOutcome::RoundTrip) => TierHealth::healthy("round trip ok"),
                Ok(ProbeOutcome::Skipped(reason)) => TierHealth::healthy(reason),
                Ok(ProbeOutcome::Mismatch) => TierHealth::unhealthy("probe value was not read back"),
                Err(e) => TierHealth::error(e.to_string()),
            };
            (tier.id(), health.with_duration(start.elapsed()))
        });

        let tiers: BTreeMap<_, _> = join_all(checks).await.into_iter().collect();
        let report = HealthReport::new(tiers, self.clock.now());

        for tier in report.failing() {
            if let Some(health) = report.tiers.get(&tier) {
                warn!(tier = %tier, status = %health.status, detail = %health.detail, "Tier health check failed");
            }
        }
        report
    }

    /// Get metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared metrics collector
    pub fn metrics_handle(&self) -> Arc<CacheMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Mounted tiers, fastest first
    pub fn tiers(&self) -> Vec<CacheTier> {
        self.tiers.keys().copied().collect()
    }

    /// Mounted tier by id
    pub fn tier(&self, id: CacheTier) -> Option<&Tier> {
        self.tiers.get(&id)
    }

    /// Cascading read order
    pub fn read_order(&self) -> &[CacheTier] {
        &self.read_order
    }

    /// Semantic tier handle
    pub fn semantic(&self) -> Option<&Arc<SemanticCache>> {
        self.semantic.as_ref()
    }

    fn select(&self, requested: Option<&[CacheTier]>, default: Vec<CacheTier>) -> Vec<&Tier> {
        let ids = requested.map(|r| r.to_vec()).unwrap_or(default);
        ids.iter().filter_map(|id| self.tiers.get(id)).collect()
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("tiers", &self.tiers.values().collect::<Vec<_>>())
            .field("read_order", &self.read_order)
            .field("promotion", &self.promotion)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`CacheManager`] from backends
pub struct CacheManagerBuilder {
    backends: BTreeMap<CacheTier, (Arc<dyn CacheBackend>, TierOptions)>,
    semantic: Option<Arc<SemanticCache>>,
    policy: Arc<dyn WritePolicy>,
    read_order: Option<Vec<CacheTier>>,
    promotion: PromotionConfig,
    probe_ttl: Duration,
    clock: SharedClock,
    metrics: Arc<CacheMetrics>,
}

impl CacheManagerBuilder {
    /// Empty builder with the default size-tiered policy
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            semantic: None,
            policy: Arc::new(SizeTieredPolicy::default()),
            read_order: None,
            promotion: PromotionConfig::default(),
            probe_ttl: DEFAULT_PROBE_TTL,
            clock: system_clock(),
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    /// Mount a backend in a persistent slot (L2..L5). Remounting replaces.
    pub fn mount(mut self, id: CacheTier, backend: Arc<dyn CacheBackend>, options: TierOptions) -> Self {
        self.backends.insert(id, (backend, options));
        self
    }

    /// Mount the L1 fast cache
    pub fn fast(self, cache: Arc<FastCache>, options: TierOptions) -> Self {
        self.mount(CacheTier::L1Memory, cache, options)
    }

    /// Mount the L6 semantic cache
    pub fn semantic(mut self, cache: Arc<SemanticCache>, options: TierOptions) -> Self {
        self.semantic = Some(Arc::clone(&cache));
        self.mount(CacheTier::L6Semantic, cache, options)
    }

    /// Replace the write policy
    pub fn write_policy(mut self, policy: Arc<dyn WritePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Override the cascading read order
    pub fn read_order(mut self, order: Vec<CacheTier>) -> Self {
        self.read_order = Some(order);
        self
    }

    /// Promotion behaviour
    pub fn promotion(mut self, promotion: PromotionConfig) -> Self {
        self.promotion = promotion;
        self
    }

    /// TTL of health probe keys
    pub fn probe_ttl(mut self, ttl: Duration) -> Self {
        self.probe_ttl = ttl;
        self
    }

    /// Time source for promotion lifetimes and report timestamps
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Share an existing metrics collector
    pub fn metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validate and assemble
    pub fn build(self) -> Result<CacheManager> {
        if self.backends.contains_key(&CacheTier::L6Semantic) && self.semantic.is_none() {
            return Err(Error::Config(
                "the semantic slot only accepts a SemanticCache".to_string(),
            ));
        }
        let read_order = match self.read_order {
            Some(order) => {
                for (i, id) in order.iter().enumerate() {
                    if !self.backends.contains_key(id) {
                        return Err(Error::Config(format!(
                            "read order names {} which is not mounted",
                            id
                        )));
                    }
                    if order[..i].contains(id) {
                        return Err(Error::Config(format!("read order repeats {}", id)));
                    }
                }
                order
            }
            None => self
                .backends
                .keys()
                .copied()
                .filter(|id| *id != CacheTier::L6Semantic)
                .collect(),
        };

        let metrics = self.metrics;
        let tiers: BTreeMap<CacheTier, Tier> = self
            .backends
            .into_iter()
            .map(|(id, (backend, options))| {
                let tier = Tier::new(id, backend, Arc::clone(&metrics))
                    .with_timeout(options.timeout)
                    .with_default_ttl(options.default_ttl);
                (id, tier)
            })
            .collect();

        info!(
            tiers = ?tiers.keys().collect::<Vec<_>>(),
            read_order = ?read_order,
            "Cache manager initialized"
        );

        Ok(CacheManager {
            tiers,
            semantic: self.semantic,
            read_order,
            policy: self.policy,
            promotion: self.promotion,
            probe_ttl: self.probe_ttl,
            clock: self.clock,
            metrics,
        })
    }
}

impl Default for CacheManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
