//! Cache Backend Contract
//!
//! Every tier, whatever technology sits behind it, implements
//! [`CacheBackend`]. Implementations return `Result` and may fail freely;
//! the [`Tier`] wrapper is the boundary where failures are logged, counted
//! and converted into misses so the manager never sees an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use super::metrics::{CacheMetrics, LatencyTracker};
use super::record::{BatchEntry, CacheRecord, Lifetime, TagSet};
use super::tier::CacheTier;
use crate::error::{Error, Result};

/// Uniform contract for every cache tier
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Human-readable backend name, used in logs and stats
    fn name(&self) -> &str;

    /// Fetch a live record. Expired records are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>>;

    /// True if a live record exists. Not an access: bookkeeping is untouched.
    ///
    /// The default falls back to `get`; backends whose reads mutate
    /// bookkeeping override it.
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Insert or fully replace the record stored under `key`
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>, tags: &TagSet)
        -> Result<()>;

    /// Write several records, returning how many were stored.
    ///
    /// The default writes them one at a time and stops at the first failure.
    async fn set_many(&self, entries: &[BatchEntry]) -> Result<u64> {
        for entry in entries {
            self.set(&entry.key, entry.value.clone(), entry.ttl, &entry.tags)
                .await?;
        }
        Ok(entries.len() as u64)
    }

    /// Remaining lifetime of a live record, `None` if absent or expired.
    ///
    /// The default reads through `get`, so it counts as an access, and
    /// measures from the read's `last_accessed_at` stamp.
    async fn ttl(&self, key: &str) -> Result<Option<Lifetime>> {
        Ok(self
            .get(key)
            .await?
            .map(|record| record.lifetime(record.last_accessed_at)))
    }

    /// Remove one record, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every record whose tags intersect `tags`
    async fn delete_by_tags(&self, tags: &TagSet) -> Result<u64>;

    /// Physically remove every expired record
    async fn clear_expired(&self) -> Result<u64>;

    /// Remove everything
    async fn clear(&self) -> Result<()>;

    /// Backend summary
    async fn stats(&self) -> Result<BackendStats>;

    /// Write a synthetic key and read it back.
    ///
    /// Leaves the key in place; [`Tier::probe`] deletes it afterwards under
    /// its own deadline.
    async fn probe(&self, key: &str, value: Bytes, ttl: Duration) -> Result<ProbeOutcome> {
        self.set(key, value.clone(), Some(ttl), &TagSet::new())
            .await?;
        Ok(match self.get(key).await? {
            Some(record) if record.value == value => ProbeOutcome::RoundTrip,
            _ => ProbeOutcome::Mismatch,
        })
    }
}

/// Result of a health probe that reached the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The value was written and read back intact
    RoundTrip,
    /// The backend answered but the value did not come back
    Mismatch,
    /// The backend declined to write, with the reason
    Skipped(&'static str),
}

/// Backend statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendStats {
    /// Backend name
    pub backend: String,
    /// Records currently stored (may include not yet swept expired records)
    pub item_count: u64,
    /// Payload bytes stored
    pub total_bytes: u64,
    /// Sum of access counts over stored records
    pub total_accesses: u64,
    /// Mean access count per record
    pub avg_access_count: f64,
    /// Hits, for backends that track them
    pub hits: Option<u64>,
    /// Misses, for backends that track them
    pub misses: Option<u64>,
    /// Capacity evictions, for bounded backends
    pub evictions: Option<u64>,
    /// Hit rate (0.0 - 1.0), for backends that track hits
    pub hit_rate: Option<f64>,
    /// Oldest creation timestamp among stored records
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Newest write or access timestamp among stored records
    pub newest_entry: Option<DateTime<Utc>>,
}

impl BackendStats {
    /// Empty stats for a named backend
    pub fn named(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            ..Default::default()
        }
    }

    /// Fold one stored record into the aggregates
    pub fn observe(&mut self, record: &CacheRecord) {
        self.item_count += 1;
        self.total_bytes += record.size() as u64;
        self.total_accesses += record.access_count;
        self.oldest_entry = Some(match self.oldest_entry {
            Some(t) => t.min(record.created_at),
            None => record.created_at,
        });
        self.newest_entry = Some(match self.newest_entry {
            Some(t) => t.max(record.last_accessed_at),
            None => record.last_accessed_at,
        });
        self.refresh_average();
    }

    /// Add another backend's aggregates into this one
    pub fn merge(&mut self, other: &BackendStats) {
        self.item_count += other.item_count;
        self.total_bytes += other.total_bytes;
        self.total_accesses += other.total_accesses;
        self.hits = sum_opt(self.hits, other.hits);
        self.misses = sum_opt(self.misses, other.misses);
        self.evictions = sum_opt(self.evictions, other.evictions);
        self.oldest_entry = match (self.oldest_entry, other.oldest_entry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.newest_entry = match (self.newest_entry, other.newest_entry) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.hit_rate = match (self.hits, self.misses) {
            (Some(h), Some(m)) => Some(ratio(h, m)),
            _ => None,
        };
        self.refresh_average();
    }

    fn refresh_average(&mut self) {
        self.avg_access_count = if self.item_count == 0 {
            0.0
        } else {
            self.total_accesses as f64 / self.item_count as f64
        };
    }
}

fn sum_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    }
}

/// hits / (hits + misses), 0.0 when nothing was looked up
pub fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// =============================================================================
// Guarded tier
// =============================================================================

/// A backend mounted in a tier slot.
///
/// Catches every backend failure and timeout, logs it with the tier, operation
/// and key, counts it, and returns a negative result instead.
#[derive(Clone)]
pub struct Tier {
    id: CacheTier,
    backend: Arc<dyn CacheBackend>,
    timeout: Option<Duration>,
    default_ttl: Option<Duration>,
    metrics: Arc<CacheMetrics>,
}

impl Tier {
    /// Mount a backend in a tier slot
    pub fn new(id: CacheTier, backend: Arc<dyn CacheBackend>, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            id,
            backend,
            timeout: None,
            default_ttl: None,
            metrics,
        }
    }

    /// Per-call deadline; exceeding it counts as a backend failure
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// TTL applied when a write does not specify one
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Slot this backend occupies
    pub fn id(&self) -> CacheTier {
        self.id
    }

    /// Underlying backend
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Default TTL for writes into this tier
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Read a record, recording a per-tier hit or miss
    pub async fn get(&self, key: &str) -> Option<CacheRecord> {
        let tracker = LatencyTracker::start();
        let result = self.guard("get", key, self.backend.get(key)).await.flatten();
        self.metrics.record_read_latency(self.id, tracker.elapsed());

        match result {
            Some(record) => {
                self.metrics.record_tier_hit(self.id);
                Some(record)
            }
            None => {
                self.metrics.record_tier_miss(self.id);
                None
            }
        }
    }

    /// Existence check; moves no hit/miss counters
    pub async fn contains(&self, key: &str) -> bool {
        self.guard("contains", key, self.backend.contains(key))
            .await
            .unwrap_or(false)
    }

    /// Write a record; `ttl = None` falls back to the tier default
    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>, tags: &TagSet) -> bool {
        let ttl = ttl.or(self.default_ttl);
        let tracker = LatencyTracker::start();
        let ok = self
            .guard("set", key, self.backend.set(key, value, ttl, tags))
            .await
            .is_some();
        self.metrics.record_write_latency(self.id, tracker.elapsed());

        if ok {
            self.metrics.record_write(self.id);
        } else {
            self.metrics.record_write_failure(self.id);
        }
        ok
    }

    /// Write a batch; `ttl = None` entries take the tier default. True only
    /// if the whole batch was stored.
    pub async fn set_many(&self, entries: &[BatchEntry]) -> bool {
        let entries: Vec<BatchEntry> = entries
            .iter()
            .cloned()
            .map(|mut entry| {
                entry.ttl = entry.ttl.or(self.default_ttl);
                entry
            })
            .collect();

        let tracker = LatencyTracker::start();
        let stored = self
            .guard("set_many", "", self.backend.set_many(&entries))
            .await;
        self.metrics.record_write_latency(self.id, tracker.elapsed());

        match stored {
            Some(count) if count == entries.len() as u64 => {
                self.metrics.record_writes(self.id, count);
                true
            }
            Some(count) => {
                self.metrics.record_writes(self.id, count);
                self.metrics.record_write_failure(self.id);
                false
            }
            None => {
                self.metrics.record_write_failure(self.id);
                false
            }
        }
    }

    /// Remaining lifetime of `key`; moves no hit/miss counters
    pub async fn ttl(&self, key: &str) -> Option<Lifetime> {
        self.guard("ttl", key, self.backend.ttl(key)).await.flatten()
    }

    /// Delete one record
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self
            .guard("delete", key, self.backend.delete(key))
            .await
            .unwrap_or(false);
        if removed {
            self.metrics.record_deletes(self.id, 1);
        }
        removed
    }

    /// Delete every record carrying any of `tags`
    pub async fn delete_by_tags(&self, tags: &TagSet) -> u64 {
        let removed = self
            .guard("delete_by_tags", "", self.backend.delete_by_tags(tags))
            .await
            .unwrap_or(0);
        self.metrics.record_deletes(self.id, removed);
        removed
    }

    /// Eager expiry sweep
    pub async fn clear_expired(&self) -> u64 {
        let removed = self
            .guard("clear_expired", "", self.backend.clear_expired())
            .await
            .unwrap_or(0);
        if removed > 0 {
            debug!(tier = %self.id, removed, "Swept expired records");
        }
        removed
    }

    /// Remove everything
    pub async fn clear(&self) -> bool {
        self.guard("clear", "", self.backend.clear()).await.is_some()
    }

    /// Backend statistics, `None` if the backend could not report
    pub async fn stats(&self) -> Option<BackendStats> {
        self.guard("stats", "", self.backend.stats()).await
    }

    /// Health probe. Errors are returned, not swallowed, and no metrics move.
    ///
    /// The round trip and the cleanup delete each get the tier deadline, so
    /// a stalled read still leaves no probe key behind.
    pub async fn probe(&self, key: &str, value: Bytes, ttl: Duration) -> Result<ProbeOutcome> {
        let outcome = self.run("probe", self.backend.probe(key, value, ttl)).await;
        let cleanup = self.run("probe_cleanup", self.backend.delete(key)).await;

        let outcome = outcome?;
        cleanup?;
        Ok(outcome)
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    tier: self.id.to_string(),
                    op: op.to_string(),
                }),
            },
            None => fut.await,
        }
    }

    /// Run a backend call under the tier's deadline, logging and counting
    /// any failure and converting it to `None`
    pub(crate) async fn guard<T, F>(&self, op: &'static str, key: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.run(op, fut).await {
            Ok(value) => Some(value),
            Err(e) => {
                if matches!(e, Error::Timeout { .. }) {
                    self.metrics.record_timeout(self.id);
                }
                self.metrics.record_error(self.id);
                error!(
                    tier = %self.id,
                    backend = self.backend.name(),
                    op,
                    key,
                    kind = %e.kind(),
                    error = %e,
                    "Cache tier operation failed"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
