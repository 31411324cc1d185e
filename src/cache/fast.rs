//! L1 Cache - In-Process Fast Cache
//!
//! Bounded LRU store with per-record TTL.
//!
//! # Design
//!
//! - `lru::LruCache` gives O(1) lookup and O(1) move-to-most-recent
//! - One `parking_lot::Mutex` per instance: every read reorders the recency
//!   list, so readers cannot share a read lock
//! - Eviction always drops the least recently used record, regardless of its
//!   remaining TTL
//! - Expired records are removed lazily on read or by [`FastCache::clear_expired`]

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::backend::{ratio, BackendStats, CacheBackend, ProbeOutcome};
use super::clock::{system_clock, SharedClock};
use super::record::{BatchEntry, CacheRecord, Lifetime, TagSet};
use super::DEFAULT_FAST_CAPACITY;
use crate::error::{Error, Result};

/// How long a health probe waits for the lock before reporting failure
const PROBE_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// L1 cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastCacheConfig {
    /// Mount the tier at all
    pub enabled: bool,
    /// Maximum number of records
    pub max_entries: usize,
    /// TTL for writes that do not carry one; `None` never expires
    pub default_ttl_secs: Option<u64>,
}

impl Default for FastCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_FAST_CAPACITY,
            default_ttl_secs: Some(3600),
        }
    }
}

impl FastCacheConfig {
    /// Default TTL as a duration
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

/// L1 cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FastCacheStats {
    /// Hit count
    pub hits: u64,
    /// Miss count (including reads of expired records)
    pub misses: u64,
    /// Capacity evictions
    pub evictions: u64,
    /// Records dropped because they had expired
    pub expirations: u64,
    /// Current number of records
    pub size: usize,
    /// Maximum number of records
    pub capacity: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

/// L1 cache - bounded in-process LRU with TTL
pub struct FastCache {
    /// Recency-ordered storage
    storage: Mutex<LruCache<String, CacheRecord>>,
    /// Fallback TTL
    default_ttl: Option<Duration>,
    /// Time source
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl FastCache {
    /// Create an L1 cache with the default capacity
    pub fn new() -> Self {
        Self::with_config(&FastCacheConfig::default())
    }

    /// Create an L1 cache from configuration
    pub fn with_config(config: &FastCacheConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create an L1 cache reading time from `clock`
    pub fn with_clock(config: &FastCacheConfig, clock: SharedClock) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            storage: Mutex::new(LruCache::new(capacity)),
            default_ttl: config.default_ttl(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get a live record and mark it most recently used
    pub fn get(&self, key: &str) -> Option<CacheRecord> {
        let now = self.clock.now();
        let mut storage = self.storage.lock();

        let expired = match storage.get_mut(key) {
            Some(record) if record.is_expired(now) => true,
            Some(record) => {
                record.touch(now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(record.clone());
            }
            None => false,
        };

        if expired {
            storage.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            trace!(key, "Dropped expired L1 record on read");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Get only the payload
    pub fn get_value(&self, key: &str) -> Option<Bytes> {
        self.get(key).map(|record| record.value)
    }

    /// Insert or replace a record, evicting the LRU record if a new key
    /// arrives at capacity. `ttl = None` uses the configured default.
    pub fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>, tags: TagSet) {
        let record = CacheRecord::new(key, value, ttl.or(self.default_ttl), tags, self.clock.now());
        let mut storage = self.storage.lock();

        if !storage.contains(key) && storage.len() >= storage.cap().get() {
            if let Some((evicted, _)) = storage.pop_lru() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted = %evicted, incoming = key, "Evicted least recently used L1 record");
            }
        }
        storage.put(key.to_string(), record);
    }

    /// Remove a record
    pub fn delete(&self, key: &str) -> bool {
        self.storage.lock().pop(key).is_some()
    }

    /// Remove every record whose tags intersect `tags`
    pub fn delete_by_tags(&self, tags: &TagSet) -> u64 {
        let mut storage = self.storage.lock();
        let doomed: Vec<String> = storage
            .iter()
            .filter(|(_, record)| record.has_any_tag(tags))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            storage.pop(key);
        }
        doomed.len() as u64
    }

    /// Remove every expired record
    pub fn clear_expired(&self) -> u64 {
        let now = self.clock.now();
        let mut storage = self.storage.lock();
        let doomed: Vec<String> = storage
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            storage.pop(key);
        }
        self.expirations
            .fetch_add(doomed.len() as u64, Ordering::Relaxed);
        doomed.len() as u64
    }

    /// Check for a live record without touching recency or counters
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.storage
            .lock()
            .peek(key)
            .map(|record| !record.is_expired(now))
            .unwrap_or(false)
    }

    /// Remaining lifetime of a live record, without touching recency or counters
    pub fn ttl(&self, key: &str) -> Option<Lifetime> {
        let now = self.clock.now();
        self.storage
            .lock()
            .peek(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.lifetime(now))
    }

    /// Drop all records
    pub fn clear(&self) {
        self.storage.lock().clear();
    }

    /// Number of records held (expired ones included until removed)
    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of records
    pub fn capacity(&self) -> usize {
        self.storage.lock().cap().get()
    }

    /// Get cache statistics
    pub fn stats(&self) -> FastCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let storage = self.storage.lock();
        FastCacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size: storage.len(),
            capacity: storage.cap().get(),
            hit_rate: ratio(hits, misses),
        }
    }
}

impl Default for FastCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for FastCache {
    fn name(&self) -> &str {
        "memory-lru"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheRecord>> {
        Ok(FastCache::get(self, key))
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(FastCache::contains(self, key))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: &TagSet,
    ) -> Result<()> {
        FastCache::set(self, key, value, ttl, tags.clone());
        Ok(())
    }

    async fn set_many(&self, entries: &[BatchEntry]) -> Result<u64> {
        for entry in entries {
            FastCache::set(self, &entry.key, entry.value.clone(), entry.ttl, entry.tags.clone());
        }
        Ok(entries.len() as u64)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Lifetime>> {
        Ok(FastCache::ttl(self, key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(FastCache::delete(self, key))
    }

    async fn delete_by_tags(&self, tags: &TagSet) -> Result<u64> {
        Ok(FastCache::delete_by_tags(self, tags))
    }

    async fn clear_expired(&self) -> Result<u64> {
        Ok(FastCache::clear_expired(self))
    }

    async fn clear(&self) -> Result<()> {
        FastCache::clear(self);
        Ok(())
    }

    async fn stats(&self) -> Result<BackendStats> {
        let counters = FastCache::stats(self);
        let mut stats = BackendStats::named(self.name());
        for (_, record) in self.storage.lock().iter() {
            stats.observe(record);
        }
        stats.hits = Some(counters.hits);
        stats.misses = Some(counters.misses);
        stats.evictions = Some(counters.evictions);
        stats.hit_rate = Some(counters.hit_rate);
        Ok(stats)
    }

    /// Round trip without moving hit/miss counters. A full cache is not
    /// written to, so the probe never evicts a live record.
    async fn probe(&self, key: &str, value: Bytes, ttl: Duration) -> Result<ProbeOutcome> {
        let Some(mut storage) = self.storage.try_lock_for(PROBE_LOCK_TIMEOUT) else {
            return Err(Error::unavailable(self.name(), "lock busy"));
        };
        if storage.len() >= storage.cap().get() {
            return Ok(ProbeOutcome::Skipped(
                "capacity full; probe skipped to avoid eviction",
            ));
        }

        let record = CacheRecord::new(key, value.clone(), Some(ttl), TagSet::new(), self.clock.now());
        storage.put(key.to_string(), record);
        let intact = storage
            .peek(key)
            .map(|record| record.value == value)
            .unwrap_or(false);
        storage.pop(key);
        Ok(if intact {
            ProbeOutcome::RoundTrip
        } else {
            ProbeOutcome::Mismatch
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
