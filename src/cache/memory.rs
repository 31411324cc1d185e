//! In-Process Record Store
//!
//! Whole-record, document-style backend on a sharded concurrent map. Mounted
//! in the document/key-value slots when no external store is configured, and
//! used as the node type behind [`ShardedBackend`](super::sharded::ShardedBackend).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::backend::{ratio, BackendStats, CacheBackend};
use super::clock::{system_clock, SharedClock};
use super::record::{CacheRecord, Lifetime, TagSet};
use crate::error::Result;

/// In-memory backend (for testing and embedded tiers)
pub struct MemoryBackend {
    name: String,
    /// Storage (key -> record) - sharded for better concurrency
    storage: DashMap<String, CacheRecord>,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, system_clock())
    }

    /// Create a backend reading time from `clock`
    pub fn with_clock(name: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            storage: DashMap::new(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of stored records, expired ones included until swept
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Total writes accepted
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheRecord>> {
        let now = self.clock.now();

        let found = match self.storage.get_mut(key) {
            Some(mut record) if !record.is_expired(now) => {
                record.touch(now);
                Some(record.clone())
            }
            Some(_) => None,
            None => None,
        };

        match found {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(record))
            }
            None => {
                // Lazy expiry; the guard on the shard is released above
                self.storage.remove_if(key, |_, record| record.is_expired(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .storage
            .get(key)
            .map(|record| !record.is_expired(now))
            .unwrap_or(false))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: &TagSet,
    ) -> Result<()> {
        let record = CacheRecord::new(key, value, ttl, tags.clone(), self.clock.now());
        self.storage.insert(key.to_string(), record);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Lifetime>> {
        let now = self.clock.now();
        Ok(self
            .storage
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.lifetime(now)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.storage.remove(key).is_some())
    }

    async fn delete_by_tags(&self, tags: &TagSet) -> Result<u64> {
        let mut removed = 0;
        self.storage.retain(|_, record| {
            let doomed = record.has_any_tag(tags);
            removed += doomed as u64;
            !doomed
        });
        Ok(removed)
    }

    async fn clear_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut removed = 0;
        self.storage.retain(|_, record| {
            let expired = record.is_expired(now);
            removed += expired as u64;
            !expired
        });
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.storage.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<BackendStats> {
        let mut stats = BackendStats::named(&self.name);
        for entry in self.storage.iter() {
            stats.observe(entry.value());
        }
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        stats.hits = Some(hits);
        stats.misses = Some(misses);
        stats.hit_rate = Some(ratio(hits, misses));
        Ok(stats)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::record::tag_set;

    #[tokio::test]
    async fn test_memory_backend_round_trip() {
        let backend = MemoryBackend::new("doc");
        backend
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(60)), &TagSet::new())
            .await
            .unwrap();

        let record = backend.get("k").await.unwrap().unwrap();
        assert_eq!(record.value.as_ref(), b"v");
        assert_eq!(record.access_count, 1);

        let record = backend.get("k").await.unwrap().unwrap();
        assert_eq!(record.access_count, 2);
    }

    #[tokio::test]
    async fn test_memory_backend_set_replaces_everything() {
        let clock = ManualClock::default();
        let backend = MemoryBackend::with_clock("doc", clock.shared());

        backend
            .set("k", Bytes::from_static(b"v1"), Some(Duration::from_secs(5)), &tag_set(["a"]))
            .await
            .unwrap();
        backend.get("k").await.unwrap();
        backend
            .set("k", Bytes::from_static(b"v2"), None, &tag_set(["b"]))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(10));

        let record = backend.get("k").await.unwrap().unwrap();
        assert_eq!(record.value.as_ref(), b"v2");
        assert_eq!(record.tags, tag_set(["b"]));
        assert_eq!(record.access_count, 1);
        assert_eq!(record.expires_at, None);
    }

    #[tokio::test]
    async fn test_memory_backend_lazy_expiry() {
        let clock = ManualClock::default();
        let backend = MemoryBackend::with_clock("doc", clock.shared());

        backend
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(60)), &TagSet::new())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(61));

        assert!(backend.get("k").await.unwrap().is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_memory_backend_clear_expired() {
        let clock = ManualClock::default();
        let backend = MemoryBackend::with_clock("doc", clock.shared());

        for (key, ttl) in [("a", 1u64), ("b", 1), ("c", 100)] {
            backend
                .set(key, Bytes::from_static(b"v"), Some(Duration::from_secs(ttl)), &TagSet::new())
                .await
                .unwrap();
        }
        clock.advance(Duration::from_secs(2));

        assert_eq!(backend.clear_expired().await.unwrap(), 2);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_backend_delete_by_tags() {
        let backend = MemoryBackend::new("doc");
        backend.set("u1", Bytes::from_static(b"1"), None, &tag_set(["user"])).await.unwrap();
        backend.set("u2", Bytes::from_static(b"2"), None, &tag_set(["user", "vip"])).await.unwrap();
        backend.set("o1", Bytes::from_static(b"3"), None, &tag_set(["order"])).await.unwrap();
        backend.set("n", Bytes::from_static(b"4"), None, &TagSet::new()).await.unwrap();

        assert_eq!(backend.delete_by_tags(&tag_set(["user"])).await.unwrap(), 2);
        assert!(backend.get("o1").await.unwrap().is_some());
        assert!(backend.get("n").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_backend_stats() {
        let backend = MemoryBackend::new("doc");
        backend.set("a", Bytes::from_static(b"12345"), None, &TagSet::new()).await.unwrap();
        backend.set("b", Bytes::from_static(b"123"), None, &TagSet::new()).await.unwrap();
        backend.get("a").await.unwrap();
        backend.get("a").await.unwrap();
        backend.get("zzz").await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.backend, "doc");
        assert_eq!(stats.item_count, 2);
        assert_eq!(stats.total_bytes, 8);
        assert_eq!(stats.total_accesses, 2);
        assert_eq!(stats.avg_access_count, 1.0);
        assert_eq!(stats.hits, Some(2));
        assert_eq!(stats.misses, Some(1));
    }

    #[tokio::test]
    async fn test_memory_backend_ttl_is_not_an_access() {
        let clock = ManualClock::default();
        let backend = MemoryBackend::with_clock("doc", clock.shared());
        backend
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(60)), &TagSet::new())
            .await
            .unwrap();
        backend.set("forever", Bytes::from_static(b"v"), None, &TagSet::new()).await.unwrap();

        clock.advance(Duration::from_secs(15));
        assert_eq!(
            backend.ttl("k").await.unwrap(),
            Some(Lifetime::Remaining(Duration::from_secs(45)))
        );
        assert_eq!(backend.ttl("forever").await.unwrap(), Some(Lifetime::Unbounded));
        assert_eq!(backend.ttl("missing").await.unwrap(), None);

        clock.advance(Duration::from_secs(46));
        assert_eq!(backend.ttl("k").await.unwrap(), None);

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.total_accesses, 0);
        assert_eq!(stats.hits, Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_backend_removal_counts_ignore_concurrent_inserts() {
        use std::sync::Arc;

        let backend = Arc::new(MemoryBackend::new("doc"));
        for i in 0..500 {
            backend
                .set(&format!("tagged-{}", i), Bytes::from_static(b"v"), None, &tag_set(["t"]))
                .await
                .unwrap();
        }

        let writer = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                for i in 0..2000 {
                    backend
                        .set(&format!("plain-{}", i), Bytes::from_static(b"v"), None, &TagSet::new())
                        .await
                        .unwrap();
                }
            })
        };

        let removed = backend.delete_by_tags(&tag_set(["t"])).await.unwrap();
        writer.await.unwrap();

        assert_eq!(removed, 500);
        assert_eq!(backend.len(), 2000);
    }
}
