//! Distributed Key-Value Backend
//!
//! Spreads keys over N node backends the way a client-side cluster driver
//! does: each key lives on exactly one node, chosen by a stable hash of the
//! key. Point operations touch one node; bulk operations fan out to every
//! node concurrently and aggregate.
//!
//! A node that fails only takes its own keys with it. Bulk operations succeed
//! as long as one node answered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use tracing::warn;

use super::backend::{BackendStats, CacheBackend};
use super::clock::SharedClock;
use super::memory::MemoryBackend;
use super::record::{BatchEntry, CacheRecord, Lifetime, TagSet};
use crate::error::{Error, Result};

/// Stable non-cryptographic hash (FxHash algorithm).
///
/// Must not change between releases: it decides which node owns a key.
#[inline]
pub fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Key-sharded cluster of backends
pub struct ShardedBackend {
    name: String,
    nodes: Vec<Arc<dyn CacheBackend>>,
}

impl ShardedBackend {
    /// Build a cluster from node backends
    pub fn new(name: impl Into<String>, nodes: Vec<Arc<dyn CacheBackend>>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::Config(
                "sharded backend needs at least one node".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            nodes,
        })
    }

    /// Cluster of `count` in-process nodes sharing `clock`
    pub fn in_memory(name: impl Into<String>, count: usize, clock: SharedClock) -> Result<Self> {
        let name = name.into();
        let nodes = (0..count)
            .map(|i| {
                Arc::new(MemoryBackend::with_clock(format!("{}-{}", name, i), clock.clone()))
                    as Arc<dyn CacheBackend>
            })
            .collect();
        Self::new(name, nodes)
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Index of the node owning `key`
    #[inline]
    pub fn node_index(&self, key: &str) -> usize {
        (fx_hash(key.as_bytes()) % self.nodes.len() as u64) as usize
    }

    fn node_for(&self, key: &str) -> &Arc<dyn CacheBackend> {
        &self.nodes[self.node_index(key)]
    }

    /// Sum per-node results, tolerating failed nodes unless all failed
    fn fold_counts(&self, op: &'static str, results: Vec<Result<u64>>) -> Result<u64> {
        let mut total = 0;
        let mut answered = false;
        let mut last_err = None;

        for (node, result) in self.nodes.iter().zip(results) {
            match result {
                Ok(n) => {
                    total += n;
                    answered = true;
                }
                Err(e) => {
                    warn!(cluster = %self.name, node = node.name(), op, error = %e, "Cluster node failed");
                    last_err = Some(e);
                }
            }
        }

        match (answered, last_err) {
            (false, Some(e)) => Err(e),
            _ => Ok(total),
        }
    }
}

#[async_trait]
impl CacheBackend for ShardedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheRecord>> {
        self.node_for(key).get(key).await
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        self.node_for(key).contains(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: &TagSet,
    ) -> Result<()> {
        self.node_for(key).set(key, value, ttl, tags).await
    }

    /// Each node receives its own keys as one batch
    async fn set_many(&self, entries: &[BatchEntry]) -> Result<u64> {
        let mut batches: Vec<Vec<BatchEntry>> = vec![Vec::new(); self.nodes.len()];
        for entry in entries {
            batches[self.node_index(&entry.key)].push(entry.clone());
        }

        let results = join_all(
            self.nodes
                .iter()
                .zip(&batches)
                .filter(|(_, batch)| !batch.is_empty())
                .map(|(node, batch)| node.set_many(batch)),
        )
        .await;

        let mut stored = 0;
        for result in results {
            stored += result?;
        }
        Ok(stored)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Lifetime>> {
        self.node_for(key).ttl(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.node_for(key).delete(key).await
    }

    async fn delete_by_tags(&self, tags: &TagSet) -> Result<u64> {
        let results = join_all(self.nodes.iter().map(|n| n.delete_by_tags(tags))).await;
        self.fold_counts("delete_by_tags", results)
    }

    async fn clear_expired(&self) -> Result<u64> {
        let results = join_all(self.nodes.iter().map(|n| n.clear_expired())).await;
        self.fold_counts("clear_expired", results)
    }

    async fn clear(&self) -> Result<()> {
        let results = join_all(self.nodes.iter().map(|n| async move {
            n.clear().await.map(|_| 0)
        }))
        .await;
        self.fold_counts("clear", results).map(|_| ())
    }

    async fn stats(&self) -> Result<BackendStats> {
        let results = join_all(self.nodes.iter().map(|n| n.stats())).await;

        let mut total = BackendStats::named(&self.name);
        let mut answered = false;
        let mut last_err = None;
        for (node, result) in self.nodes.iter().zip(results) {
            match result {
                Ok(stats) => {
                    total.merge(&stats);
                    answered = true;
                }
                Err(e) => {
                    warn!(cluster = %self.name, node = node.name(), op = "stats", error = %e, "Cluster node failed");
                    last_err = Some(e);
                }
            }
        }

        match (answered, last_err) {
            (false, Some(e)) => Err(e),
            _ => Ok(total),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
