//! L6 Cache - Semantic Cache
//!
//! Serves values for text that is *approximately* equal to text seen before.
//! Lookups normalize the query, embed it through an external [`Embedder`],
//! and linearly scan every stored embedding for the closest match above a
//! similarity threshold.
//!
//! # Design
//!
//! - One `parking_lot::RwLock` over the entry map; the scan runs under the
//!   read lock and only the winning entry's bookkeeping takes the write lock
//! - Embedding happens before any lock is taken
//! - Entries are keyed by their normalized text, so paraphrases that
//!   normalize identically replace each other

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::backend::{ratio, BackendStats, CacheBackend};
use super::clock::{system_clock, SharedClock};
use super::record::{CacheRecord, Lifetime, TagSet};
use super::sharded::fx_hash;
use super::DEFAULT_SIMILARITY_THRESHOLD;
use crate::error::{Error, Result};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));

// =============================================================================
// Embedding
// =============================================================================

/// External embedding/similarity function
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed already-normalized text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Similarity between two embeddings on a 0-1 scale
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }
}

/// Cosine similarity; 0.0 for zero-length or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// No model, no network. Good enough to match reworded queries that share
/// most of their vocabulary.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    /// Embedder producing `dimensions`-wide vectors
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Vector width
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let hash = fx_hash(token.as_bytes());
            let slot = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Text normalization applied before embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationRules {
    /// Trim and collapse runs of whitespace to one space
    pub collapse_whitespace: bool,
    /// Drop everything that is not a word character or whitespace
    pub strip_punctuation: bool,
    /// Lowercase
    pub lowercase: bool,
}

impl Default for NormalizationRules {
    fn default() -> Self {
        Self {
            collapse_whitespace: true,
            strip_punctuation: true,
            lowercase: true,
        }
    }
}

impl NormalizationRules {
    /// Normalize `text`
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        if self.collapse_whitespace {
            out = WHITESPACE.replace_all(out.trim(), " ").into_owned();
        }
        if self.strip_punctuation {
            out = PUNCTUATION.replace_all(&out, "").into_owned();
        }
        if self.lowercase {
            out = out.to_lowercase();
        }
        out
    }
}

/// L6 cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Mount the tier at all
    pub enabled: bool,
    /// Minimum similarity for `get` (inclusive)
    pub threshold: f32,
    /// `search_similar` without an explicit threshold uses
    /// `threshold * search_threshold_factor`
    pub search_threshold_factor: f32,
    /// Entry cap; the least recently accessed entry goes when full
    pub max_entries: Option<usize>,
    /// TTL for writes that do not carry one
    pub default_ttl_secs: Option<u64>,
    /// Width of the built-in hashing embedder
    pub embedding_dimensions: usize,
    /// Normalization rules
    pub normalization: NormalizationRules,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            search_threshold_factor: 0.8,
            max_entries: None,
            default_ttl_secs: Some(86_400),
            embedding_dimensions: 256,
            normalization: NormalizationRules::default(),
        }
    }
}

impl SemanticConfig {
    /// Default TTL as a duration
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

// =============================================================================
// Cache
// =============================================================================

/// A stored text with its embedding
#[derive(Debug, Clone)]
struct SemanticEntry {
    embedding: Vec<f32>,
    record: CacheRecord,
}

/// A semantic lookup result
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMatch {
    /// Stored text as originally given to `set`
    pub text: String,
    /// Similarity between the query and the stored text
    pub similarity: f32,
    /// Matched record (bookkeeping as of this lookup)
    pub record: CacheRecord,
}

impl SemanticMatch {
    /// Cached payload
    pub fn value(&self) -> &Bytes {
        &self.record.value
    }
}

/// L6 cache - similarity-matched store
pub struct SemanticCache {
    config: SemanticConfig,
    embedder: Arc<dyn Embedder>,
    /// normalized text -> entry
    entries: RwLock<HashMap<String, SemanticEntry>>,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SemanticCache {
    /// Create a semantic cache using `embedder`
    pub fn new(config: SemanticConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            embedder,
            entries: RwLock::new(HashMap::new()),
            clock: system_clock(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a semantic cache with the built-in hashing embedder
    pub fn with_hashing_embedder(config: SemanticConfig) -> Self {
        let embedder = Arc::new(HashingEmbedder::new(config.embedding_dimensions));
        Self::new(config, embedder)
    }

    /// Read time from `clock` instead of the system clock
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Configured `get` threshold
    pub fn threshold(&self) -> f32 {
        self.config.threshold
    }

    /// Configuration
    pub fn config(&self) -> &SemanticConfig {
        &self.config
    }

    /// Normalize text with the configured rules
    pub fn normalize(&self, text: &str) -> String {
        self.config.normalization.apply(text)
    }

    async fn embed(&self, normalized: &str) -> Result<Vec<f32>> {
        let embedding = self.embedder.embed(normalized).await?;
        if embedding.is_empty() {
            return Err(Error::Embedding(format!(
                "empty embedding for {:?}",
                normalized
            )));
        }
        Ok(embedding)
    }

    /// Score every live entry at or above `min_similarity`
    fn scan(&self, query: &[f32], min_similarity: f32) -> Vec<(String, f32, CacheRecord)> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|(_, entry)| !entry.record.is_expired(now))
            .filter_map(|(normalized, entry)| {
                let score = self.embedder.similarity(query, &entry.embedding);
                (score >= min_similarity).then(|| (normalized.clone(), score, entry.record.clone()))
            })
            .collect()
    }

    /// Best match at or above `min_similarity` (default: the configured
    /// threshold). Ties go to the most recently written entry.
    pub async fn get(&self, text: &str, min_similarity: Option<f32>) -> Result<Option<SemanticMatch>> {
        let threshold = min_similarity.unwrap_or(self.config.threshold);
        let normalized = self.normalize(text);
        let query = self.embed(&normalized).await?;

        let best = self
            .scan(&query, threshold)
            .into_iter()
            .max_by(|a, b| {
                a.1.total_cmp(&b.1)
                    .then_with(|| a.2.created_at.cmp(&b.2.created_at))
            });

        let Some((matched, similarity, _)) = best else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(query = %normalized, threshold, "Semantic miss");
            return Ok(None);
        };

        let now = self.clock.now();
        let record = {
            let mut entries = self.entries.write();
            match entries.get_mut(&matched) {
                Some(entry) if !entry.record.is_expired(now) => {
                    entry.record.touch(now);
                    Some(entry.record.clone())
                }
                _ => None,
            }
        };

        match record {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(query = %normalized, matched = %record.key, similarity, "Semantic hit");
                Ok(Some(SemanticMatch {
                    text: record.key.clone(),
                    similarity,
                    record,
                }))
            }
            // Removed between scan and touch
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Up to `limit` matches, most similar first. Without an explicit
    /// threshold uses `threshold * search_threshold_factor`. Does not count
    /// as an access.
    pub async fn search_similar(
        &self,
        text: &str,
        limit: usize,
        min_similarity: Option<f32>,
    ) -> Result<Vec<SemanticMatch>> {
        let threshold = min_similarity
            .unwrap_or(self.config.threshold * self.config.search_threshold_factor);
        let query = self.embed(&self.normalize(text)).await?;

        let mut found = self.scan(&query, threshold);
        found.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| b.2.created_at.cmp(&a.2.created_at))
        });
        found.truncate(limit);

        Ok(found
            .into_iter()
            .map(|(_, similarity, record)| SemanticMatch {
                text: record.key.clone(),
                similarity,
                record,
            })
            .collect())
    }

    /// Store `value` for `text`. `ttl = None` uses the configured default.
    pub async fn set(
        &self,
        text: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: &TagSet,
    ) -> Result<()> {
        let normalized = self.normalize(text);
        let embedding = self.embed(&normalized).await?;
        let record = CacheRecord::new(
            text,
            value,
            ttl.or_else(|| self.config.default_ttl()),
            tags.clone(),
            self.clock.now(),
        );

        let mut entries = self.entries.write();
        if let Some(cap) = self.config.max_entries {
            if !entries.contains_key(&normalized) && entries.len() >= cap.max(1) {
                let victim = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.record.last_accessed_at)
                    .map(|(key, _)| key.clone());
                if let Some(victim) = victim {
                    entries.remove(&victim);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(evicted = %victim, "Evicted least recently accessed semantic entry");
                }
            }
        }
        entries.insert(normalized, SemanticEntry { embedding, record });
        Ok(())
    }

    /// Remaining lifetime of the entry whose normalized text equals
    /// `text`'s. Exact match only; no similarity search.
    pub fn ttl(&self, text: &str) -> Option<Lifetime> {
        let now = self.clock.now();
        let normalized = self.normalize(text);
        self.entries
            .read()
            .get(&normalized)
            .filter(|entry| !entry.record.is_expired(now))
            .map(|entry| entry.record.lifetime(now))
    }

    /// Remove the entry whose normalized text equals `text`'s
    pub fn delete(&self, text: &str) -> bool {
        let normalized = self.normalize(text);
        self.entries.write().remove(&normalized).is_some()
    }

    /// Remove every entry carrying any of `tags`
    pub fn delete_by_tags(&self, tags: &TagSet) -> u64 {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.record.has_any_tag(tags));
        (before - entries.len()) as u64
    }

    /// Remove every expired entry
    pub fn clear_expired(&self) -> u64 {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.record.is_expired(now));
        (before - entries.len()) as u64
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry summary
    pub fn stats(&self) -> BackendStats {
        let mut stats = BackendStats::named("semantic");
        for entry in self.entries.read().values() {
            stats.observe(&entry.record);
        }
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        stats.hits = Some(hits);
        stats.misses = Some(misses);
        stats.hit_rate = Some(ratio(hits, misses));
        stats.evictions = Some(self.evictions.load(Ordering::Relaxed));
        stats
    }
}

#[async_trait]
impl CacheBackend for SemanticCache {
    fn name(&self) -> &str {
        "semantic"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheRecord>> {
        Ok(SemanticCache::get(self, key, None).await?.map(|m| m.record))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: &TagSet,
    ) -> Result<()> {
        SemanticCache::set(self, key, value, ttl, tags).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Lifetime>> {
        Ok(SemanticCache::ttl(self, key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(SemanticCache::delete(self, key))
    }

    async fn delete_by_tags(&self, tags: &TagSet) -> Result<u64> {
        Ok(SemanticCache::delete_by_tags(self, tags))
    }

    async fn clear_expired(&self) -> Result<u64> {
        Ok(SemanticCache::clear_expired(self))
    }

    async fn clear(&self) -> Result<()> {
        SemanticCache::clear(self);
        Ok(())
    }

    async fn stats(&self) -> Result<BackendStats> {
        Ok(SemanticCache::stats(self))
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

    /// Embeds known texts to a one-element id vector and scores pairs from a
    /// fixed table, so thresholds can be hit exactly.
    struct ScriptedEmbedder {
        ids: HashMap<&'static str, f32>,
        scores: HashMap<(u32, u32), f32>,
    }

    impl ScriptedEmbedder {
        fn new(texts: &[&'static str], scores: &[((usize, usize), f32)]) -> Self {
            Self {
                ids: texts.iter().enumerate().map(|(i, t)| (*t, i as f32)).collect(),
                scores: scores
                    .iter()
                    .map(|((a, b), s)| ((*a as u32, *b as u32), *s))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Embedder for ScriptedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.ids
                .get(text)
                .map(|id| vec![*id])
                .ok_or_else(|| Error::Embedding(format!("unknown text {:?}", text)))
        }

        fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
            let (a, b) = (a[0] as u32, b[0] as u32);
            if a == b {
                return 1.0;
            }
            self.scores
                .get(&(a, b))
                .or_else(|| self.scores.get(&(b, a)))
                .copied()
                .unwrap_or(0.0)
        }
    }

    const STORED: &str = "how to reduce python memory usage";
    const CLOSE: &str = "ways to cut python memory use";
    const NEAR: &str = "reducing memory in python";
    const FAR: &str = "best pizza in naples";

    fn scripted() -> Arc<ScriptedEmbedder> {
        Arc::new(ScriptedEmbedder::new(
            &[STORED, CLOSE, NEAR, FAR],
            &[((0, 1), 0.86), ((0, 2), 0.84), ((0, 3), 0.05), ((1, 2), 0.85)],
        ))
    }

    fn config() -> SemanticConfig {
        SemanticConfig {
            enabled: true,
            default_ttl_secs: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_normalization_rules() {
        let rules = NormalizationRules::default();
        assert_eq!(
            rules.apply("  How to REDUCE\tPython   memory usage?! "),
            "how to reduce python memory usage"
        );

        let keep_case = NormalizationRules {
            lowercase: false,
            ..Default::default()
        };
        assert_eq!(keep_case.apply("Hello,  World"), "Hello World");

        let untouched = NormalizationRules {
            collapse_whitespace: false,
            strip_punctuation: false,
            lowercase: false,
        };
        assert_eq!(untouched.apply(" A  b! "), " A  b! ");
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("python memory usage").await.unwrap();
        let b = embedder.embed("python memory usage").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let c = embedder.embed("pizza dough recipe").await.unwrap();
        assert!(embedder.similarity(&a, &b) > embedder.similarity(&a, &c));
    }

    #[tokio::test]
    async fn test_semantic_threshold_boundary() {
        let cache = SemanticCache::new(config(), scripted());
        cache
            .set(STORED, Bytes::from_static(b"use generators"), None, &TagSet::new())
            .await
            .unwrap();

        // 0.84 < 0.85: miss
        assert!(cache.get(NEAR, None).await.unwrap().is_none());

        // 0.86 >= 0.85: hit
        let hit = cache.get(CLOSE, None).await.unwrap().unwrap();
        assert_eq!(hit.value().as_ref(), b"use generators");
        assert_eq!(hit.text, STORED);
        assert_eq!(hit.similarity, 0.86);
    }

    #[tokio::test]
    async fn test_semantic_exact_threshold_is_a_hit() {
        let cache = SemanticCache::new(config(), scripted());
        cache
            .set(CLOSE, Bytes::from_static(b"v"), None, &TagSet::new())
            .await
            .unwrap();

        let hit = cache.get(NEAR, None).await.unwrap().unwrap();
        assert_eq!(hit.similarity, 0.85);
    }

    #[tokio::test]
    async fn test_semantic_best_match_wins() {
        let cache = SemanticCache::new(config(), scripted());
        cache.set(CLOSE, Bytes::from_static(b"close"), None, &TagSet::new()).await.unwrap();
        cache.set(NEAR, Bytes::from_static(b"near"), None, &TagSet::new()).await.unwrap();

        // STORED scores 0.86 against CLOSE and 0.84 against NEAR
        let hit = cache.get(STORED, Some(0.5)).await.unwrap().unwrap();
        assert_eq!(hit.value().as_ref(), b"close");
    }

    #[tokio::test]
    async fn test_semantic_tie_goes_to_newest() {
        let clock = ManualClock::default();
        let embedder = Arc::new(ScriptedEmbedder::new(
            &["query", "first", "second"],
            &[((0, 1), 0.9), ((0, 2), 0.9)],
        ));
        let cache = SemanticCache::new(config(), embedder).with_clock(clock.shared());

        cache.set("first", Bytes::from_static(b"1"), None, &TagSet::new()).await.unwrap();
        clock.advance(Duration::from_secs(1));
        cache.set("second", Bytes::from_static(b"2"), None, &TagSet::new()).await.unwrap();

        let hit = cache.get("query", None).await.unwrap().unwrap();
        assert_eq!(hit.value().as_ref(), b"2");
    }

    #[tokio::test]
    async fn test_semantic_hit_counts_access() {
        let cache = SemanticCache::new(config(), scripted());
        cache.set(STORED, Bytes::from_static(b"v"), None, &TagSet::new()).await.unwrap();

        cache.get(CLOSE, None).await.unwrap();
        let hit = cache.get(STORED, None).await.unwrap().unwrap();
        assert_eq!(hit.record.access_count, 2);
        assert_eq!(hit.similarity, 1.0);
    }

    #[tokio::test]
    async fn test_search_similar_ranks_and_uses_relaxed_threshold() {
        let cache = SemanticCache::new(config(), scripted());
        cache.set(CLOSE, Bytes::from_static(b"close"), None, &TagSet::new()).await.unwrap();
        cache.set(NEAR, Bytes::from_static(b"near"), None, &TagSet::new()).await.unwrap();
        cache.set(FAR, Bytes::from_static(b"far"), None, &TagSet::new()).await.unwrap();

        // Default search threshold is 0.85 * 0.8 = 0.68
        let found = cache.search_similar(STORED, 10, None).await.unwrap();
        let texts: Vec<_> = found.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec![CLOSE, NEAR]);

        let top = cache.search_similar(STORED, 1, None).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].text, CLOSE);

        // Searching is not an access
        assert_eq!(cache.stats().total_accesses, 0);
    }

    #[tokio::test]
    async fn test_semantic_expiry() {
        let clock = ManualClock::default();
        let cache = SemanticCache::new(config(), scripted()).with_clock(clock.shared());
        cache
            .set(STORED, Bytes::from_static(b"v"), Some(Duration::from_secs(60)), &TagSet::new())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(61));
        assert!(cache.get(STORED, None).await.unwrap().is_none());
        assert_eq!(cache.clear_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_ttl_matches_normalized_text_only() {
        let clock = ManualClock::default();
        let cache = SemanticCache::new(config(), scripted()).with_clock(clock.shared());
        cache
            .set("How to reduce Python memory usage?", Bytes::from_static(b"v"), Some(Duration::from_secs(60)), &TagSet::new())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.ttl(STORED), Some(Lifetime::Remaining(Duration::from_secs(50))));
        assert_eq!(cache.ttl(CLOSE), None);

        clock.advance(Duration::from_secs(51));
        assert_eq!(cache.ttl(STORED), None);
    }

    #[tokio::test]
    async fn test_semantic_delete_and_tags() {
        let cache = SemanticCache::with_hashing_embedder(config());
        cache.set("What is Rust?", Bytes::from_static(b"1"), None, &tag_set(["lang"])).await.unwrap();
        cache.set("What is Go?", Bytes::from_static(b"2"), None, &tag_set(["lang"])).await.unwrap();
        cache.set("Best pizza?", Bytes::from_static(b"3"), None, &tag_set(["food"])).await.unwrap();

        // Delete matches on normalized text
        assert!(cache.delete("  what is RUST "));
        assert_eq!(cache.delete_by_tags(&tag_set(["lang"])), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_semantic_same_normalized_text_replaces() {
        let cache = SemanticCache::with_hashing_embedder(config());
        cache.set("Hello, World", Bytes::from_static(b"1"), None, &TagSet::new()).await.unwrap();
        cache.set("hello world!", Bytes::from_static(b"2"), None, &TagSet::new()).await.unwrap();

        assert_eq!(cache.len(), 1);
        let hit = cache.get("HELLO WORLD", None).await.unwrap().unwrap();
        assert_eq!(hit.value().as_ref(), b"2");
    }

    #[tokio::test]
    async fn test_semantic_max_entries_drops_least_recently_accessed() {
        let clock = ManualClock::default();
        let cache = SemanticCache::new(
            SemanticConfig {
                max_entries: Some(2),
                ..config()
            },
            scripted(),
        )
        .with_clock(clock.shared());

        cache.set(STORED, Bytes::from_static(b"a"), None, &TagSet::new()).await.unwrap();
        clock.advance(Duration::from_secs(1));
        cache.set(FAR, Bytes::from_static(b"b"), None, &TagSet::new()).await.unwrap();
        clock.advance(Duration::from_secs(1));
        cache.get(STORED, None).await.unwrap();
        clock.advance(Duration::from_secs(1));
        cache.set(NEAR, Bytes::from_static(b"c"), None, &TagSet::new()).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get(FAR, Some(0.99)).await.unwrap().is_none());
        assert_eq!(cache.stats().evictions, Some(1));
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let cache = SemanticCache::new(config(), scripted());
        let err = cache.get("never seen", None).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }
}
