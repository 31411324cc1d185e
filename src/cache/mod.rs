//! Six-Tier Cache Hierarchy
//!
//! One in-process LRU tier, four persistent tiers behind a single backend
//! contract, and a similarity-matching tier, orchestrated by [`CacheManager`].
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                            Cache Manager                               │
//! │        cascading get ─► promotion      set ─► WritePolicy fan-out      │
//! ├────────────────────────────────────────────────────────────────────────┤
//! │ L1 Memory   │ L2 Local    │ L3 Relational │ L4 Key-Value │ L5 Document │
//! │ FastCache   │ SQLite      │ SQLite        │ Sharded      │ Memory      │
//! │ (LRU + TTL) │             │               │ hash % N     │             │
//! ├────────────────────────────────────────────────────────────────────────┤
//! │ L6 Semantic: normalized text ─► embedding ─► best cosine >= threshold  │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design
//!
//! - Every backend sits behind [`CacheBackend`]; the guarded [`Tier`] wrapper
//!   turns backend failures and timeouts into misses
//! - Expiry is strict: a record is live while `now <= expires_at`
//! - Promotion copies a hit into the faster tiers with its tags and remaining
//!   lifetime
//! - Time comes from an injected [`Clock`] so TTL behaviour is testable

mod backend;
mod clock;
mod fast;
mod manager;
mod memory;
mod metrics;
mod policy;
mod record;
mod semantic;
mod sharded;
mod sqlite;
mod tier;

use std::time::Duration;

pub use backend::{ratio, BackendStats, CacheBackend, ProbeOutcome, Tier};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use fast::{FastCache, FastCacheConfig, FastCacheStats};
pub use manager::{
    CacheManager, CacheManagerBuilder, CacheResult, ManagerStats, PromotionConfig, TierOptions,
    WriteReport,
};
pub use memory::MemoryBackend;
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot, TierMetricsSnapshot};
pub use policy::{PolicyDecision, SizeClass, SizeTieredPolicy, WritePolicy, WritePolicyConfig};
pub use record::{expiry_from, tag_set, BatchEntry, CacheRecord, Lifetime, TagSet};
pub use semantic::{
    cosine_similarity, Embedder, HashingEmbedder, NormalizationRules, SemanticCache,
    SemanticConfig, SemanticMatch,
};
pub use sharded::{fx_hash, ShardedBackend};
pub use sqlite::SqliteBackend;
pub use tier::CacheTier;

/// Default L1 capacity (entries)
pub const DEFAULT_FAST_CAPACITY: usize = 1000;

/// Default semantic match threshold
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

/// Payloads below this are routed to L1/L2
pub const DEFAULT_SMALL_MAX_BYTES: usize = 1024;

/// Payloads below this are routed to L2/L3
pub const DEFAULT_MEDIUM_MAX_BYTES: usize = 100 * 1024;

/// Payloads above this are never cached (10MB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Lifetime of health probe keys
pub const DEFAULT_PROBE_TTL: Duration = Duration::from_secs(10);

/// Prefix of synthetic health probe keys
pub const HEALTH_PROBE_PREFIX: &str = "__tiercache_health__";
