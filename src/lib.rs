//! Tiercache - Multi-Tier Cache Hierarchy
//!
//! Memoizes expensive computed artifacts (model responses, embeddings,
//! processed documents) across six tiers: an in-process LRU/TTL cache, four
//! persistent backends behind one contract, and a semantic tier that answers
//! near-duplicate queries by similarity.
//!
//! # Architecture
//!
//! ```text
//! get(key) ─► L1 ─► L2 ─► L3 ─► L4 ─► L5      first hit wins, copied upward
//! set(key) ─► WritePolicy ─► size-routed subset of L1..L5
//! get_semantic(text) ─► L6 (best match >= threshold)
//! ```
//!
//! A failing or slow tier degrades to a miss; callers never see backend
//! errors from the manager.
//!
//! # Modules
//!
//! - [`cache`] - Tiers, backends, write policy and the cache manager
//! - [`config`] - YAML configuration and hierarchy assembly
//! - [`error`] - Error types
//! - [`fingerprint`] - Stable request keys
//! - [`monitoring`] - Health checks, periodic monitor, Prometheus export
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use std::time::Duration;
//! use tiercache::{tag_set, CacheManager};
//!
//! # async fn demo() -> tiercache::Result<()> {
//! let cache = CacheManager::in_memory()?;
//! cache
//!     .set("user:42", Bytes::from_static(b"{}"), Some(Duration::from_secs(60)), &tag_set(["user"]))
//!     .await;
//! let hit = cache.get("user:42").await;
//! assert!(hit.is_some());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod monitoring;

// Re-export commonly used types
pub use cache::{
    tag_set, BatchEntry, CacheBackend, CacheManager, CacheRecord, CacheResult, CacheTier,
    Lifetime, SemanticCache, TagSet,
};
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use fingerprint::fingerprint;
pub use monitoring::{CacheMonitor, HealthReport, HealthStatus, PrometheusExporter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
