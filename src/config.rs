//! Configuration
//!
//! One YAML document describes the whole hierarchy. Every field has a default,
//! so an empty file yields a working cache: L1 in memory, L2/L3 on SQLite, L4
//! on a three-node sharded store, L5 on the memory backend and L6 semantic.
//!
//! ```yaml
//! fast:
//!   max_entries: 5000
//! tiers:
//!   l2_local:
//!     backend: { kind: sqlite, path: /var/lib/tiercache/local.db }
//!     timeout_ms: 50
//!   l4_key_value:
//!     backend: { kind: sharded, nodes: 3 }
//! semantic:
//!   threshold: 0.9
//! ```
//!
//! A `tiers` map replaces the default one wholesale; persistent slots not
//! listed are not mounted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{
    system_clock, CacheBackend, CacheManager, CacheTier, FastCache, FastCacheConfig,
    MemoryBackend, PromotionConfig, SemanticCache, SemanticConfig, SharedClock, ShardedBackend,
    SizeTieredPolicy, SqliteBackend, TierOptions, WritePolicyConfig, DEFAULT_PROBE_TTL,
};
use crate::error::{Error, Result};

/// Default TTL for persistent tiers (1 hour)
const DEFAULT_TIER_TTL_SECS: u64 = 3600;

/// Technology mounted in a persistent slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    /// SQLite file, or an in-memory database when `path` is absent
    Sqlite {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// In-process record store
    Memory,
    /// Key-hashed cluster of in-process nodes
    Sharded { nodes: usize },
}

/// Settings for one persistent slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSettings {
    /// Mount this slot
    pub enabled: bool,
    /// Backend technology
    pub backend: BackendKind,
    /// TTL for writes that carry none; `None` never expires
    pub default_ttl_secs: Option<u64>,
    /// Per-call deadline; `None` waits indefinitely
    pub timeout_ms: Option<u64>,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::Memory,
            default_ttl_secs: Some(DEFAULT_TIER_TTL_SECS),
            timeout_ms: None,
        }
    }
}

impl TierSettings {
    fn with_backend(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Mount options for the manager
    pub fn options(&self) -> TierOptions {
        TierOptions {
            timeout: self.timeout_ms.map(Duration::from_millis),
            default_ttl: self.default_ttl_secs.map(Duration::from_secs),
        }
    }
}

/// Health probe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Lifetime of probe keys
    pub probe_ttl_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_ttl_secs: DEFAULT_PROBE_TTL.as_secs(),
        }
    }
}

/// Background monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,
    /// Warn when the item count across tiers exceeds this
    pub item_warning_threshold: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            item_warning_threshold: 10_000,
        }
    }
}

impl MonitorConfig {
    /// Sweep interval, never shorter than one second
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 fast cache
    pub fast: FastCacheConfig,
    /// Persistent slots L2..L5
    pub tiers: BTreeMap<CacheTier, TierSettings>,
    /// L6 semantic cache
    pub semantic: SemanticConfig,
    /// Size-tiered write routing
    pub write_policy: WritePolicyConfig,
    /// Cascading read order; defaults to every mounted tier except L6
    pub read_order: Option<Vec<CacheTier>>,
    /// Promotion behaviour
    pub promotion: PromotionConfig,
    /// Health probes
    pub health: HealthConfig,
    /// Background monitor
    pub monitor: MonitorConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let tiers = [
            (CacheTier::L2Local, BackendKind::Sqlite { path: None }),
            (CacheTier::L3Relational, BackendKind::Sqlite { path: None }),
            (CacheTier::L4KeyValue, BackendKind::Sharded { nodes: 3 }),
            (CacheTier::L5Document, BackendKind::Memory),
        ]
        .into_iter()
        .map(|(tier, backend)| (tier, TierSettings::with_backend(backend)))
        .collect();

        Self {
            fast: FastCacheConfig::default(),
            tiers,
            semantic: SemanticConfig::default(),
            write_policy: WritePolicyConfig::default(),
            read_order: None,
            promotion: PromotionConfig::default(),
            health: HealthConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Reject settings the hierarchy cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.fast.enabled && self.fast.max_entries == 0 {
            return Err(Error::Config("fast.max_entries must be positive".to_string()));
        }

        let threshold = self.semantic.threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::Config(format!(
                "semantic.threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        let factor = self.semantic.search_threshold_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(Error::Config(format!(
                "semantic.search_threshold_factor must be in (0, 1], got {}",
                factor
            )));
        }
        if self.semantic.embedding_dimensions == 0 {
            return Err(Error::Config(
                "semantic.embedding_dimensions must be positive".to_string(),
            ));
        }
        if self.semantic.max_entries == Some(0) {
            return Err(Error::Config("semantic.max_entries must be positive".to_string()));
        }

        if self.monitor.interval_secs == 0 {
            return Err(Error::Config("monitor.interval_secs must be positive".to_string()));
        }

        let policy = &self.write_policy;
        if policy.small_max_bytes > policy.medium_max_bytes {
            return Err(Error::Config(format!(
                "write_policy.small_max_bytes ({}) exceeds medium_max_bytes ({})",
                policy.small_max_bytes, policy.medium_max_bytes
            )));
        }

        for (tier, settings) in &self.tiers {
            if !tier.is_persistent() {
                return Err(Error::Config(format!(
                    "tiers only configures persistent slots, found {}",
                    tier
                )));
            }
            if let BackendKind::Sharded { nodes: 0 } = settings.backend {
                return Err(Error::Config(format!("{} needs at least one node", tier)));
            }
            if settings.timeout_ms == Some(0) {
                return Err(Error::Config(format!("{} timeout_ms must be positive", tier)));
            }
        }

        Ok(())
    }

    /// Tiers this configuration mounts, fastest first
    pub fn mounted_tiers(&self) -> Vec<CacheTier> {
        let mut tiers = Vec::new();
        if self.fast.enabled {
            tiers.push(CacheTier::L1Memory);
        }
        tiers.extend(
            self.tiers
                .iter()
                .filter(|(_, settings)| settings.enabled)
                .map(|(tier, _)| *tier),
        );
        if self.semantic.enabled {
            tiers.push(CacheTier::L6Semantic);
        }
        tiers
    }

    /// Build a manager on the system clock
    pub fn build(&self) -> Result<CacheManager> {
        self.build_with_clock(system_clock())
    }

    /// Build a manager whose tiers all read time from `clock`
    pub fn build_with_clock(&self, clock: SharedClock) -> Result<CacheManager> {
        self.validate()?;

        let mut builder = CacheManager::builder()
            .clock(clock.clone())
            .write_policy(Arc::new(SizeTieredPolicy::new(self.write_policy.clone())))
            .promotion(self.promotion.clone())
            .probe_ttl(Duration::from_secs(self.health.probe_ttl_secs));

        if self.fast.enabled {
            let fast = FastCache::with_clock(&self.fast, clock.clone());
            builder = builder.fast(Arc::new(fast), TierOptions::default());
        }

        for (tier, settings) in self.tiers.iter().filter(|(_, s)| s.enabled) {
            let backend = open_backend(*tier, &settings.backend, clock.clone())?;
            builder = builder.mount(*tier, backend, settings.options());
        }

        if self.semantic.enabled {
            let semantic =
                SemanticCache::with_hashing_embedder(self.semantic.clone()).with_clock(clock);
            builder = builder.semantic(Arc::new(semantic), TierOptions::default());
        }

        if let Some(order) = &self.read_order {
            builder = builder.read_order(order.clone());
        }

        builder.build()
    }
}

fn open_backend(
    tier: CacheTier,
    kind: &BackendKind,
    clock: SharedClock,
) -> Result<Arc<dyn CacheBackend>> {
    let backend: Arc<dyn CacheBackend> = match kind {
        BackendKind::Sqlite { path: Some(path) } => {
            Arc::new(SqliteBackend::open(path)?.with_clock(clock))
        }
        BackendKind::Sqlite { path: None } => {
            Arc::new(SqliteBackend::open_in_memory()?.with_clock(clock))
        }
        BackendKind::Memory => Arc::new(MemoryBackend::with_clock(tier.as_str(), clock)),
        BackendKind::Sharded { nodes } => {
            Arc::new(ShardedBackend::in_memory(tier.as_str(), *nodes, clock)?)
        }
    };

    info!(tier = %tier, backend = backend.name(), "Opened cache backend");
    Ok(backend)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_empty_document_is_default() {
        let config = CacheConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.fast.max_entries, 1000);
        assert_eq!(config.semantic.threshold, 0.85);
        assert_eq!(config.monitor.item_warning_threshold, 10_000);
        assert_eq!(config.health.probe_ttl_secs, 10);
        assert_eq!(config.mounted_tiers(), CacheTier::ALL.to_vec());
    }

    #[test]
    fn test_parse_tiers_map() {
        let yaml = r#"
fast:
  max_entries: 50
tiers:
  l2_local:
    backend: { kind: sqlite, path: /tmp/tiercache-test.db }
    timeout_ms: 25
  l4_key_value:
    backend: { kind: sharded, nodes: 5 }
    default_ttl_secs: ~
semantic:
  enabled: false
read_order: [l4_key_value, l1_memory, l2_local]
"#;
        let config = CacheConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.fast.max_entries, 50);
        assert_eq!(config.tiers.len(), 2);

        let local = &config.tiers[&CacheTier::L2Local];
        assert_eq!(
            local.backend,
            BackendKind::Sqlite {
                path: Some(PathBuf::from("/tmp/tiercache-test.db"))
            }
        );
        assert_eq!(local.options().timeout, Some(Duration::from_millis(25)));
        assert_eq!(local.options().default_ttl, Some(Duration::from_secs(3600)));

        let kv = &config.tiers[&CacheTier::L4KeyValue];
        assert_eq!(kv.backend, BackendKind::Sharded { nodes: 5 });
        assert_eq!(kv.default_ttl_secs, None);

        assert_eq!(
            config.mounted_tiers(),
            vec![CacheTier::L1Memory, CacheTier::L2Local, CacheTier::L4KeyValue]
        );
    }

    #[test]
    fn test_validation() {
        let mut config = CacheConfig::default();
        config.semantic.threshold = 1.5;
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CacheConfig::default();
        config.semantic.threshold = 0.0;
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CacheConfig::default();
        config.fast.max_entries = 0;
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CacheConfig::default();
        config.write_policy.small_max_bytes = 1_000_000;
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CacheConfig::default();
        config.monitor.interval_secs = 0;
        assert_matches!(config.validate(), Err(Error::Config(_)));
        assert_eq!(config.monitor.interval(), Duration::from_secs(1));

        let mut config = CacheConfig::default();
        config
            .tiers
            .insert(CacheTier::L1Memory, TierSettings::default());
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CacheConfig::default();
        config.tiers.insert(
            CacheTier::L4KeyValue,
            TierSettings::with_backend(BackendKind::Sharded { nodes: 0 }),
        );
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_zero_monitor_interval_is_rejected() {
        assert_matches!(
            CacheConfig::from_yaml_str("monitor:\n  interval_secs: 0\n"),
            Err(Error::Config(msg)) if msg.contains("interval_secs")
        );
    }

    #[test]
    fn test_bad_yaml() {
        assert_matches!(
            CacheConfig::from_yaml_str("fast: [not, a, map]"),
            Err(Error::Yaml(_))
        );
    }

    #[tokio::test]
    async fn test_build_default_hierarchy() {
        let manager = CacheConfig::default().build().unwrap();
        assert_eq!(manager.tiers(), CacheTier::ALL.to_vec());
        assert_eq!(
            manager.read_order(),
            &[
                CacheTier::L1Memory,
                CacheTier::L2Local,
                CacheTier::L3Relational,
                CacheTier::L4KeyValue,
                CacheTier::L5Document,
            ]
        );

        assert!(
            manager
                .set("k", bytes::Bytes::from_static(b"v"), None, &Default::default())
                .await
        );
        assert!(manager.exists("k").await);
    }

    #[tokio::test]
    async fn test_build_with_file_backed_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local.db");
        let yaml = format!(
            "tiers:\n  l2_local:\n    backend: {{ kind: sqlite, path: {} }}\n",
            path.display()
        );

        let manager = CacheConfig::from_yaml_str(&yaml).unwrap().build().unwrap();
        assert!(path.exists());
        assert!(manager.tier(CacheTier::L2Local).is_some());
        assert!(manager.tier(CacheTier::L3Relational).is_none());
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiercache.yaml");
        std::fs::write(&path, "monitor:\n  interval_secs: 5\n").unwrap();

        let config = CacheConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.monitor.interval(), Duration::from_secs(5));
        assert_matches!(
            CacheConfig::from_yaml_file(dir.path().join("missing.yaml")),
            Err(Error::Io(_))
        );
    }
}
