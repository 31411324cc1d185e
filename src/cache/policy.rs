//! Write Policies
//!
//! Decide which tiers receive a `set`. The default policy routes by payload
//! size and refuses payloads and keys that should not be cached at all.

use serde::{Deserialize, Serialize};

use super::tier::CacheTier;
use super::{DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_MEDIUM_MAX_BYTES, DEFAULT_SMALL_MAX_BYTES};
use crate::error::{Error, Result};

/// Payload size bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    /// Below `small_max_bytes`
    Small,
    /// Below `medium_max_bytes`
    Medium,
    /// Everything else up to `max_payload_bytes`
    Large,
}

/// Tiers chosen for one write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Target tiers, fastest first
    pub tiers: Vec<CacheTier>,
    /// Size bucket of the payload
    pub size_class: SizeClass,
    /// True when none of the size bucket's tiers were available and the
    /// decision fell back to every available persistent tier
    pub fallback: bool,
}

/// Maps a candidate write to the subset of tiers that should store it
pub trait WritePolicy: Send + Sync {
    /// Choose target tiers among `available`.
    ///
    /// Returns [`Error::PolicyViolation`] when the write should not be cached.
    fn select(&self, key: &str, size: usize, available: &[CacheTier]) -> Result<PolicyDecision>;
}

/// Size-tiered policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritePolicyConfig {
    /// Payloads strictly smaller than this are small
    pub small_max_bytes: usize,
    /// Payloads strictly smaller than this (and not small) are medium
    pub medium_max_bytes: usize,
    /// Payloads larger than this are never cached
    pub max_payload_bytes: usize,
    /// Keys with any of these prefixes are never cached
    pub excluded_prefixes: Vec<String>,
    /// Targets for small payloads
    pub small_tiers: Vec<CacheTier>,
    /// Targets for medium payloads
    pub medium_tiers: Vec<CacheTier>,
    /// Targets for large payloads
    pub large_tiers: Vec<CacheTier>,
}

impl Default for WritePolicyConfig {
    fn default() -> Self {
        Self {
            small_max_bytes: DEFAULT_SMALL_MAX_BYTES,
            medium_max_bytes: DEFAULT_MEDIUM_MAX_BYTES,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            excluded_prefixes: vec!["temp_".to_string(), "session_".to_string()],
            small_tiers: vec![CacheTier::L1Memory, CacheTier::L2Local],
            medium_tiers: vec![CacheTier::L2Local, CacheTier::L3Relational],
            large_tiers: vec![CacheTier::L4KeyValue, CacheTier::L5Document],
        }
    }
}

/// Default write policy: route by payload size
#[derive(Debug, Clone, Default)]
pub struct SizeTieredPolicy {
    config: WritePolicyConfig,
}

impl SizeTieredPolicy {
    /// Create a policy from configuration
    pub fn new(config: WritePolicyConfig) -> Self {
        Self { config }
    }

    /// Configuration
    pub fn config(&self) -> &WritePolicyConfig {
        &self.config
    }

    /// Size bucket for a payload of `size` bytes
    pub fn classify(&self, size: usize) -> SizeClass {
        if size < self.config.small_max_bytes {
            SizeClass::Small
        } else if size < self.config.medium_max_bytes {
            SizeClass::Medium
        } else {
            SizeClass::Large
        }
    }

    /// Reason the write must not be cached, if any
    pub fn rejection(&self, key: &str, size: usize) -> Option<String> {
        if size > self.config.max_payload_bytes {
            return Some(format!(
                "payload of {} bytes exceeds limit of {} bytes",
                size, self.config.max_payload_bytes
            ));
        }
        self.config
            .excluded_prefixes
            .iter()
            .find(|prefix| key.starts_with(prefix.as_str()))
            .map(|prefix| format!("key prefix {:?} is excluded", prefix))
    }

    fn targets(&self, class: SizeClass) -> &[CacheTier] {
        match class {
            SizeClass::Small => &self.config.small_tiers,
            SizeClass::Medium => &self.config.medium_tiers,
            SizeClass::Large => &self.config.large_tiers,
        }
    }
}

impl WritePolicy for SizeTieredPolicy {
    fn select(&self, key: &str, size: usize, available: &[CacheTier]) -> Result<PolicyDecision> {
        if let Some(reason) = self.rejection(key, size) {
            return Err(Error::PolicyViolation {
                key: key.to_string(),
                reason,
            });
        }

        let size_class = self.classify(size);
        let wanted = self.targets(size_class);
        let mut tiers: Vec<CacheTier> = available
            .iter()
            .copied()
            .filter(|tier| wanted.contains(tier))
            .collect();
        let mut fallback = false;

        if tiers.is_empty() {
            tiers = available
                .iter()
                .copied()
                .filter(|tier| tier.is_persistent())
                .collect();
            fallback = true;
        }
        if tiers.is_empty() {
            return Err(Error::PolicyViolation {
                key: key.to_string(),
                reason: format!("no available tier accepts {:?} payloads", size_class),
            });
        }

        tiers.sort();
        tiers.dedup();
        Ok(PolicyDecision {
            tiers,
            size_class,
            fallback,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
