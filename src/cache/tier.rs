//! Tier Identifiers
//!
//! The hierarchy has six fixed slots. Declaration order is priority order:
//! the derived `Ord` puts the fastest tier first.

use serde::{Deserialize, Serialize};

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// L1 - in-process LRU/TTL cache
    L1Memory,
    /// L2 - embedded relational store (SQLite)
    L2Local,
    /// L3 - networked relational store
    L3Relational,
    /// L4 - distributed key-value store
    L4KeyValue,
    /// L5 - document store
    L5Document,
    /// L6 - similarity-matched cache
    L6Semantic,
}

impl CacheTier {
    /// Number of tiers
    pub const COUNT: usize = 6;

    /// All tiers, fastest first
    pub const ALL: [CacheTier; CacheTier::COUNT] = [
        CacheTier::L1Memory,
        CacheTier::L2Local,
        CacheTier::L3Relational,
        CacheTier::L4KeyValue,
        CacheTier::L5Document,
        CacheTier::L6Semantic,
    ];

    /// Persistent slots (L2..L5)
    pub const PERSISTENT: [CacheTier; 4] = [
        CacheTier::L2Local,
        CacheTier::L3Relational,
        CacheTier::L4KeyValue,
        CacheTier::L5Document,
    ];

    /// Dense index for per-tier counters
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short machine-friendly name, used for log fields and metric labels
    pub fn as_str(self) -> &'static str {
        match self {
            CacheTier::L1Memory => "memory",
            CacheTier::L2Local => "local",
            CacheTier::L3Relational => "relational",
            CacheTier::L4KeyValue => "key_value",
            CacheTier::L5Document => "document",
            CacheTier::L6Semantic => "semantic",
        }
    }

    /// True for the L2..L5 slots
    pub fn is_persistent(self) -> bool {
        !matches!(self, CacheTier::L1Memory | CacheTier::L6Semantic)
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::L1Memory => write!(f, "L1 (Memory)"),
            CacheTier::L2Local => write!(f, "L2 (Local)"),
            CacheTier::L3Relational => write!(f, "L3 (Relational)"),
            CacheTier::L4KeyValue => write!(f, "L4 (KeyValue)"),
            CacheTier::L5Document => write!(f, "L5 (Document)"),
            CacheTier::L6Semantic => write!(f, "L6 (Semantic)"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
