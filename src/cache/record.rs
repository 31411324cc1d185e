//! Cache Record Types
//!
//! The unit of storage shared by every tier. Each tier owns its own copies;
//! a promoted record is an independent clone whose bookkeeping diverges from
//! the record it was copied from.

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Set of invalidation tags attached to a record
pub type TagSet = BTreeSet<String>;

/// Build a [`TagSet`] from anything string-like
pub fn tag_set<I, S>(tags: I) -> TagSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter().map(Into::into).collect()
}

/// A cached value plus its bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    /// Fingerprint the record is stored under
    pub key: String,
    /// Opaque payload
    pub value: Bytes,
    /// Invalidation tags
    pub tags: TagSet,
    /// When the record was (re)written
    pub created_at: DateTime<Utc>,
    /// Last successful read, or `created_at` if never read
    pub last_accessed_at: DateTime<Utc>,
    /// Successful reads since the last write
    pub access_count: u64,
    /// Expiry instant; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheRecord {
    /// Create a fresh record written at `now`
    pub fn new(
        key: impl Into<String>,
        value: Bytes,
        ttl: Option<Duration>,
        tags: TagSet,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            tags,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            expires_at: expiry_from(now, ttl),
        }
    }

    /// Payload size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.value.len()
    }

    /// A record is expired strictly after its expiry instant
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }

    /// Lifetime left at `now`; `None` for records that never expire
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Lifetime left at `now`, distinguishing records that never expire
    pub fn lifetime(&self, now: DateTime<Utc>) -> Lifetime {
        match self.remaining_ttl(now) {
            Some(left) => Lifetime::Remaining(left),
            None => Lifetime::Unbounded,
        }
    }

    /// Record a successful read
    #[inline]
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }

    /// True if this record carries any of `tags`
    pub fn has_any_tag(&self, tags: &TagSet) -> bool {
        !self.tags.is_disjoint(tags)
    }
}

/// Remaining lifetime of a live record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// Never expires
    Unbounded,
    /// Expires after this long
    Remaining(Duration),
}

impl Lifetime {
    /// Time left, `None` for unbounded records
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Lifetime::Unbounded => None,
            Lifetime::Remaining(left) => Some(*left),
        }
    }
}

/// One record of a batch write
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub key: String,
    pub value: Bytes,
    /// `None` falls back to the tier default
    pub ttl: Option<Duration>,
    pub tags: TagSet,
}

impl BatchEntry {
    /// Untagged entry with the tier's default TTL
    pub fn new(key: impl Into<String>, value: Bytes) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: None,
            tags: TagSet::new(),
        }
    }

    /// Set TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set tags
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }
}

/// Compute `now + ttl`, saturating to "never" on overflow
pub fn expiry_from(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = ttl?;
    let delta = chrono::Duration::from_std(ttl).ok()?;
    now.checked_add_signed(delta)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::{Clock, ManualClock};

    fn record(ttl: Option<Duration>, now: DateTime<Utc>) -> CacheRecord {
        CacheRecord::new(
            "user:42",
            Bytes::from_static(b"{\"name\":\"A\"}"),
            ttl,
            tag_set(["user"]),
            now,
        )
    }

    #[test]
    fn test_record_expiry_is_strict() {
        let clock = ManualClock::default();
        let rec = record(Some(Duration::from_secs(60)), clock.now());

        clock.advance(Duration::from_secs(60));
        assert!(!rec.is_expired(clock.now()));

        clock.advance(Duration::from_secs(1));
        assert!(rec.is_expired(clock.now()));
    }

    #[test]
    fn test_record_without_ttl_never_expires() {
        let clock = ManualClock::default();
        let rec = record(None, clock.now());

        clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
        assert!(!rec.is_expired(clock.now()));
        assert_eq!(rec.remaining_ttl(clock.now()), None);
    }

    #[test]
    fn test_record_remaining_ttl() {
        let clock = ManualClock::default();
        let rec = record(Some(Duration::from_secs(60)), clock.now());

        clock.advance(Duration::from_secs(45));
        assert_eq!(rec.remaining_ttl(clock.now()), Some(Duration::from_secs(15)));

        clock.advance(Duration::from_secs(45));
        assert_eq!(rec.remaining_ttl(clock.now()), Some(Duration::ZERO));
    }

    #[test]
    fn test_record_lifetime() {
        let clock = ManualClock::default();
        let bounded = record(Some(Duration::from_secs(30)), clock.now());
        let unbounded = record(None, clock.now());

        clock.advance(Duration::from_secs(10));
        assert_eq!(bounded.lifetime(clock.now()), Lifetime::Remaining(Duration::from_secs(20)));
        assert_eq!(bounded.lifetime(clock.now()).remaining(), Some(Duration::from_secs(20)));
        assert_eq!(unbounded.lifetime(clock.now()), Lifetime::Unbounded);
    }

    #[test]
    fn test_record_touch() {
        let clock = ManualClock::default();
        let mut rec = record(None, clock.now());
        assert_eq!(rec.access_count, 0);

        clock.advance(Duration::from_secs(5));
        rec.touch(clock.now());
        assert_eq!(rec.access_count, 1);
        assert_eq!(rec.last_accessed_at, clock.now());
        assert_eq!(rec.created_at + chrono::Duration::seconds(5), clock.now());
    }

    #[test]
    fn test_record_tag_intersection() {
        let rec = record(None, ManualClock::default().now());
        assert!(rec.has_any_tag(&tag_set(["user", "profile"])));
        assert!(!rec.has_any_tag(&tag_set(["session"])));
        assert!(!rec.has_any_tag(&TagSet::new()));
    }
}
