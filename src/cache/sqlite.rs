//! Embedded Relational Backend
//!
//! SQLite-backed persistent tier. One row per record in `cache_entries`, with
//! the record's tags denormalized into `cache_tags` so tag invalidation is an
//! indexed set intersection rather than a scan over serialized tag lists.
//!
//! Timestamps are stored as Unix milliseconds. Statements run on the blocking
//! pool, so a per-tier timeout can fire while SQLite is busy.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use super::backend::{ratio, BackendStats, CacheBackend};
use super::clock::{system_clock, SharedClock};
use super::record::{BatchEntry, CacheRecord, Lifetime, TagSet};
use crate::error::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key          TEXT PRIMARY KEY,
    value        BLOB NOT NULL,
    tags         TEXT NOT NULL DEFAULT '[]',
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL,
    expires_at   INTEGER,
    access_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at ON cache_entries(expires_at);

CREATE TABLE IF NOT EXISTS cache_tags (
    key TEXT NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (key, tag)
);
CREATE INDEX IF NOT EXISTS idx_cache_tags_tag ON cache_tags(tag);
"#;

/// SQLite cache backend.
///
/// rusqlite is blocking, so every statement runs on tokio's blocking pool
/// with the connection lock taken there. Callers awaiting a slow statement
/// can be timed out without stalling the runtime.
pub struct SqliteBackend {
    /// Database path, or `:memory:`
    location: String,
    db: Arc<Mutex<Connection>>,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SqliteBackend {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, path.display().to_string())
    }

    /// Private in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, ":memory:".to_string())
    }

    /// Read time from `clock` instead of the system clock
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn from_connection(conn: Connection, location: String) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        info!(location = %location, "SQLite cache backend initialized");
        Ok(Self {
            location,
            db: Arc::new(Mutex::new(conn)),
            clock: system_clock(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Database path, or `:memory:`
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run `op` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock();
            op(&mut conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("sqlite task failed: {}", e)))?
    }
}

/// Raw row as stored
struct StoredRow {
    value: Vec<u8>,
    tags: String,
    created_at: i64,
    updated_at: i64,
    expires_at: Option<i64>,
    access_count: i64,
}

impl StoredRow {
    fn into_record(self, key: &str) -> Result<CacheRecord> {
        let tags: TagSet = serde_json::from_str(&self.tags)?;
        Ok(CacheRecord {
            key: key.to_string(),
            value: Bytes::from(self.value),
            tags,
            created_at: from_millis(self.created_at)?,
            last_accessed_at: from_millis(self.updated_at)?,
            access_count: self.access_count.max(0) as u64,
            expires_at: self.expires_at.map(from_millis).transpose()?,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Serialization(format!("timestamp out of range: {}", ms)))
}

fn delete_key(tx: &Transaction<'_>, key: &str) -> Result<bool> {
    tx.execute("DELETE FROM cache_tags WHERE key = ?1", params![key])?;
    let removed = tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
    Ok(removed > 0)
}

/// Replace one record and its tag rows inside `tx`
fn write_record(tx: &Transaction<'_>, record: &CacheRecord) -> Result<()> {
    let tags_json = serde_json::to_string(&record.tags)?;
    tx.execute(
        "INSERT OR REPLACE INTO cache_entries
            (key, value, tags, created_at, updated_at, expires_at, access_count)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5, 0)",
        params![
            record.key,
            record.value.as_ref(),
            tags_json,
            record.created_at.timestamp_millis(),
            record.expires_at.map(|at| at.timestamp_millis()),
        ],
    )?;
    tx.execute("DELETE FROM cache_tags WHERE key = ?1", params![record.key])?;
    let mut insert = tx.prepare_cached("INSERT INTO cache_tags (key, tag) VALUES (?1, ?2)")?;
    for tag in &record.tags {
        insert.execute(params![record.key, tag])?;
    }
    Ok(())
}

/// `expires_at` of a stored row: outer `None` when the key is absent
fn stored_expiry(conn: &Connection, key: &str) -> Result<Option<Option<i64>>> {
    Ok(conn
        .query_row(
            "SELECT expires_at FROM cache_entries WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheRecord>> {
        let now = self.clock.now();
        let key = key.to_string();

        let found = self
            .with_conn(move |db| {
                let tx = db.transaction()?;
                let row = tx
                    .query_row(
                        "SELECT value, tags, created_at, updated_at, expires_at, access_count
                         FROM cache_entries WHERE key = ?1",
                        params![key],
                        |row| {
                            Ok(StoredRow {
                                value: row.get(0)?,
                                tags: row.get(1)?,
                                created_at: row.get(2)?,
                                updated_at: row.get(3)?,
                                expires_at: row.get(4)?,
                                access_count: row.get(5)?,
                            })
                        },
                    )
                    .optional()?;

                let Some(row) = row else {
                    return Ok(None);
                };

                let mut record = row.into_record(&key)?;
                if record.is_expired(now) {
                    delete_key(&tx, &key)?;
                    tx.commit()?;
                    debug!(key = %key, "Dropped expired SQLite record on read");
                    return Ok(None);
                }

                tx.execute(
                    "UPDATE cache_entries SET access_count = access_count + 1, updated_at = ?2 WHERE key = ?1",
                    params![key, now.timestamp_millis()],
                )?;
                tx.commit()?;

                record.touch(now);
                Ok(Some(record))
            })
            .await?;

        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(found)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let now = self.clock.now().timestamp_millis();
        let key = key.to_string();
        let expires_at = self.with_conn(move |db| stored_expiry(db, &key)).await?;
        Ok(match expires_at {
            Some(Some(at)) => now <= at,
            Some(None) => true,
            None => false,
        })
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: &TagSet,
    ) -> Result<()> {
        let record = CacheRecord::new(key, value, ttl, tags.clone(), self.clock.now());
        self.with_conn(move |db| {
            let tx = db.transaction()?;
            write_record(&tx, &record)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// One transaction for the whole batch: all rows land or none do
    async fn set_many(&self, entries: &[BatchEntry]) -> Result<u64> {
        let now = self.clock.now();
        let records: Vec<CacheRecord> = entries
            .iter()
            .map(|entry| {
                CacheRecord::new(
                    entry.key.as_str(),
                    entry.value.clone(),
                    entry.ttl,
                    entry.tags.clone(),
                    now,
                )
            })
            .collect();

        self.with_conn(move |db| {
            let tx = db.transaction()?;
            for record in &records {
                write_record(&tx, record)?;
            }
            tx.commit()?;
            Ok(records.len() as u64)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Lifetime>> {
        let now = self.clock.now();
        let key = key.to_string();
        let expires_at = self.with_conn(move |db| stored_expiry(db, &key)).await?;

        Ok(match expires_at {
            None => None,
            Some(None) => Some(Lifetime::Unbounded),
            Some(Some(at)) => {
                let at = from_millis(at)?;
                if now > at {
                    None
                } else {
                    Some(Lifetime::Remaining(
                        (at - now).to_std().unwrap_or(Duration::ZERO),
                    ))
                }
            }
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |db| {
            let tx = db.transaction()?;
            let removed = delete_key(&tx, &key)?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn delete_by_tags(&self, tags: &TagSet) -> Result<u64> {
        if tags.is_empty() {
            return Ok(0);
        }
        let tags = tags.clone();

        self.with_conn(move |db| {
            let placeholders = vec!["?"; tags.len()].join(", ");
            let tx = db.transaction()?;
            let removed = tx.execute(
                &format!(
                    "DELETE FROM cache_entries WHERE key IN
                        (SELECT DISTINCT key FROM cache_tags WHERE tag IN ({}))",
                    placeholders
                ),
                params_from_iter(tags.iter()),
            )?;
            tx.execute(
                "DELETE FROM cache_tags WHERE key NOT IN (SELECT key FROM cache_entries)",
                [],
            )?;
            tx.commit()?;
            Ok(removed as u64)
        })
        .await
    }

    async fn clear_expired(&self) -> Result<u64> {
        let now = self.clock.now().timestamp_millis();
        self.with_conn(move |db| {
            let tx = db.transaction()?;
            tx.execute(
                "DELETE FROM cache_tags WHERE key IN
                    (SELECT key FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at < ?1)",
                params![now],
            )?;
            let removed = tx.execute(
                "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at < ?1",
                params![now],
            )?;
            tx.commit()?;
            Ok(removed as u64)
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.with_conn(|db| {
            db.execute_batch("DELETE FROM cache_tags; DELETE FROM cache_entries;")?;
            Ok(())
        })
        .await
    }

    async fn stats(&self) -> Result<BackendStats> {
        let (count, bytes, accesses, oldest, newest): (i64, i64, i64, Option<i64>, Option<i64>) =
            self.with_conn(|db| {
                Ok(db.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(LENGTH(value)), 0), COALESCE(SUM(access_count), 0),
                            MIN(created_at), MAX(updated_at)
                     FROM cache_entries",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )?)
            })
            .await?;

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let item_count = count.max(0) as u64;
        let total_accesses = accesses.max(0) as u64;

        Ok(BackendStats {
            item_count,
            total_bytes: bytes.max(0) as u64,
            total_accesses,
            avg_access_count: if item_count == 0 {
                0.0
            } else {
                total_accesses as f64 / item_count as f64
            },
            hits: Some(hits),
            misses: Some(misses),
            hit_rate: Some(ratio(hits, misses)),
            oldest_entry: oldest.map(from_millis).transpose()?,
            newest_entry: newest.map(from_millis).transpose()?,
            ..BackendStats::named(self.name())
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::{Clock, ManualClock};
    use crate::cache::record::tag_set;

    fn backend(clock: &ManualClock) -> SqliteBackend {
        SqliteBackend::open_in_memory()
            .unwrap()
            .with_clock(clock.shared())
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let clock = ManualClock::default();
        let db = backend(&clock);

        db.set(
            "user:42",
            Bytes::from_static(b"{\"name\":\"A\"}"),
            Some(Duration::from_secs(60)),
            &tag_set(["user"]),
        )
        .await
        .unwrap();

        let record = db.get("user:42").await.unwrap().unwrap();
        assert_eq!(record.value.as_ref(), b"{\"name\":\"A\"}");
        assert_eq!(record.tags, tag_set(["user"]));
        assert_eq!(record.access_count, 1);
        assert_eq!(record.created_at, clock.now());
    }

    #[tokio::test]
    async fn test_sqlite_expiry_is_strict_and_lazy() {
        let clock = ManualClock::default();
        let db = backend(&clock);

        db.set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(60)), &TagSet::new())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(db.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(db.get("k").await.unwrap().is_none());
        assert_eq!(db.stats().await.unwrap().item_count, 0);
    }

    #[tokio::test]
    async fn test_sqlite_replace_resets_bookkeeping() {
        let clock = ManualClock::default();
        let db = backend(&clock);

        db.set("k", Bytes::from_static(b"v1"), Some(Duration::from_secs(5)), &tag_set(["a", "b"]))
            .await
            .unwrap();
        db.get("k").await.unwrap();
        db.get("k").await.unwrap();
        db.set("k", Bytes::from_static(b"v2"), None, &tag_set(["c"]))
            .await
            .unwrap();

        let record = db.get("k").await.unwrap().unwrap();
        assert_eq!(record.value.as_ref(), b"v2");
        assert_eq!(record.access_count, 1);
        assert_eq!(record.expires_at, None);

        // Old tags no longer match
        assert_eq!(db.delete_by_tags(&tag_set(["a"])).await.unwrap(), 0);
        assert_eq!(db.delete_by_tags(&tag_set(["c"])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_delete_by_tags_intersection() {
        let clock = ManualClock::default();
        let db = backend(&clock);

        db.set("u1", Bytes::from_static(b"1"), None, &tag_set(["user"])).await.unwrap();
        db.set("u2", Bytes::from_static(b"2"), None, &tag_set(["user", "vip"])).await.unwrap();
        db.set("v1", Bytes::from_static(b"3"), None, &tag_set(["vip"])).await.unwrap();
        db.set("o1", Bytes::from_static(b"4"), None, &tag_set(["order"])).await.unwrap();
        db.set("n", Bytes::from_static(b"5"), None, &TagSet::new()).await.unwrap();

        assert_eq!(db.delete_by_tags(&tag_set(["user", "vip"])).await.unwrap(), 3);
        assert!(db.get("o1").await.unwrap().is_some());
        assert!(db.get("n").await.unwrap().is_some());
        assert_eq!(db.delete_by_tags(&TagSet::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_clear_expired() {
        let clock = ManualClock::default();
        let db = backend(&clock);

        db.set("a", Bytes::from_static(b"1"), Some(Duration::from_secs(10)), &tag_set(["t"]))
            .await
            .unwrap();
        db.set("b", Bytes::from_static(b"2"), Some(Duration::from_secs(100)), &TagSet::new())
            .await
            .unwrap();
        db.set("c", Bytes::from_static(b"3"), None, &TagSet::new()).await.unwrap();

        clock.advance(Duration::from_secs(11));
        assert_eq!(db.clear_expired().await.unwrap(), 1);
        assert_eq!(db.stats().await.unwrap().item_count, 2);
    }

    #[tokio::test]
    async fn test_sqlite_stats() {
        let clock = ManualClock::default();
        let db = backend(&clock);

        db.set("a", Bytes::from_static(b"12345"), None, &TagSet::new()).await.unwrap();
        clock.advance(Duration::from_secs(1));
        db.set("b", Bytes::from_static(b"123"), None, &TagSet::new()).await.unwrap();
        db.get("a").await.unwrap();
        db.get("missing").await.unwrap();

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.backend, "sqlite");
        assert_eq!(stats.item_count, 2);
        assert_eq!(stats.total_bytes, 8);
        assert_eq!(stats.total_accesses, 1);
        assert_eq!(stats.hits, Some(1));
        assert_eq!(stats.misses, Some(1));
        assert_eq!(stats.hit_rate, Some(0.5));
        assert!(stats.oldest_entry < stats.newest_entry);
    }

    #[tokio::test]
    async fn test_sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let db = SqliteBackend::open(&path).unwrap();
            db.set("k", Bytes::from_static(b"persisted"), None, &tag_set(["p"]))
                .await
                .unwrap();
        }

        let db = SqliteBackend::open(&path).unwrap();
        let record = db.get("k").await.unwrap().unwrap();
        assert_eq!(record.value.as_ref(), b"persisted");
        assert_eq!(record.tags, tag_set(["p"]));
    }

    #[tokio::test]
    async fn test_sqlite_clear() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.set("a", Bytes::from_static(b"1"), None, &tag_set(["t"])).await.unwrap();
        db.clear().await.unwrap();
        assert!(db.get("a").await.unwrap().is_none());
        assert_eq!(db.delete_by_tags(&tag_set(["t"])).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_batch_write_and_ttl() {
        let clock = ManualClock::default();
        let db = backend(&clock);

        let batch = vec![
            BatchEntry::new("a", Bytes::from_static(b"1"))
                .with_ttl(Duration::from_secs(60))
                .with_tags(tag_set(["batch"])),
            BatchEntry::new("b", Bytes::from_static(b"2")).with_tags(tag_set(["batch"])),
        ];
        assert_eq!(db.set_many(&batch).await.unwrap(), 2);

        clock.advance(Duration::from_secs(15));
        assert_eq!(
            db.ttl("a").await.unwrap(),
            Some(Lifetime::Remaining(Duration::from_secs(45)))
        );
        assert_eq!(db.ttl("b").await.unwrap(), Some(Lifetime::Unbounded));
        assert_eq!(db.ttl("missing").await.unwrap(), None);

        // ttl is not a read
        assert_eq!(db.stats().await.unwrap().total_accesses, 0);

        clock.advance(Duration::from_secs(46));
        assert_eq!(db.ttl("a").await.unwrap(), None);
        assert_eq!(db.delete_by_tags(&tag_set(["batch"])).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_busy_connection_times_out() {
        use crate::cache::backend::Tier;
        use crate::cache::metrics::CacheMetrics;
        use crate::cache::tier::CacheTier;
        use std::time::Instant;

        let db = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let conn = Arc::clone(&db.db);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });
        locked_rx.recv().unwrap();

        let metrics = Arc::new(CacheMetrics::new());
        let tier = Tier::new(CacheTier::L2Local, db.clone(), metrics.clone())
            .with_timeout(Some(Duration::from_millis(50)));

        let start = Instant::now();
        assert!(tier.get("k").await.is_none());
        assert!(start.elapsed() < Duration::from_millis(400));
        assert_eq!(metrics.snapshot().tiers[&CacheTier::L2Local].timeouts, 1);

        holder.join().unwrap();
    }
}
