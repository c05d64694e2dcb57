//! Answer entry CRUD operations.
//!
//! Provides functions for creating, reading, touching, reclaiming and
//! purging cached question/answer pairs.

use super::connection::CacheDb;
use super::hash::compute_cache_key;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};

/// Default category tag for a plain answer.
pub const DEFAULT_CATEGORY: &str = "answer";

const ENTRY_COLUMNS: &str = "key, question_text, answer_text, confidence, created_at, last_accessed_at, hit_count, origin_host, category";

/// A resolved question/answer pair.
///
/// Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheEntry {
    pub key: String,
    pub question_text: String,
    pub answer_text: String,
    pub confidence: u8,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub hit_count: u64,
    pub origin_host: String,
    pub category: String,
}

impl CacheEntry {
    /// Build a fresh entry for `question`, keyed by its content hash.
    pub fn new(question: impl Into<String>, answer: impl Into<String>, confidence: u8, now_ms: i64) -> Self {
        let question_text = question.into();
        Self {
            key: compute_cache_key(&question_text),
            question_text,
            answer_text: answer.into(),
            confidence: confidence.min(100),
            created_at: now_ms,
            last_accessed_at: now_ms,
            hit_count: 0,
            origin_host: String::new(),
            category: DEFAULT_CATEGORY.to_string(),
        }
    }

    pub fn with_origin_host(mut self, host: impl Into<String>) -> Self {
        self.origin_host = host.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Reject entries that must never be persisted.
    pub fn validate(&self) -> Result<(), Error> {
        if self.question_text.trim().is_empty() {
            return Err(Error::InvalidInput("question text cannot be empty".into()));
        }
        if self.answer_text.trim().is_empty() {
            return Err(Error::InvalidInput("answer text cannot be empty".into()));
        }
        if self.confidence > 100 {
            return Err(Error::InvalidInput(format!("confidence {} exceeds 100", self.confidence)));
        }
        if self.key.is_empty() {
            return Err(Error::InvalidInput("key cannot be empty".into()));
        }
        Ok(())
    }
}

/// Limits applied by a bounded insert.
#[derive(Debug, Clone, Copy)]
pub struct InsertPolicy {
    /// Hard ceiling on the number of stored entries.
    pub ceiling: u64,
    /// Entry count at which stale entries are reclaimed before the write.
    pub reclaim_at: u64,
    /// Entries last accessed before this instant (epoch ms) are stale.
    pub stale_before_ms: i64,
    /// Maximum entries reclaimed per invocation.
    pub batch_size: u64,
}

/// What a bounded insert had to delete to make room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub reclaimed: u64,
    pub evicted: u64,
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        key: row.get(0)?,
        question_text: row.get(1)?,
        answer_text: row.get(2)?,
        confidence: row.get::<_, i64>(3)?.clamp(0, 100) as u8,
        created_at: row.get(4)?,
        last_accessed_at: row.get(5)?,
        hit_count: row.get::<_, i64>(6)?.max(0) as u64,
        origin_host: row.get(7)?,
        category: row.get(8)?,
    })
}

fn count(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM answers", [], |row| row.get::<_, i64>(0))
        .map(|n| n as u64)
}

fn upsert(conn: &rusqlite::Connection, entry: &CacheEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO answers (
            key, question_text, answer_text, confidence, created_at,
            last_accessed_at, hit_count, origin_host, category
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(key) DO UPDATE SET
            question_text = excluded.question_text,
            answer_text = excluded.answer_text,
            confidence = excluded.confidence,
            created_at = excluded.created_at,
            last_accessed_at = excluded.last_accessed_at,
            hit_count = excluded.hit_count,
            origin_host = excluded.origin_host,
            category = excluded.category",
        params![
            &entry.key,
            &entry.question_text,
            &entry.answer_text,
            entry.confidence as i64,
            entry.created_at,
            entry.last_accessed_at,
            entry.hit_count as i64,
            &entry.origin_host,
            &entry.category,
        ],
    )?;
    Ok(())
}

/// Delete up to `batch` entries last accessed before `cutoff_ms`, oldest first.
fn reclaim(conn: &rusqlite::Connection, cutoff_ms: i64, batch: u64) -> rusqlite::Result<u64> {
    let deleted = conn.execute(
        "DELETE FROM answers WHERE key IN (
            SELECT key FROM answers
            WHERE last_accessed_at < ?1
            ORDER BY last_accessed_at ASC
            LIMIT ?2
        )",
        params![cutoff_ms, batch as i64],
    )?;
    Ok(deleted as u64)
}

/// Delete the `n` least recently accessed entries.
fn evict_oldest(conn: &rusqlite::Connection, n: u64) -> rusqlite::Result<u64> {
    let deleted = conn.execute(
        "DELETE FROM answers WHERE key IN (
            SELECT key FROM answers ORDER BY last_accessed_at ASC LIMIT ?1
        )",
        params![n as i64],
    )?;
    Ok(deleted as u64)
}

impl CacheDb {
    /// Insert or replace an entry without any capacity checks.
    pub async fn upsert_entry(&self, entry: &CacheEntry) -> Result<(), Error> {
        let entry = entry.clone();
        self.conn
            .call(move |conn| upsert(conn, &entry))
            .await
            .map_err(Error::from)
    }

    /// Insert or replace an entry while keeping the store under `policy.ceiling`.
    ///
    /// Runs in a single transaction: reclaim stale entries once the count
    /// reaches `policy.reclaim_at`, then, for a new key on a full store,
    /// evict the least recently accessed entries before writing.
    pub async fn insert_bounded(&self, entry: &CacheEntry, policy: InsertPolicy) -> Result<InsertOutcome, Error> {
        let entry = entry.clone();
        self.conn
            .call(move |conn| -> Result<InsertOutcome, Error> {
                let tx = conn.transaction()?;
                let mut outcome = InsertOutcome::default();

                let before = count(&tx)?;
                if before + 1 >= policy.reclaim_at {
                    outcome.reclaimed = reclaim(&tx, policy.stale_before_ms, policy.batch_size)?;
                }

                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM answers WHERE key = ?1)",
                    params![&entry.key],
                    |row| row.get(0),
                )?;
                if !exists {
                    let current = count(&tx)?;
                    if current >= policy.ceiling {
                        outcome.evicted = evict_oldest(&tx, current + 1 - policy.ceiling)?;
                    }
                }

                upsert(&tx, &entry)?;
                tx.commit()?;
                Ok(outcome)
            })
            .await
            .map_err(Error::from)
    }

    /// Get an entry by key without recording an access.
    ///
    /// Returns None if the key doesn't exist in the cache.
    pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let sql = format!("SELECT {ENTRY_COLUMNS} FROM answers WHERE key = ?1");
                let entry = conn.query_row(&sql, params![key], entry_from_row).optional()?;
                Ok(entry)
            })
            .await
            .map_err(Error::from)
    }

    /// Record one read: bump `hit_count` and set `last_accessed_at`.
    ///
    /// Returns false if the entry vanished in the meantime.
    pub async fn touch_entry(&self, key: &str, now_ms: i64) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE answers SET hit_count = hit_count + 1, last_accessed_at = ?2 WHERE key = ?1",
                    params![key, now_ms],
                )
            })
            .await
            .map(|updated| updated > 0)
            .map_err(Error::from)
    }

    pub async fn count_entries(&self) -> Result<u64, Error> {
        self.conn.call(|conn| count(conn)).await.map_err(Error::from)
    }

    /// Entry count and approximate stored byte size.
    pub async fn entry_footprint(&self) -> Result<(u64, u64), Error> {
        self.conn
            .call(|conn| {
                conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(
                        LENGTH(key) + LENGTH(question_text) + LENGTH(answer_text)
                        + LENGTH(origin_host) + LENGTH(category) + 32
                    ), 0) FROM answers",
                    [],
                    |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
                )
            })
            .await
            .map_err(Error::from)
    }

    /// Delete stale entries, oldest access first, at most `batch` per call.
    ///
    /// Returns the number of deleted entries.
    pub async fn reclaim_stale(&self, stale_before_ms: i64, batch: u64) -> Result<u64, Error> {
        self.conn
            .call(move |conn| reclaim(conn, stale_before_ms, batch))
            .await
            .map_err(Error::from)
    }

    /// Delete entries created before `cutoff_ms`.
    pub async fn purge_created_before(&self, cutoff_ms: i64) -> Result<u64, Error> {
        self.conn
            .call(move |conn| conn.execute("DELETE FROM answers WHERE created_at < ?1", params![cutoff_ms]))
            .await
            .map(|n| n as u64)
            .map_err(Error::from)
    }

    /// Delete entries recorded for an origin host.
    pub async fn purge_by_host(&self, host: &str) -> Result<u64, Error> {
        let host = host.to_string();
        self.conn
            .call(move |conn| conn.execute("DELETE FROM answers WHERE origin_host = ?1", params![host]))
            .await
            .map(|n| n as u64)
            .map_err(Error::from)
    }

    /// Keep only the `max_entries` most recently accessed entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn trim_to(&self, max_entries: u64) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let current = count(conn)?;
                if current <= max_entries {
                    return Ok(0);
                }
                Ok(evict_oldest(conn, current - max_entries)?)
            })
            .await
            .map_err(Error::from)
    }

    /// Most recently created entries for an origin host.
    pub async fn entries_by_host(&self, host: &str, limit: usize) -> Result<Vec<CacheEntry>, Error> {
        let host = host.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<CacheEntry>, Error> {
                let sql = format!(
                    "SELECT {ENTRY_COLUMNS} FROM answers WHERE origin_host = ?1 ORDER BY created_at DESC LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let entries = stmt
                    .query_map(params![host, limit as i64], entry_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn delete_entry(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| conn.execute("DELETE FROM answers WHERE key = ?1", params![key]))
            .await
            .map(|n| n > 0)
            .map_err(Error::from)
    }

    pub async fn clear_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| conn.execute("DELETE FROM answers", []))
            .await
            .map(|n| n as u64)
            .map_err(Error::from)
    }
}
