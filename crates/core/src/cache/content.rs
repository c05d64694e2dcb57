//! Policy layer over [`CacheDb`]: initialization state, access tracking,
//! capacity and age-based reclamation.

use super::connection::CacheDb;
use super::entries::{CacheEntry, InsertPolicy};
use crate::Error;
use crate::config::CacheConfig;
use crate::quota::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Size and utilization of the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheStats {
    pub entries: u64,
    pub approx_bytes: u64,
    pub ceiling: u64,
    /// `entries / ceiling`, in `[0, 1]`.
    pub utilization: f64,
}

/// Process-wide answer cache.
///
/// Every operation fails with [`Error::NotInitialized`] until one of the
/// `init` methods has opened the store and applied its migrations.
#[derive(Debug)]
pub struct ContentCache {
    db: OnceLock<CacheDb>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl ContentCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self { db: OnceLock::new(), config, clock }
    }

    /// Open (or create) the SQLite store at `path`.
    pub async fn init(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        if self.is_initialized() {
            return Ok(());
        }
        let db = CacheDb::open(path).await?;
        self.attach(db);
        Ok(())
    }

    /// Open a throwaway in-memory store.
    pub async fn init_in_memory(&self) -> Result<(), Error> {
        if self.is_initialized() {
            return Ok(());
        }
        let db = CacheDb::open_in_memory().await?;
        self.attach(db);
        Ok(())
    }

    fn attach(&self, db: CacheDb) {
        if self.db.set(db).is_err() {
            tracing::debug!("answer cache already initialized; keeping existing store");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.db.get().is_some()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The underlying store, for lookups the policy layer does not wrap.
    pub fn db(&self) -> Result<&CacheDb, Error> {
        self.db.get().ok_or(Error::NotInitialized)
    }

    /// Look up an entry and record the read.
    ///
    /// The returned entry already reflects the access. Persisting the access
    /// happens on a detached task; its failure is logged, never returned.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let db = self.db()?;
        let Some(mut entry) = db.get_entry(key).await? else {
            tracing::debug!(key, "answer cache miss");
            return Ok(None);
        };

        let now = self.clock.now_ms();
        entry.hit_count += 1;
        entry.last_accessed_at = now;

        let db = db.clone();
        let task_key = key.to_string();
        tokio::spawn(async move {
            match db.touch_entry(&task_key, now).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!(key = %task_key, "entry evicted before access could be recorded"),
                Err(e) => tracing::warn!(key = %task_key, error = %e, "failed to record cache access"),
            }
        });

        tracing::debug!(key, hits = entry.hit_count, "answer cache hit");
        Ok(Some(entry))
    }

    /// Read an entry without recording an access.
    pub async fn peek(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        self.db()?.get_entry(key).await
    }

    /// Insert or replace an entry, reclaiming and evicting as needed so the
    /// entry count never exceeds the ceiling once the write completes.
    pub async fn set(&self, entry: &CacheEntry) -> Result<(), Error> {
        let db = self.db()?;
        entry.validate()?;

        let policy = InsertPolicy {
            ceiling: self.config.ceiling,
            reclaim_at: self.config.reclaim_at(),
            stale_before_ms: self.stale_before_ms(),
            batch_size: self.config.reclamation_batch_size,
        };
        let outcome = db.insert_bounded(entry, policy).await?;

        if outcome.reclaimed > 0 {
            tracing::info!(reclaimed = outcome.reclaimed, "reclaimed stale answer cache entries");
        }
        if outcome.evicted > 0 {
            tracing::info!(evicted = outcome.evicted, ceiling = self.config.ceiling, "evicted entries at cache ceiling");
        }
        Ok(())
    }

    /// Run one reclamation pass. Returns the number of deleted entries.
    pub async fn reclaim(&self) -> Result<u64, Error> {
        let deleted = self
            .db()?
            .reclaim_stale(self.stale_before_ms(), self.config.reclamation_batch_size)
            .await?;
        tracing::info!(deleted, "answer cache reclamation pass");
        Ok(deleted)
    }

    fn stale_before_ms(&self) -> i64 {
        (self.clock.now() - self.config.retention()).timestamp_millis()
    }

    pub async fn count(&self) -> Result<u64, Error> {
        self.db()?.count_entries().await
    }

    pub async fn stats(&self) -> Result<CacheStats, Error> {
        let (entries, approx_bytes) = self.db()?.entry_footprint().await?;
        let ceiling = self.config.ceiling;
        let utilization = if ceiling == 0 { 0.0 } else { (entries as f64 / ceiling as f64).min(1.0) };
        Ok(CacheStats { entries, approx_bytes, ceiling, utilization })
    }

    pub async fn clear(&self) -> Result<u64, Error> {
        let deleted = self.db()?.clear_entries().await?;
        tracing::info!(deleted, "answer cache cleared");
        Ok(deleted)
    }

    pub async fn delete(&self, key: &str) -> Result<bool, Error> {
        self.db()?.delete_entry(key).await
    }

    pub async fn purge_older_than(&self, days: u32) -> Result<u64, Error> {
        let cutoff = self.clock.now() - chrono::Duration::days(i64::from(days));
        self.db()?.purge_created_before(cutoff.timestamp_millis()).await
    }

    pub async fn purge_by_host(&self, host: &str) -> Result<u64, Error> {
        self.db()?.purge_by_host(host).await
    }

    pub async fn trim_to(&self, max_entries: u64) -> Result<u64, Error> {
        self.db()?.trim_to(max_entries).await
    }

    pub async fn entries_by_host(&self, host: &str, limit: usize) -> Result<Vec<CacheEntry>, Error> {
        self.db()?.entries_by_host(host, limit).await
    }
}
