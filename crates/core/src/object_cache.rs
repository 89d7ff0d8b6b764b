//! Size-bounded LRU cache of downloaded media objects.
//!
//! Rows live in the metadata store, bytes in the [`ObjectStore`]. This type
//! keeps the two consistent: a row whose file is missing is purged on the
//! next lookup, and eviction removes the row even when the file delete fails.
//!
//! Entry lifecycle per URL:
//!
//! ```text
//! absent --put--> unverified --mark_verified--> verified
//!    ^                 |                            |
//!    +---- invalidate / clear_all / evict_lru ------+
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::Error;
use crate::cache::hash::object_local_name;
use crate::cache::{CacheDb, Download, format_timestamp};
use crate::config::AppConfig;
use crate::store::ObjectStore;

const MIB: f64 = 1024.0 * 1024.0;

/// Ceilings governing admission and eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCacheLimits {
    /// Total bytes the cache may hold once an insertion completes.
    pub max_cache_bytes: u64,
    /// Largest object admitted into the cache.
    pub max_file_bytes: u64,
}

impl From<&AppConfig> for ObjectCacheLimits {
    fn from(config: &AppConfig) -> Self {
        Self { max_cache_bytes: config.max_cache_bytes, max_file_bytes: config.max_file_bytes }
    }
}

/// A cache hit or a freshly stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedObject {
    pub url: String,
    pub local_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub verified: bool,
}

/// Outcome of an eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub entries_evicted: u64,
    pub bytes_freed: u64,
}

/// Outcome of [`ObjectCache::clear_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub files_deleted: u64,
    pub bytes_freed: u64,
}

/// Snapshot of cache occupancy, shaped for the stats endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_files: u64,
    pub verified_files: u64,
    pub unverified_files: u64,
    pub total_bytes: u64,
    pub total_mb: f64,
    pub max_cache_mb: f64,
    pub max_file_mb: f64,
}

/// Round a byte count to megabytes with two decimals.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / MIB * 100.0).round() / 100.0
}

/// Strictly increasing access timestamps.
///
/// Two touches in the same microsecond would otherwise tie and make LRU
/// order depend on URL ordering instead of access order.
#[derive(Debug, Default)]
struct AccessClock {
    last_micros: AtomicI64,
}

impl AccessClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.last_micros.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last_micros
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => {
                    let secs = next.div_euclid(1_000_000);
                    let nanos = (next.rem_euclid(1_000_000) * 1_000) as u32;
                    return DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now);
                }
                Err(actual) => prev = actual,
            }
        }
    }

    fn stamp(&self) -> String {
        format_timestamp(self.now())
    }
}

/// Media object cache.
#[derive(Debug)]
pub struct ObjectCache {
    db: CacheDb,
    store: ObjectStore,
    limits: ObjectCacheLimits,
    clock: AccessClock,
    /// Serializes budget checks, eviction and row inserts across `put`s.
    admission: Mutex<()>,
}

impl ObjectCache {
    pub fn new(db: CacheDb, store: ObjectStore, limits: ObjectCacheLimits) -> Self {
        Self { db, store, limits, clock: AccessClock::default(), admission: Mutex::new(()) }
    }

    pub fn limits(&self) -> ObjectCacheLimits {
        self.limits
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Whether an object of `size` bytes is a caching candidate.
    pub fn admits(&self, size: u64) -> bool {
        size <= self.limits.max_file_bytes
    }

    /// Look up a cached object by source URL.
    ///
    /// A hit requires both the row and its file, and bumps recency whether or
    /// not the entry is verified. A row without a file is deleted and reported
    /// as a miss; read failures are misses too.
    pub async fn lookup(&self, url: &str) -> Option<CachedObject> {
        let download = match self.db.get_download(url).await {
            Ok(Some(download)) => download,
            Ok(None) => {
                tracing::debug!(url, "object cache miss");
                return None;
            }
            Err(err) => {
                tracing::error!(url, error = %err, "object cache lookup failed");
                return None;
            }
        };

        let path = match self.store.path_for(&download.local_name) {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(url, error = %err, "purging object cache row with unusable name");
                self.delete_row(url).await;
                return None;
            }
        };

        if !self.store.exists(&download.local_name).await {
            tracing::warn!(url, local_name = %download.local_name, "cached file missing; purging row");
            self.delete_row(url).await;
            return None;
        }

        self.touch(url).await;
        tracing::debug!(url, local_name = %download.local_name, verified = download.verified, "object cache hit");

        Some(CachedObject {
            url: download.url,
            local_name: download.local_name,
            path,
            size_bytes: download.size_bytes,
            verified: download.verified,
        })
    }

    /// Store `bytes` as the cached object for `url`.
    ///
    /// Least recently used entries are evicted first when the new object
    /// would push the cache over its ceiling. An object larger than the
    /// ceiling on its own is still stored. The entry starts unverified.
    ///
    /// The file is written before the budget lock is taken, so concurrent
    /// puts only queue behind each other for the eviction and row insert.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its row could not be written; no
    /// entry is left behind in that case.
    pub async fn put(&self, url: &str, bytes: &[u8]) -> Result<CachedObject, Error> {
        let local_name = object_local_name(url);
        let written = self.store.write(&local_name, bytes).await?;

        let _admission = self.admission.lock().await;
        self.make_room(url, written).await;

        let now = self.clock.now();
        let download = Download {
            url: url.to_string(),
            local_name: local_name.clone(),
            size_bytes: written,
            created_at: format_timestamp(now),
            last_accessed_at: format_timestamp(now),
            verified: false,
        };

        if let Err(err) = self.db.upsert_download(&download).await {
            if let Err(remove_err) = self.store.remove(&local_name).await {
                tracing::warn!(url, error = %remove_err, "failed to remove object after row write failure");
            }
            return Err(err);
        }

        tracing::info!(url, local_name = %local_name, size_bytes = written, "cached object");

        Ok(CachedObject {
            url: download.url,
            path: self.store.path_for(&local_name)?,
            local_name,
            size_bytes: written,
            verified: false,
        })
    }

    /// Bump recency for `url`. Unknown URLs are ignored.
    pub async fn touch(&self, url: &str) {
        if let Err(err) = self.db.touch_download(url, &self.clock.stamp()).await {
            tracing::warn!(url, error = %err, "failed to update last access time");
        }
    }

    /// Mark `url` as verified. Idempotent; unknown URLs are ignored.
    ///
    /// Returns true if an entry exists for `url`.
    pub async fn mark_verified(&self, url: &str) -> bool {
        match self.db.mark_download_verified(url).await {
            Ok(found) => {
                if found {
                    tracing::info!(url, "verified cached object");
                } else {
                    tracing::debug!(url, "verify requested for uncached object");
                }
                found
            }
            Err(err) => {
                tracing::error!(url, error = %err, "failed to mark cached object verified");
                false
            }
        }
    }

    /// Remove the entry for `url`, file and row, ignoring failures.
    ///
    /// Used when a consumer reports a playback or content error, so one bad
    /// object is dropped without touching the rest of the cache.
    pub async fn invalidate(&self, url: &str) {
        let download = match self.db.get_download(url).await {
            Ok(Some(download)) => download,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(url, error = %err, "failed to read entry for invalidation");
                return;
            }
        };

        if let Err(err) = self.store.remove(&download.local_name).await {
            tracing::error!(url, local_name = %download.local_name, error = %err, "failed to delete cached file");
        }
        self.delete_row(url).await;
        tracing::info!(url, local_name = %download.local_name, "invalidated cached object");
    }

    /// Delete every cached object.
    ///
    /// `files_deleted` and `bytes_freed` count files actually removed from disk.
    pub async fn clear_all(&self) -> ClearReport {
        let downloads = match self.db.list_downloads_lru().await {
            Ok(downloads) => downloads,
            Err(err) => {
                tracing::error!(error = %err, "failed to list cached objects for clearing");
                return ClearReport::default();
            }
        };

        let mut report = ClearReport::default();
        for download in downloads {
            match self.store.remove(&download.local_name).await {
                Ok(Some(len)) => {
                    report.files_deleted += 1;
                    report.bytes_freed += len;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(local_name = %download.local_name, error = %err, "failed to delete cached file")
                }
            }
            self.delete_row(&download.url).await;
        }

        tracing::info!(
            files_deleted = report.files_deleted,
            mb_freed = bytes_to_mb(report.bytes_freed),
            "cleared object cache"
        );
        report
    }

    /// Sum of recorded object sizes. Read failures count as an empty cache.
    pub async fn current_size(&self) -> u64 {
        match self.db.total_download_bytes().await {
            Ok(total) => total,
            Err(err) => {
                tracing::error!(error = %err, "failed to read object cache size");
                0
            }
        }
    }

    /// Evict least recently used entries until at least `bytes_needed` bytes
    /// have been freed or the cache is empty.
    pub async fn evict_lru(&self, bytes_needed: u64) -> EvictionReport {
        self.evict_lru_except(bytes_needed, None).await
    }

    /// Occupancy counters for the stats endpoint.
    pub async fn stats(&self) -> CacheStats {
        let counts = match self.db.download_counts().await {
            Ok(counts) => counts,
            Err(err) => {
                tracing::error!(error = %err, "failed to read object cache stats");
                Default::default()
            }
        };

        CacheStats {
            total_files: counts.total_files,
            verified_files: counts.verified_files,
            unverified_files: counts.total_files.saturating_sub(counts.verified_files),
            total_bytes: counts.total_bytes,
            total_mb: bytes_to_mb(counts.total_bytes),
            max_cache_mb: bytes_to_mb(self.limits.max_cache_bytes),
            max_file_mb: bytes_to_mb(self.limits.max_file_bytes),
        }
    }

    /// Delete object files that no row refers to.
    ///
    /// Rows without files are left for [`ObjectCache::lookup`] to heal.
    /// Returns the number of files removed.
    pub async fn reconcile(&self) -> u64 {
        let known: HashSet<String> = match self.db.list_downloads_lru().await {
            Ok(downloads) => downloads.into_iter().map(|d| d.local_name).collect(),
            Err(err) => {
                tracing::error!(error = %err, "failed to list cached objects for reconcile");
                return 0;
            }
        };
        let on_disk = match self.store.list().await {
            Ok(names) => names,
            Err(err) => {
                tracing::error!(error = %err, "failed to list object store for reconcile");
                return 0;
            }
        };

        let mut removed = 0;
        for name in on_disk.into_iter().filter(|name| !known.contains(name)) {
            match self.store.remove(&name).await {
                Ok(Some(_)) => removed += 1,
                Ok(None) => {}
                Err(err) => tracing::warn!(local_name = %name, error = %err, "failed to remove orphaned object"),
            }
        }
        if removed > 0 {
            tracing::info!(removed, "removed orphaned object files");
        }
        removed
    }

    /// Evict enough to fit `incoming` more bytes for `url`.
    ///
    /// The existing entry for `url` is about to be replaced, so its size is
    /// not counted against the ceiling and it is never an eviction victim.
    async fn make_room(&self, url: &str, incoming: u64) {
        let replaced = match self.db.get_download(url).await {
            Ok(Some(existing)) => existing.size_bytes,
            _ => 0,
        };
        let projected = self.current_size().await.saturating_sub(replaced) + incoming;
        if projected <= self.limits.max_cache_bytes {
            return;
        }

        let bytes_needed = projected - self.limits.max_cache_bytes;
        tracing::info!(url, bytes_needed, "object cache full; evicting");
        self.evict_lru_except(bytes_needed, Some(url)).await;
    }

    async fn evict_lru_except(&self, bytes_needed: u64, keep: Option<&str>) -> EvictionReport {
        let mut report = EvictionReport::default();
        if bytes_needed == 0 {
            return report;
        }

        let candidates = match self.db.list_downloads_lru().await {
            Ok(downloads) => downloads,
            Err(err) => {
                tracing::error!(error = %err, "failed to list cached objects for eviction");
                return report;
            }
        };

        for download in candidates {
            if report.bytes_freed >= bytes_needed {
                break;
            }
            if keep == Some(download.url.as_str()) {
                continue;
            }

            if let Err(err) = self.store.remove(&download.local_name).await {
                tracing::error!(local_name = %download.local_name, error = %err, "failed to delete evicted file");
            }
            match self.db.delete_download(&download.url).await {
                Ok(_) => {
                    report.entries_evicted += 1;
                    report.bytes_freed += download.size_bytes;
                    tracing::info!(
                        url = %download.url,
                        local_name = %download.local_name,
                        size_bytes = download.size_bytes,
                        "evicted cached object"
                    );
                }
                Err(err) => tracing::error!(url = %download.url, error = %err, "failed to delete evicted row"),
            }
        }

        if report.bytes_freed > 0 {
            tracing::info!(
                entries = report.entries_evicted,
                mb_freed = bytes_to_mb(report.bytes_freed),
                "eviction pass complete"
            );
        }
        report
    }

    async fn delete_row(&self, url: &str) {
        if let Err(err) = self.db.delete_download(url).await {
            tracing::error!(url, error = %err, "failed to delete object cache row");
        }
    }
}
