//! Object cache rows (`downloads` table).
//!
//! Rows describe files held by the object store. Every mutation here is a
//! single statement; the object cache layers file handling on top.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Metadata for one cached object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    pub url: String,
    pub local_name: String,
    pub size_bytes: u64,
    pub created_at: String,
    pub last_accessed_at: String,
    pub verified: bool,
}

/// Aggregate counts over the `downloads` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadCounts {
    pub total_files: u64,
    pub verified_files: u64,
    pub total_bytes: u64,
}

const DOWNLOAD_COLUMNS: &str = "url, local_name, size_bytes, created_at, last_accessed_at, verified";

fn download_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Download> {
    Ok(Download {
        url: row.get(0)?,
        local_name: row.get(1)?,
        size_bytes: row.get::<_, i64>(2)?.max(0) as u64,
        created_at: row.get(3)?,
        last_accessed_at: row.get(4)?,
        verified: row.get::<_, i32>(5)? == 1,
    })
}

impl CacheDb {
    /// Get a download row by source URL.
    pub async fn get_download(&self, url: &str) -> Result<Option<Download>, Error> {
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Download>, Error> {
                let sql = format!("SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE url = ?1");
                match conn.query_row(&sql, params![url], download_from_row) {
                    Ok(download) => Ok(Some(download)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace a download row keyed by URL.
    ///
    /// A replaced row takes every field from `download`, including `verified`.
    pub async fn upsert_download(&self, download: &Download) -> Result<(), Error> {
        let download = download.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO downloads (url, local_name, size_bytes, created_at, last_accessed_at, verified)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(url) DO UPDATE SET
                        local_name = excluded.local_name,
                        size_bytes = excluded.size_bytes,
                        created_at = excluded.created_at,
                        last_accessed_at = excluded.last_accessed_at,
                        verified = excluded.verified",
                    params![
                        download.url,
                        download.local_name,
                        download.size_bytes as i64,
                        download.created_at,
                        download.last_accessed_at,
                        download.verified as i32,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Set `last_accessed_at` for a URL. Returns true if the row exists.
    pub async fn touch_download(&self, url: &str, accessed_at: &str) -> Result<bool, Error> {
        let url = url.to_string();
        let accessed_at = accessed_at.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "UPDATE downloads SET last_accessed_at = ?2 WHERE url = ?1",
                    params![url, accessed_at],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Flag a download as verified. Returns true if the row exists.
    pub async fn mark_download_verified(&self, url: &str) -> Result<bool, Error> {
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("UPDATE downloads SET verified = 1 WHERE url = ?1", params![url])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a download row. Returns true if a row was removed.
    pub async fn delete_download(&self, url: &str) -> Result<bool, Error> {
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM downloads WHERE url = ?1", params![url])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// All download rows, least recently accessed first.
    ///
    /// Ties on the access timestamp are broken by URL so the order is total.
    pub async fn list_downloads_lru(&self) -> Result<Vec<Download>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<Download>, Error> {
                let sql = format!("SELECT {DOWNLOAD_COLUMNS} FROM downloads ORDER BY last_accessed_at ASC, url ASC");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], download_from_row)?;
                let mut downloads = Vec::new();
                for row in rows {
                    downloads.push(row?);
                }
                Ok(downloads)
            })
            .await
            .map_err(Error::from)
    }

    /// Sum of `size_bytes` across all rows.
    pub async fn total_download_bytes(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let total: i64 =
                    conn.query_row("SELECT COALESCE(SUM(size_bytes), 0) FROM downloads", [], |row| row.get(0))?;
                Ok(total.max(0) as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// File, verified-file and byte totals in one query.
    pub async fn download_counts(&self) -> Result<DownloadCounts, Error> {
        self.conn
            .call(|conn| -> Result<DownloadCounts, Error> {
                let counts = conn.query_row(
                    "SELECT
                        COUNT(*),
                        COALESCE(SUM(CASE WHEN verified = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(size_bytes), 0)
                    FROM downloads",
                    [],
                    |row| {
                        Ok(DownloadCounts {
                            total_files: row.get::<_, i64>(0)?.max(0) as u64,
                            verified_files: row.get::<_, i64>(1)?.max(0) as u64,
                            total_bytes: row.get::<_, i64>(2)?.max(0) as u64,
                        })
                    },
                )?;
                Ok(counts)
            })
            .await
            .map_err(Error::from)
    }
}
