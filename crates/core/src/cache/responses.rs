//! Response cache rows (`api_cache` table).

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A stored response payload with its validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRow {
    pub fingerprint: String,
    pub payload: String,
    pub created_at: String,
    pub expires_at: String,
}

impl CacheDb {
    /// Get a response row by fingerprint, expired or not.
    pub async fn get_response(&self, fingerprint: &str) -> Result<Option<ResponseRow>, Error> {
        let fingerprint = fingerprint.to_string();
        self.conn
            .call(move |conn| -> Result<Option<ResponseRow>, Error> {
                let result = conn.query_row(
                    "SELECT fingerprint, payload, created_at, expires_at FROM api_cache WHERE fingerprint = ?1",
                    params![fingerprint],
                    |row| {
                        Ok(ResponseRow {
                            fingerprint: row.get(0)?,
                            payload: row.get(1)?,
                            created_at: row.get(2)?,
                            expires_at: row.get(3)?,
                        })
                    },
                );

                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace a response row.
    ///
    /// Uses UPSERT semantics so concurrent writers for the same fingerprint
    /// leave exactly one row behind.
    pub async fn put_response(&self, row: &ResponseRow) -> Result<(), Error> {
        let row = row.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO api_cache (fingerprint, payload, created_at, expires_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(fingerprint) DO UPDATE SET
                        payload = excluded.payload,
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at",
                    params![row.fingerprint, row.payload, row.created_at, row.expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a response row unconditionally.
    ///
    /// Returns true if a row was removed.
    pub async fn delete_response(&self, fingerprint: &str) -> Result<bool, Error> {
        let fingerprint = fingerprint.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM api_cache WHERE fingerprint = ?1", params![fingerprint])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a response row only if it has expired as of `now`.
    ///
    /// A row refreshed by a concurrent writer survives.
    pub async fn delete_response_if_expired(&self, fingerprint: &str, now: &str) -> Result<bool, Error> {
        let fingerprint = fingerprint.to_string();
        let now = now.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM api_cache WHERE fingerprint = ?1 AND expires_at <= ?2",
                    params![fingerprint, now],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every response row that expired as of `now`.
    ///
    /// Returns the number of deleted rows.
    pub async fn purge_expired_responses(&self, now: &str) -> Result<u64, Error> {
        let now = now.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM api_cache WHERE expires_at <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of rows currently in the response table.
    pub async fn count_responses(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM api_cache", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
