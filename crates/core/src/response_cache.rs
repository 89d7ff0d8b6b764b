//! Best-effort TTL cache for composed API responses.
//!
//! Every storage failure is logged and reported as a miss or a no-op; this
//! cache never fails the request it sits in front of.

use std::time::Duration;

use chrono::{Datelike, Utc};
use serde_json::Value;

use crate::cache::{CacheDb, ResponseRow, format_timestamp, parse_timestamp};

/// Response cache keyed by caller-built fingerprints.
#[derive(Clone, Debug)]
pub struct ResponseCache {
    db: CacheDb,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(db: CacheDb, default_ttl: Duration) -> Self {
        Self { db, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return the payload for `fingerprint` if it hasn't expired.
    ///
    /// An expired or unreadable row is deleted and reported as a miss.
    pub async fn get(&self, fingerprint: &str) -> Option<Value> {
        let row = match self.db.get_response(fingerprint).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                tracing::debug!(fingerprint, "response cache miss");
                return None;
            }
            Err(err) => {
                tracing::error!(fingerprint, error = %err, "response cache read failed");
                return None;
            }
        };

        let now = Utc::now();
        let fresh = parse_timestamp(&row.expires_at).is_some_and(|expires_at| now < expires_at);
        if !fresh {
            tracing::debug!(fingerprint, expires_at = %row.expires_at, "response cache entry expired");
            self.remove_stale(fingerprint, &row).await;
            return None;
        }

        match serde_json::from_str(&row.payload) {
            Ok(payload) => {
                tracing::debug!(fingerprint, "response cache hit");
                Some(payload)
            }
            Err(err) => {
                tracing::warn!(fingerprint, error = %err, "discarding undecodable response cache payload");
                self.invalidate(fingerprint).await;
                None
            }
        }
    }

    /// Store `payload` under `fingerprint` for `ttl`, replacing any previous row.
    pub async fn put(&self, fingerprint: &str, payload: &Value, ttl: Duration) {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            tracing::warn!(fingerprint, "response cache ttl out of range; not caching");
            return;
        };
        if ttl <= chrono::Duration::zero() {
            tracing::debug!(fingerprint, "zero response cache ttl; not caching");
            return;
        }

        let payload = match serde_json::to_string(payload) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(fingerprint, error = %err, "failed to encode response payload");
                return;
            }
        };

        let created_at = Utc::now();
        // Years past 9999 lose the fixed-width timestamp form.
        let Some(expires_at) = created_at
            .checked_add_signed(ttl)
            .filter(|expires_at| expires_at.year() <= 9999)
        else {
            tracing::warn!(fingerprint, ttl_secs = ttl.num_seconds(), "response cache ttl too large; not caching");
            return;
        };

        let row = ResponseRow {
            fingerprint: fingerprint.to_string(),
            payload,
            created_at: format_timestamp(created_at),
            expires_at: format_timestamp(expires_at),
        };

        match self.db.put_response(&row).await {
            Ok(()) => tracing::info!(fingerprint, ttl_secs = ttl.num_seconds(), "response cached"),
            Err(err) => tracing::error!(fingerprint, error = %err, "response cache save failed"),
        }
    }

    /// Store `payload` with the default TTL.
    pub async fn put_default(&self, fingerprint: &str, payload: &Value) {
        self.put(fingerprint, payload, self.default_ttl).await;
    }

    /// Drop the row for `fingerprint`, if any.
    pub async fn invalidate(&self, fingerprint: &str) {
        if let Err(err) = self.db.delete_response(fingerprint).await {
            tracing::error!(fingerprint, error = %err, "response cache delete failed");
        }
    }

    /// Delete all expired rows. Returns how many were removed.
    ///
    /// Purely reclaims space; `get` already ignores expired rows.
    pub async fn sweep_expired(&self) -> u64 {
        let now = format_timestamp(Utc::now());
        match self.db.purge_expired_responses(&now).await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count, "swept expired response cache entries");
                }
                count
            }
            Err(err) => {
                tracing::error!(error = %err, "response cache sweep failed");
                0
            }
        }
    }

    async fn remove_stale(&self, fingerprint: &str, row: &ResponseRow) {
        let result = if parse_timestamp(&row.expires_at).is_some() {
            self.db
                .delete_response_if_expired(fingerprint, &format_timestamp(Utc::now()))
                .await
        } else {
            self.db.delete_response(fingerprint).await
        };
        if let Err(err) = result {
            tracing::error!(fingerprint, error = %err, "failed to delete expired response cache entry");
        }
    }
}
