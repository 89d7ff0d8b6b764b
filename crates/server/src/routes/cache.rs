//! Cache administration endpoints.
//!
//! These report success even when individual file deletions fail; failures
//! are logged by the object cache.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use mediagate_core::CacheStats;
use mediagate_core::object_cache::bytes_to_mb;
use serde_json::{Value, json};

use super::UrlParams;
use crate::error::ApiError;
use crate::handler::AppState;

/// `POST /verify-cache?url=...`: the client confirmed the object plays.
pub async fn verify(State(state): State<Arc<AppState>>, Query(params): Query<UrlParams>) -> Result<Json<Value>, ApiError> {
    state.gateway.verify(&params.url).await?;
    Ok(Json(json!({ "status": "verified" })))
}

/// `POST /invalidate-cache?url=...`: the client hit a playback error.
pub async fn invalidate(
    State(state): State<Arc<AppState>>, Query(params): Query<UrlParams>,
) -> Result<Json<Value>, ApiError> {
    state.gateway.invalidate(&params.url).await?;
    Ok(Json(json!({ "status": "invalidated" })))
}

/// `POST /clear-all-cache`
pub async fn clear_all(State(state): State<Arc<AppState>>) -> Json<Value> {
    let report = state.gateway.clear_all().await;
    Json(json!({
        "status": "cleared",
        "files_deleted": report.files_deleted,
        "bytes_freed": report.bytes_freed,
        "mb_freed": bytes_to_mb(report.bytes_freed),
    }))
}

/// `GET /cache-stats`
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.gateway.stats().await)
}
