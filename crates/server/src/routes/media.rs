//! `GET /api/media?url=...`: media catalog for a source.
//!
//! Catalogs are served from the response cache when fresh, keyed by the
//! canonical source URL, with each item's `cached_path` re-checked against
//! the object cache. On a miss the resolver lists the source's media, each
//! item is prefetched into the object cache where policy allows, and the
//! composed catalog is cached.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use futures::StreamExt;
use mediagate_client::canonicalize;
use mediagate_core::Error;
use mediagate_core::cache::hash::compute_fingerprint;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{UrlParams, encode};
use crate::error::ApiError;
use crate::handler::AppState;

/// Concurrent prefetches per catalog request.
const PREFETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct Catalog {
    source: String,
    total_items: usize,
    media: Vec<CatalogItem>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogItem {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    proxy_url: String,
    cached_path: Option<String>,
}

pub async fn media(State(state): State<Arc<AppState>>, Query(params): Query<UrlParams>) -> Result<Json<Value>, ApiError> {
    let raw = params.url.trim();
    if raw.is_empty() {
        return Err(Error::InvalidInput("url must not be empty".into()).into());
    }
    // Sources that are not http(s) URLs are left for the resolver to reject.
    let source = canonicalize(raw).map(String::from).unwrap_or_else(|_| raw.to_string());

    let fingerprint = compute_fingerprint("media", &[source.as_str()]);
    if let Some(cached) = state.responses.get(&fingerprint).await {
        match serde_json::from_value::<Catalog>(cached) {
            Ok(catalog) => return catalog_json(refresh_cached_paths(&state, catalog).await),
            Err(err) => tracing::warn!(%source, error = %err, "unreadable cached catalog; rebuilding"),
        }
    }

    let items = state.resolver.resolve(&source).await?;
    tracing::info!(%source, items = items.len(), "resolved source");

    let gateway = &state.gateway;
    let media: Vec<CatalogItem> = futures::stream::iter(items)
        .map(|item| async move {
            let cached = gateway.prefetch(&item.url).await;
            CatalogItem {
                proxy_url: format!("/proxy?url={}", encode(&item.url)),
                cached_path: cached.map(|object| downloads_path(&object.local_name)),
                url: item.url,
                label: item.label,
            }
        })
        .buffered(PREFETCH_CONCURRENCY)
        .collect()
        .await;

    let catalog = Catalog { source, total_items: media.len(), media };
    let payload = serde_json::to_value(&catalog).map_err(Error::from)?;
    state.responses.put_default(&fingerprint, &payload).await;

    Ok(Json(payload))
}

/// Point each item's `cached_path` at what the object cache holds now.
///
/// Objects evicted or invalidated since the catalog was built lose their path.
async fn refresh_cached_paths(state: &AppState, mut catalog: Catalog) -> Catalog {
    for item in &mut catalog.media {
        item.cached_path = state.gateway.cached(&item.url).await.map(|object| downloads_path(&object.local_name));
    }
    catalog
}

fn catalog_json(catalog: Catalog) -> Result<Json<Value>, ApiError> {
    Ok(Json(serde_json::to_value(&catalog).map_err(Error::from)?))
}

fn downloads_path(local_name: &str) -> String {
    format!("/downloads/{local_name}")
}
