//! Shared application state and the HTTP router.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use mediagate_client::{DirectResolver, Gateway, OriginClient, OriginConfig, Resolver};
use mediagate_core::{AppConfig, CacheDb, Error, ObjectCache, ObjectCacheLimits, ObjectStore, ResponseCache};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;

/// State shared by every handler.
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub responses: ResponseCache,
    pub resolver: Arc<dyn Resolver>,
}

impl AppState {
    /// Open the stores named in `config` and build the shared services.
    ///
    /// Orphaned object files and expired response rows are cleaned up before
    /// the state is handed out.
    pub async fn open(config: &AppConfig) -> Result<Arc<Self>, Error> {
        let db = CacheDb::open(&config.db_path).await?;
        let store = ObjectStore::open(&config.downloads_dir)?;

        let cache = Arc::new(ObjectCache::new(db.clone(), store, ObjectCacheLimits::from(config)));
        cache.reconcile().await;

        let responses = ResponseCache::new(db, config.response_ttl());
        responses.sweep_expired().await;

        let origin = Arc::new(OriginClient::new(OriginConfig::from(config))?);
        let gateway = Arc::new(Gateway::new(cache, origin));

        tracing::info!(
            db_path = %config.db_path.display(),
            downloads_dir = %config.downloads_dir.display(),
            max_cache_bytes = config.max_cache_bytes,
            max_file_bytes = config.max_file_bytes,
            "cache ready"
        );

        Ok(Arc::new(Self { gateway, responses, resolver: Arc::new(DirectResolver) }))
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/proxy", get(routes::proxy::proxy))
        .route("/downloads/{name}", get(routes::downloads::download))
        .route("/api/media", get(routes::media::media))
        .route("/verify-cache", post(routes::cache::verify))
        .route("/invalidate-cache", post(routes::cache::invalidate))
        .route("/clear-all-cache", post(routes::cache::clear_all))
        .route("/cache-stats", get(routes::cache::stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
