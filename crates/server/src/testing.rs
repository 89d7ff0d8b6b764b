//! In-process origin and state builders for router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use mediagate_client::{DirectResolver, FetchResponse, Gateway, Origin, OriginStream};
use mediagate_core::{CacheDb, Error, ObjectCache, ObjectCacheLimits, ObjectStore, ResponseCache};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::handler::{AppState, router};
pub(crate) use crate::routes::encode;

pub const MIB: u64 = 1024 * 1024;

#[derive(Default)]
pub struct FakeOrigin {
    objects: Mutex<HashMap<String, (Bytes, Option<u64>)>>,
    pub fetches: AtomicUsize,
    pub streams: AtomicUsize,
}

impl FakeOrigin {
    pub fn serve(&self, url: &str, body: &'static [u8], declared: Option<u64>) {
        self.objects
            .lock()
            .unwrap()
            .insert(url.to_string(), (Bytes::from_static(body), declared));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn body(&self, url: &reqwest::Url) -> Result<Bytes, Error> {
        self.objects
            .lock()
            .unwrap()
            .get(url.as_str())
            .map(|(body, _)| body.clone())
            .ok_or(Error::UpstreamStatus(404))
    }
}

#[async_trait]
impl Origin for FakeOrigin {
    async fn probe_size(&self, url: &reqwest::Url) -> Option<u64> {
        self.objects.lock().unwrap().get(url.as_str()).and_then(|(_, declared)| *declared)
    }

    async fn fetch(&self, url: &reqwest::Url, _limit: u64) -> Result<FetchResponse, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let bytes = self.body(url)?;
        Ok(FetchResponse { content_type: Some("video/mp4".into()), bytes })
    }

    async fn stream(&self, url: &reqwest::Url) -> Result<OriginStream, Error> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        let bytes = self.body(url)?;
        Ok(OriginStream {
            content_type: None,
            content_length: Some(bytes.len() as u64),
            body: futures::stream::iter(vec![Ok(bytes)]).boxed(),
        })
    }
}

/// State over an in-memory database, a temporary downloads directory and a
/// [`FakeOrigin`], with a 100 MiB cache and a 50 MiB per-object ceiling.
pub async fn state() -> (Arc<AppState>, Arc<FakeOrigin>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = CacheDb::open_in_memory().await.unwrap();
    let store = ObjectStore::open(dir.path().join("downloads")).unwrap();
    let limits = ObjectCacheLimits { max_cache_bytes: 100 * MIB, max_file_bytes: 50 * MIB };
    let cache = Arc::new(ObjectCache::new(db.clone(), store, limits));
    let origin = Arc::new(FakeOrigin::default());
    let gateway = Arc::new(Gateway::new(cache, origin.clone()));

    let state = Arc::new(AppState {
        gateway,
        responses: ResponseCache::new(db, std::time::Duration::from_secs(3600)),
        resolver: Arc::new(DirectResolver),
    });
    (state, origin, dir)
}

pub async fn send(state: &Arc<AppState>, method: &str, uri: &str) -> Response {
    let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    router(state.clone()).oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
