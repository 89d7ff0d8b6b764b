//! Delivery gateway: decides per request whether bytes come from the object
//! cache, a fresh cached fetch, or a passthrough stream.
//!
//! ### Decision order
//! 1. Cache hit: serve the file, whatever its verification state.
//! 2. Miss: probe the declared size. Unknown, failed or oversized probes go
//!    straight to passthrough.
//! 3. Fetch the whole body and store it. A body that outgrows the per-object
//!    ceiling is abandoned for passthrough; a failed write is served from
//!    memory.
//! 4. Passthrough streams from the origin and never persists.
//!
//! Cold misses for the same URL are single-flight: the second caller waits
//! for the first and then finds the cached copy.

mod inflight;

use std::sync::Arc;

use bytes::Bytes;
use mediagate_core::{CacheStats, CachedObject, ClearReport, Error, ObjectCache};

pub use inflight::InflightLocks;

use crate::fetch::{FetchResponse, Origin, OriginStream, cache_key};

/// How a request is answered.
#[derive(Debug)]
pub enum Delivery {
    /// Serve the file at `CachedObject::path`.
    Cached(CachedObject),
    /// Fetched in full but not cached.
    Fetched { bytes: Bytes, content_type: Option<String> },
    /// Relay the origin response as it arrives.
    Passthrough(OriginStream),
}

enum Fill {
    Cached(CachedObject),
    Uncached(FetchResponse),
    Declined,
}

/// The delivery gateway. One instance is shared by all request handlers.
pub struct Gateway {
    cache: Arc<ObjectCache>,
    origin: Arc<dyn Origin>,
    inflight: InflightLocks,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("cache", &self.cache)
            .field("inflight", &self.inflight)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(cache: Arc<ObjectCache>, origin: Arc<dyn Origin>) -> Self {
        Self { cache, origin, inflight: InflightLocks::new() }
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Answer a request for `raw_url`.
    ///
    /// # Errors
    ///
    /// `InvalidUrl` for unusable input; upstream errors when the origin
    /// fails and nothing is cached. No cache entry is created on error.
    pub async fn deliver(&self, raw_url: &str) -> Result<Delivery, Error> {
        let (url, key) = cache_key(raw_url)?;

        if let Some(hit) = self.cache.lookup(&key).await {
            return Ok(Delivery::Cached(hit));
        }

        match self.fill(&url, &key).await? {
            Fill::Cached(object) => Ok(Delivery::Cached(object)),
            Fill::Uncached(response) => {
                Ok(Delivery::Fetched { bytes: response.bytes, content_type: response.content_type })
            }
            Fill::Declined => self.stream(&url, &key).await.map(Delivery::Passthrough),
        }
    }

    /// Bring `raw_url` into the cache if policy allows, without serving it.
    ///
    /// Returns the cached object, or `None` when the object is not cacheable
    /// or anything failed along the way.
    pub async fn prefetch(&self, raw_url: &str) -> Option<CachedObject> {
        let (url, key) = match cache_key(raw_url) {
            Ok(parts) => parts,
            Err(err) => {
                tracing::warn!(url = raw_url, error = %err, "skipping prefetch of invalid URL");
                return None;
            }
        };

        if let Some(hit) = self.cache.lookup(&key).await {
            return Some(hit);
        }

        match self.fill(&url, &key).await {
            Ok(Fill::Cached(object)) => Some(object),
            Ok(Fill::Uncached(_)) | Ok(Fill::Declined) => None,
            Err(err) => {
                tracing::warn!(url = %key, error = %err, "prefetch failed");
                None
            }
        }
    }

    /// The cached copy of `raw_url`, if its file is still on disk.
    pub async fn cached(&self, raw_url: &str) -> Option<CachedObject> {
        let (_, key) = cache_key(raw_url).ok()?;
        self.cache.lookup(&key).await
    }

    /// Stream `raw_url` from the origin, bypassing the cache entirely.
    pub async fn passthrough(&self, raw_url: &str) -> Result<OriginStream, Error> {
        let (url, key) = cache_key(raw_url)?;
        self.stream(&url, &key).await
    }

    /// Mark the cached copy of `raw_url` as verified.
    ///
    /// Returns whether an entry existed. Uncached URLs are not an error.
    pub async fn verify(&self, raw_url: &str) -> Result<bool, Error> {
        let (_, key) = cache_key(raw_url)?;
        Ok(self.cache.mark_verified(&key).await)
    }

    /// Drop the cached copy of `raw_url`, if any.
    pub async fn invalidate(&self, raw_url: &str) -> Result<(), Error> {
        let (_, key) = cache_key(raw_url)?;
        self.cache.invalidate(&key).await;
        Ok(())
    }

    pub async fn clear_all(&self) -> ClearReport {
        self.cache.clear_all().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    async fn fill(&self, url: &reqwest::Url, key: &str) -> Result<Fill, Error> {
        let _guard = self.inflight.acquire(key).await;

        // Another caller may have filled the cache while we waited.
        if let Some(hit) = self.cache.lookup(key).await {
            return Ok(Fill::Cached(hit));
        }

        let Some(size) = self.origin.probe_size(url).await else {
            tracing::debug!(url = %key, "size unknown; passing through");
            return Ok(Fill::Declined);
        };
        if !self.cache.admits(size) {
            tracing::info!(url = %key, size, max_file_bytes = self.cache.limits().max_file_bytes, "object too large to cache");
            return Ok(Fill::Declined);
        }

        let response = match self.origin.fetch(url, self.cache.limits().max_file_bytes).await {
            Ok(response) => response,
            Err(Error::FetchTooLarge(detail)) => {
                tracing::info!(url = %key, %detail, "body outgrew probe; passing through");
                return Ok(Fill::Declined);
            }
            Err(err) => {
                tracing::warn!(url = %key, error = %err, "origin fetch failed");
                return Err(err);
            }
        };

        match self.cache.put(key, &response.bytes).await {
            Ok(object) => Ok(Fill::Cached(object)),
            Err(err) => {
                tracing::warn!(url = %key, error = %err, "failed to cache object; serving from memory");
                Ok(Fill::Uncached(response))
            }
        }
    }

    async fn stream(&self, url: &reqwest::Url, key: &str) -> Result<OriginStream, Error> {
        tracing::debug!(url = %key, "passthrough");
        self.origin.stream(url).await.inspect_err(|err| {
            tracing::warn!(url = %key, error = %err, "passthrough failed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{OriginClient, OriginConfig};
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use mediagate_core::{CacheDb, ObjectCacheLimits, ObjectStore};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    #[derive(Clone)]
    struct FakeObject {
        body: Bytes,
        declared: Option<u64>,
        status: u16,
    }

    #[derive(Default)]
    struct FakeOrigin {
        objects: Mutex<HashMap<String, FakeObject>>,
        probes: AtomicUsize,
        fetches: AtomicUsize,
        streams: AtomicUsize,
        fetch_delay: Duration,
        fetch_error: Option<u16>,
    }

    impl FakeOrigin {
        fn serve(&self, url: &str, body: &'static [u8], declared: Option<u64>) {
            let object = FakeObject { body: Bytes::from_static(body), declared, status: 200 };
            self.objects.lock().unwrap().insert(url.to_string(), object);
        }

        fn fail(&self, url: &str, status: u16) {
            let object = FakeObject { body: Bytes::new(), declared: Some(1), status };
            self.objects.lock().unwrap().insert(url.to_string(), object);
        }

        fn object(&self, url: &reqwest::Url) -> Option<FakeObject> {
            self.objects.lock().unwrap().get(url.as_str()).cloned()
        }
    }

    #[async_trait]
    impl Origin for FakeOrigin {
        async fn probe_size(&self, url: &reqwest::Url) -> Option<u64> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.object(url).filter(|o| o.status == 200).and_then(|o| o.declared)
        }

        async fn fetch(&self, url: &reqwest::Url, limit: u64) -> Result<FetchResponse, Error> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.fetch_delay).await;
            if let Some(status) = self.fetch_error {
                return Err(Error::UpstreamStatus(status));
            }
            let object = self
                .object(url)
                .ok_or_else(|| Error::UpstreamFetch("connection refused".into()))?;
            if object.status != 200 {
                return Err(Error::UpstreamStatus(object.status));
            }
            if object.body.len() as u64 > limit {
                return Err(Error::FetchTooLarge(format!("body exceeds {limit} bytes")));
            }
            Ok(FetchResponse { content_type: Some("video/mp4".into()), bytes: object.body })
        }

        async fn stream(&self, url: &reqwest::Url) -> Result<OriginStream, Error> {
            self.streams.fetch_add(1, Ordering::SeqCst);
            let object = self
                .object(url)
                .ok_or_else(|| Error::UpstreamFetch("connection refused".into()))?;
            if object.status != 200 {
                return Err(Error::UpstreamStatus(object.status));
            }
            let len = object.body.len() as u64;
            Ok(OriginStream {
                content_type: None,
                content_length: Some(len),
                body: futures_util::stream::iter(vec![Ok(object.body)]).boxed(),
            })
        }
    }

    struct Harness {
        gateway: Arc<Gateway>,
        origin: Arc<FakeOrigin>,
        dir: TempDir,
    }

    async fn harness_with(origin: FakeOrigin, limits: ObjectCacheLimits) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = CacheDb::open_in_memory().await.unwrap();
        let store = ObjectStore::open(dir.path().join("downloads")).unwrap();
        let cache = Arc::new(ObjectCache::new(db, store, limits));
        let origin = Arc::new(origin);
        let gateway = Arc::new(Gateway::new(cache, origin.clone()));
        Harness { gateway, origin, dir }
    }

    async fn harness() -> Harness {
        harness_with(FakeOrigin::default(), ObjectCacheLimits { max_cache_bytes: 10 * 1024 * MIB, max_file_bytes: 50 * MIB })
            .await
    }

    async fn body_of(delivery: Delivery) -> Vec<u8> {
        match delivery {
            Delivery::Cached(object) => tokio::fs::read(&object.path).await.unwrap(),
            Delivery::Fetched { bytes, .. } => bytes.to_vec(),
            Delivery::Passthrough(stream) => {
                let chunks: Vec<Bytes> = stream.body.map(|c| c.unwrap()).collect().await;
                chunks.concat()
            }
        }
    }

    #[tokio::test]
    async fn test_second_delivery_is_served_from_cache() {
        let h = harness().await;
        h.origin.serve("https://cdn.example.com/a.mp4", b"movie", Some(5));

        let first = h.gateway.deliver("https://cdn.example.com/a.mp4").await.unwrap();
        assert!(matches!(first, Delivery::Cached(_)));
        assert_eq!(body_of(first).await, b"movie");

        let second = h.gateway.deliver("https://CDN.example.com/a.mp4#t=3").await.unwrap();
        assert!(matches!(&second, Delivery::Cached(o) if !o.verified));
        assert_eq!(body_of(second).await, b"movie");

        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(h.origin.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_object_is_never_cached() {
        let h = harness().await;
        h.origin.serve("https://cdn.example.com/big.mp4", b"huge", Some(200 * MIB));

        for _ in 0..3 {
            let delivery = h.gateway.deliver("https://cdn.example.com/big.mp4").await.unwrap();
            assert!(matches!(delivery, Delivery::Passthrough(_)));
            assert_eq!(body_of(delivery).await, b"huge");
        }

        assert_eq!(h.origin.streams.load(Ordering::SeqCst), 3);
        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(h.gateway.stats().await.total_files, 0);
    }

    #[tokio::test]
    async fn test_unknown_size_passes_through() {
        let h = harness().await;
        h.origin.serve("https://cdn.example.com/live.webm", b"chunked", None);

        let delivery = h.gateway.deliver("https://cdn.example.com/live.webm").await.unwrap();
        assert!(matches!(&delivery, Delivery::Passthrough(s) if s.content_type.is_none()));
        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 0);
        assert!(h.gateway.cache().lookup("https://cdn.example.com/live.webm").await.is_none());
    }

    #[tokio::test]
    async fn test_body_larger_than_declared_size_passes_through() {
        let limits = ObjectCacheLimits { max_cache_bytes: 1000, max_file_bytes: 4 };
        let h = harness_with(FakeOrigin::default(), limits).await;
        h.origin.serve("https://cdn.example.com/liar.mp4", b"0123456789", Some(3));

        let delivery = h.gateway.deliver("https://cdn.example.com/liar.mp4").await.unwrap();
        assert!(matches!(delivery, Delivery::Passthrough(_)));
        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(h.gateway.stats().await.total_files, 0);
    }

    #[tokio::test]
    async fn test_upstream_error_creates_no_entry() {
        let h = harness().await;
        h.origin.fail("https://cdn.example.com/403.mp4", 403);

        let err = h.gateway.deliver("https://cdn.example.com/403.mp4").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamStatus(403)));

        let err = h.gateway.deliver("https://cdn.example.com/gone.mp4").await.unwrap_err();
        assert!(err.is_upstream());

        assert_eq!(h.gateway.stats().await.total_files, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_after_size_check_creates_no_entry() {
        let origin = FakeOrigin { fetch_error: Some(500), ..Default::default() };
        let h = harness_with(origin, ObjectCacheLimits { max_cache_bytes: 100, max_file_bytes: 10 }).await;
        h.origin.serve("https://cdn.example.com/flaky.mp4", b"ok", Some(2));

        let err = h.gateway.deliver("https://cdn.example.com/flaky.mp4").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamStatus(500)));
        assert!(h.gateway.cache().lookup("https://cdn.example.com/flaky.mp4").await.is_none());
        assert!(h.gateway.prefetch("https://cdn.example.com/flaky.mp4").await.is_none());
    }

    async fn gateway_over(origin: Arc<dyn Origin>) -> (Gateway, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = CacheDb::open_in_memory().await.unwrap();
        let store = ObjectStore::open(dir.path().join("downloads")).unwrap();
        let limits = ObjectCacheLimits { max_cache_bytes: 10 * MIB, max_file_bytes: MIB };
        let cache = Arc::new(ObjectCache::new(db, store, limits));
        (Gateway::new(cache, origin), dir)
    }

    fn files_in(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path().join("downloads")).unwrap().count()
    }

    #[tokio::test]
    async fn test_stalled_origin_is_not_cached() {
        let addr = crate::testing::stalling_origin().await;
        let config = OriginConfig {
            probe_timeout: Duration::from_millis(200),
            passthrough_timeout: Duration::from_millis(300),
            ..Default::default()
        };
        let origin = Arc::new(OriginClient::new(config).unwrap());
        let (gateway, dir) = gateway_over(origin).await;
        let url = format!("http://{addr}/clip.mp4");

        let err = gateway.deliver(&url).await.unwrap_err();
        assert!(err.is_upstream());
        assert!(gateway.cache().lookup(&url).await.is_none());
        assert_eq!(gateway.stats().await.total_files, 0);
        assert_eq!(files_in(&dir), 0);
    }

    #[tokio::test]
    async fn test_truncated_fetch_leaves_nothing_behind() {
        let addr = crate::testing::truncating_origin(100, 10).await;
        let origin = Arc::new(OriginClient::new(OriginConfig::default()).unwrap());
        let (gateway, dir) = gateway_over(origin).await;
        let url = format!("http://{addr}/clip.mp4");

        let err = gateway.deliver(&url).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamFetch(_)));
        assert!(gateway.cache().lookup(&url).await.is_none());
        assert!(gateway.prefetch(&url).await.is_none());
        assert_eq!(gateway.stats().await.total_files, 0);
        assert_eq!(files_in(&dir), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let origin = FakeOrigin { fetch_delay: Duration::from_millis(50), ..Default::default() };
        let h = harness_with(origin, ObjectCacheLimits { max_cache_bytes: 1000, max_file_bytes: 100 }).await;
        h.origin.serve("https://cdn.example.com/hot.mp4", b"popular", Some(7));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gateway = h.gateway.clone();
            handles.push(tokio::spawn(async move { gateway.deliver("https://cdn.example.com/hot.mp4").await }));
        }
        for handle in handles {
            let delivery = handle.await.unwrap().unwrap();
            assert_eq!(body_of(delivery).await, b"popular");
        }

        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(h.origin.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_failure_serves_from_memory() {
        let h = harness().await;
        h.origin.serve("https://cdn.example.com/a.mp4", b"fragile", Some(7));
        std::fs::remove_dir_all(h.dir.path().join("downloads")).unwrap();

        let delivery = h.gateway.deliver("https://cdn.example.com/a.mp4").await.unwrap();
        assert!(matches!(&delivery, Delivery::Fetched { content_type: Some(ct), .. } if ct == "video/mp4"));
        assert_eq!(body_of(delivery).await, b"fragile");
        assert_eq!(h.gateway.stats().await.total_files, 0);
    }

    #[tokio::test]
    async fn test_prefetch() {
        let h = harness().await;
        h.origin.serve("https://cdn.example.com/a.jpg", b"img", Some(3));
        h.origin.serve("https://cdn.example.com/b.mp4", b"vid", None);

        let cached = h.gateway.prefetch("https://cdn.example.com/a.jpg").await.unwrap();
        assert_eq!(cached.size_bytes, 3);
        assert!(cached.local_name.ends_with(".jpg"));

        assert!(h.gateway.prefetch("https://cdn.example.com/b.mp4").await.is_none());
        assert!(h.gateway.prefetch("ftp://cdn.example.com/c.mp4").await.is_none());
        assert!(h.gateway.prefetch("https://cdn.example.com/missing.mp4").await.is_none());
        assert_eq!(h.origin.streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_verify_and_invalidate() {
        let h = harness().await;
        h.origin.serve("https://cdn.example.com/a.mp4", b"movie", Some(5));

        assert!(!h.gateway.verify("https://cdn.example.com/a.mp4").await.unwrap());
        h.gateway.deliver("https://cdn.example.com/a.mp4").await.unwrap();
        assert!(h.gateway.verify("cdn.example.com/a.mp4").await.unwrap());

        let hit = h.gateway.deliver("https://cdn.example.com/a.mp4").await.unwrap();
        assert!(matches!(hit, Delivery::Cached(o) if o.verified));

        h.gateway.invalidate("https://cdn.example.com/a.mp4").await.unwrap();
        assert!(h.gateway.cache().lookup("https://cdn.example.com/a.mp4").await.is_none());

        h.gateway.deliver("https://cdn.example.com/a.mp4").await.unwrap();
        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_reports_current_state() {
        let h = harness().await;
        h.origin.serve("https://cdn.example.com/a.mp4", b"movie", Some(5));
        assert!(h.gateway.cached("https://cdn.example.com/a.mp4").await.is_none());

        h.gateway.prefetch("https://cdn.example.com/a.mp4").await.unwrap();
        let object = h.gateway.cached("HTTPS://cdn.example.com/a.mp4#t=1").await.unwrap();
        assert_eq!(object.size_bytes, 5);

        h.gateway.invalidate("https://cdn.example.com/a.mp4").await.unwrap();
        assert!(h.gateway.cached("https://cdn.example.com/a.mp4").await.is_none());
        assert!(h.gateway.cached("").await.is_none());
        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_urls_are_rejected() {
        let h = harness().await;
        for raw in ["", "   ", "file:///etc/passwd", "javascript:alert(1)"] {
            assert!(matches!(h.gateway.deliver(raw).await, Err(Error::InvalidUrl(_))), "{raw:?}");
        }
        assert!(matches!(h.gateway.verify("").await, Err(Error::InvalidUrl(_))));
        assert!(matches!(h.gateway.invalidate("ftp://x/y").await, Err(Error::InvalidUrl(_))));
        assert_eq!(h.origin.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clear_all_then_refetch() {
        let h = harness().await;
        h.origin.serve("https://cdn.example.com/a.mp4", b"aaaa", Some(4));
        h.origin.serve("https://cdn.example.com/b.mp4", b"bb", Some(2));
        h.gateway.deliver("https://cdn.example.com/a.mp4").await.unwrap();
        h.gateway.deliver("https://cdn.example.com/b.mp4").await.unwrap();

        let report = h.gateway.clear_all().await;
        assert_eq!(report, ClearReport { files_deleted: 2, bytes_freed: 6 });
        assert_eq!(h.gateway.stats().await.total_files, 0);

        h.gateway.deliver("https://cdn.example.com/a.mp4").await.unwrap();
        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 3);
    }
}
