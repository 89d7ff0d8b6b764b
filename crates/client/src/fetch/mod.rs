//! Origin HTTP access: size probes, full fetches and passthrough streams.
//!
//! ### Timeouts
//! - Probes (HEAD) use a short timeout; a timeout means "size unknown".
//! - Full fetches use a long timeout covering the whole body.
//! - Passthrough only bounds the wait for response headers; the body then
//!   streams for as long as the consumer keeps reading.
//!
//! ### Headers
//! - `User-Agent` and an optional `Referer` are sent on every request.
//!
//! The [`Origin`] trait is the seam the delivery gateway talks through, so
//! the gateway can be exercised without a network.

pub mod url;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::{Client, header};

pub use self::url::{UrlError, cache_key, canonicalize};

use mediagate_core::{AppConfig, Error};

/// Body of a passthrough response.
pub type ByteStream = BoxStream<'static, Result<Bytes, Error>>;

/// Configuration for the origin client.
#[derive(Debug, Clone)]
pub struct OriginConfig {
    pub user_agent: String,
    pub referer: Option<String>,
    pub probe_timeout: Duration,
    pub fetch_timeout: Duration,
    pub passthrough_timeout: Duration,
    pub max_redirects: usize,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for OriginConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            referer: config.referer.clone(),
            probe_timeout: config.probe_timeout(),
            fetch_timeout: config.fetch_timeout(),
            passthrough_timeout: config.passthrough_timeout(),
            max_redirects: 10,
        }
    }
}

/// A fully buffered origin response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// An origin response whose body is still in flight.
///
/// Dropping the stream drops the underlying connection, which aborts the
/// transfer.
pub struct OriginStream {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for OriginStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginStream")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Remote content endpoint as seen by the delivery gateway.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Declared size of the object, or `None` when the origin doesn't say,
    /// the probe fails, or it times out.
    async fn probe_size(&self, url: &reqwest::Url) -> Option<u64>;

    /// Download the whole object.
    ///
    /// Fails with [`Error::FetchTooLarge`] once the body exceeds `limit` bytes.
    async fn fetch(&self, url: &reqwest::Url, limit: u64) -> Result<FetchResponse, Error>;

    /// Start streaming the object without buffering it.
    async fn stream(&self, url: &reqwest::Url) -> Result<OriginStream, Error>;
}

/// reqwest-backed [`Origin`], built once at startup and shared.
#[derive(Debug, Clone)]
pub struct OriginClient {
    http: Client,
    config: OriginConfig,
}

impl OriginClient {
    /// Create a new origin client with the given configuration.
    pub fn new(config: OriginConfig) -> Result<Self, Error> {
        let mut headers = header::HeaderMap::new();
        if let Some(referer) = &config.referer {
            let value = header::HeaderValue::from_str(referer)
                .map_err(|e| Error::InvalidInput(format!("invalid referer: {e}")))?;
            headers.insert(header::REFERER, value);
        }

        let http = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .connect_timeout(config.probe_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::UpstreamFetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &OriginConfig {
        &self.config
    }
}

#[async_trait]
impl Origin for OriginClient {
    async fn probe_size(&self, url: &reqwest::Url) -> Option<u64> {
        let response = match self
            .http
            .head(url.as_str())
            .timeout(self.config.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(%url, error = %e, timeout = e.is_timeout(), "size probe failed");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(%url, status = response.status().as_u16(), "size probe rejected");
            return None;
        }

        let size = declared_length(response.headers());
        if size.is_none() {
            tracing::debug!(%url, "no content-length on probe");
        }
        size
    }

    async fn fetch(&self, url: &reqwest::Url, limit: u64) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let mut response = self
            .http
            .get(url.as_str())
            .timeout(self.config.fetch_timeout)
            .send()
            .await
            .map_err(|e| upstream_error("request failed", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus(status.as_u16()));
        }

        if let Some(len) = declared_length(response.headers())
            && len > limit
        {
            return Err(Error::FetchTooLarge(format!("{len} bytes exceeds {limit}")));
        }

        let final_url = response.url().clone();
        let content_type = content_type(response.headers());

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| upstream_error("failed to read response", &e))?
        {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(Error::FetchTooLarge(format!("body exceeds {limit} bytes")));
            }
            body.extend_from_slice(&chunk);
        }

        let fetch_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(%url, %final_url, fetch_ms, bytes = body.len(), "fetched object");

        Ok(FetchResponse { content_type, bytes: body.freeze() })
    }

    async fn stream(&self, url: &reqwest::Url) -> Result<OriginStream, Error> {
        let request = self.http.get(url.as_str()).send();
        let response = tokio::time::timeout(self.config.passthrough_timeout, request)
            .await
            .map_err(|_| {
                Error::UpstreamFetch(format!(
                    "no response within {}ms",
                    self.config.passthrough_timeout.as_millis()
                ))
            })?
            .map_err(|e| upstream_error("request failed", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus(status.as_u16()));
        }

        let content_type = content_type(response.headers());
        let content_length = declared_length(response.headers());
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| upstream_error("stream interrupted", &e)))
            .boxed();

        Ok(OriginStream { content_type, content_length, body })
    }
}

/// The `Content-Length` header, if present and numeric.
///
/// Read from the header map rather than the body size hint, which is empty
/// for HEAD responses.
pub fn declared_length(headers: &header::HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn content_type(headers: &header::HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn upstream_error(context: &str, err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::UpstreamFetch(format!("{context}: timed out"))
    } else {
        Error::UpstreamFetch(format!("{context}: {err}"))
    }
}
