//! Source resolution: turns a catalog source (an album page, a gallery, a
//! single media link) into the media URLs it contains.
//!
//! Implementations must be idempotent and must terminate; a source that can
//! never be resolved is reported as [`Error::ResolveFailed`].

use async_trait::async_trait;
use mediagate_core::Error;
use serde::{Deserialize, Serialize};

use crate::fetch::canonicalize;

/// One media item found in a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMedia {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Media items in `source`, in source order.
    async fn resolve(&self, source: &str) -> Result<Vec<ResolvedMedia>, Error>;
}

/// Resolver for sources that already are media URLs.
///
/// The source is canonicalized and returned as the only item.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectResolver;

#[async_trait]
impl Resolver for DirectResolver {
    async fn resolve(&self, source: &str) -> Result<Vec<ResolvedMedia>, Error> {
        let url = canonicalize(source).map_err(|e| Error::ResolveFailed(format!("{source}: {e}")))?;
        let label = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        Ok(vec![ResolvedMedia { url: url.into(), label }])
    }
}
