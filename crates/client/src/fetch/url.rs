//! Media URL canonicalization.
//!
//! The canonical string is the object cache key, so two spellings of the
//! same resource must canonicalize identically.

use mediagate_core::Error;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for Error {
    fn from(err: UrlError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

/// Canonicalize a media URL.
///
/// - surrounding whitespace is trimmed
/// - a missing scheme defaults to `https://`
/// - only `http` and `https` with a host are accepted
/// - the fragment is dropped; the query is kept as given
///
/// Host lowercasing and default-port removal come from the URL parser.
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let with_scheme;
    let candidate = if trimmed.contains("://") {
        trimmed
    } else {
        with_scheme = format!("https://{trimmed}");
        &with_scheme
    };

    let mut parsed = url::Url::parse(candidate).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    parsed.set_fragment(None);
    Ok(parsed)
}

/// Canonical string form used as the object cache key.
pub fn cache_key(input: &str) -> Result<(url::Url, String), UrlError> {
    let url = canonicalize(input)?;
    let key = url.as_str().to_string();
    Ok((url, key))
}
