//! Cache key derivation: response fingerprints and object local names.

use sha2::{Digest, Sha256};

/// Extensions kept verbatim when naming a cached object.
const MEDIA_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "avi", "mkv", "jpg", "jpeg", "png", "gif", "webp"];

/// Extension used when the URL path carries none we recognise.
pub const DEFAULT_EXTENSION: &str = "mp4";

/// Build a response cache fingerprint from an endpoint name and its parameters.
///
/// Parameters are joined in order, so callers must pass them in a stable order.
pub fn compute_fingerprint(endpoint: &str, params: &[&str]) -> String {
    let mut key = String::from(endpoint);
    for param in params {
        key.push(':');
        key.push_str(param);
    }
    key
}

/// Derive the on-disk name for a cached object.
///
/// The stem is the full hex SHA-256 of the source URL, so the name is stable
/// across repeated inserts of the same URL.
pub fn object_local_name(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{digest}.{}", media_extension(url))
}

/// Extension taken from the last URL path segment, lowercased, or
/// [`DEFAULT_EXTENSION`] when the URL doesn't parse or names no known type.
pub fn media_extension(url: &str) -> &'static str {
    let Ok(parsed) = url::Url::parse(url) else {
        return DEFAULT_EXTENSION;
    };
    let Some(last_segment) = parsed.path_segments().and_then(|mut segments| segments.next_back()) else {
        return DEFAULT_EXTENSION;
    };
    let Some((_, ext)) = last_segment.rsplit_once('.') else {
        return DEFAULT_EXTENSION;
    };
    let ext = ext.to_ascii_lowercase();
    MEDIA_EXTENSIONS
        .iter()
        .find(|known| **known == ext)
        .copied()
        .unwrap_or(DEFAULT_EXTENSION)
}
