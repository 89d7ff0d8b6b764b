//! HTTP route handlers.

pub mod cache;
pub mod downloads;
pub mod media;
pub mod proxy;

use axum::Json;
use axum::http::{HeaderValue, header};
use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value, json};

/// Query string carrying a single `url` parameter.
#[derive(Debug, Deserialize)]
pub struct UrlParams {
    pub url: String,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Percent-encode `value` for use as a query parameter.
pub(crate) fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Content type for a stored object, guessed from its file name.
pub(crate) fn guess_content_type(name: &str) -> HeaderValue {
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    HeaderValue::from_str(mime.as_ref()).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

/// Headers every served media body carries.
pub(crate) fn media_headers(response: &mut Response, content_type: HeaderValue, content_length: Option<u64>) {
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=86400"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    if let Some(len) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
}
