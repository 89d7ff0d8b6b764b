//! `GET /proxy?url=...`: serve a media object through the delivery gateway.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::HeaderValue;
use axum::response::Response;
use mediagate_client::{Delivery, OriginStream};
use mediagate_core::CachedObject;
use tokio_util::io::ReaderStream;

use super::{UrlParams, guess_content_type, media_headers};
use crate::error::ApiError;
use crate::handler::AppState;

pub async fn proxy(State(state): State<Arc<AppState>>, Query(params): Query<UrlParams>) -> Result<Response, ApiError> {
    match state.gateway.deliver(&params.url).await? {
        Delivery::Cached(object) => match file_response(&object).await {
            Ok(response) => Ok(response),
            Err(err) => {
                // Evicted or removed between lookup and open.
                tracing::warn!(url = %object.url, error = %err, "cached file unreadable; passing through");
                state.gateway.cache().invalidate(&object.url).await;
                let stream = state.gateway.passthrough(&object.url).await?;
                Ok(stream_response(stream))
            }
        },
        Delivery::Fetched { bytes, content_type } => {
            let len = bytes.len() as u64;
            let mut response = Response::new(Body::from(bytes));
            media_headers(&mut response, upstream_content_type(content_type.as_deref()), Some(len));
            Ok(response)
        }
        Delivery::Passthrough(stream) => Ok(stream_response(stream)),
    }
}

async fn file_response(object: &CachedObject) -> std::io::Result<Response> {
    let file = tokio::fs::File::open(&object.path).await?;
    let len = file.metadata().await?.len();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    media_headers(&mut response, guess_content_type(&object.local_name), Some(len));
    Ok(response)
}

fn stream_response(stream: OriginStream) -> Response {
    let content_type = upstream_content_type(stream.content_type.as_deref());
    let mut response = Response::new(Body::from_stream(stream.body));
    media_headers(&mut response, content_type, stream.content_length);
    response
}

fn upstream_content_type(content_type: Option<&str>) -> HeaderValue {
    content_type
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"))
}
