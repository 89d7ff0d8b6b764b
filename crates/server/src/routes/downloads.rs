//! `GET /downloads/{name}`: serve a stored object by its local name.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::Response;
use mediagate_core::Error;
use tokio_util::io::ReaderStream;

use super::{guess_content_type, media_headers};
use crate::error::ApiError;
use crate::handler::AppState;

pub async fn download(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Result<Response, ApiError> {
    let store = state.gateway.cache().store();
    let file = match store.open_file(&name).await {
        Ok(Some(file)) => file,
        Ok(None) | Err(Error::InvalidObjectName(_)) => return Err(ApiError::NotFound(name)),
        Err(err) => return Err(err.into()),
    };
    let len = file.metadata().await.map_err(Error::from)?.len();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    media_headers(&mut response, guess_content_type(&name), Some(len));
    Ok(response)
}
