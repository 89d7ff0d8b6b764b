//! HTTP error responses for the mediagate server.
//!
//! Every error renders as `{"detail": "<CODE>: <message>"}` with a status
//! chosen by category.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mediagate_core::Error;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),

    /// No object stored under the requested local name.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Core(err) => match err {
                Error::InvalidInput(_) | Error::InvalidUrl(_) | Error::InvalidObjectName(_) => StatusCode::BAD_REQUEST,
                Error::UpstreamFetch(_) | Error::UpstreamStatus(_) | Error::FetchTooLarge(_) | Error::ResolveFailed(_) => {
                    StatusCode::BAD_GATEWAY
                }
                Error::Database(_) | Error::MigrationFailed(_) | Error::Storage(_) | Error::Payload(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
