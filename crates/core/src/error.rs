//! Unified error types for mediagate.
//!
//! Messages carry a stable code prefix so log lines and HTTP error bodies
//! can be grepped by category.

use tokio_rusqlite::rusqlite;

/// Unified error type shared by the cache, the origin client and the server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an empty source).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid or unsupported URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Metadata store operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Object store I/O failed.
    #[error("STORAGE_ERROR: {0}")]
    Storage(#[from] std::io::Error),

    /// A local object name that would escape the object store directory.
    #[error("STORAGE_ERROR: invalid object name: {0}")]
    InvalidObjectName(String),

    /// Network or protocol failure talking to the origin.
    #[error("UPSTREAM_ERROR: {0}")]
    UpstreamFetch(String),

    /// Origin answered with a non-success status.
    #[error("UPSTREAM_STATUS: {0}")]
    UpstreamStatus(u16),

    /// Origin body exceeded the caller's byte limit.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// Payload could not be encoded or decoded.
    #[error("PAYLOAD_ERROR: {0}")]
    Payload(#[from] serde_json::Error),

    /// The resolver gave a definitive failure for a source.
    #[error("RESOLVE_FAILED: {0}")]
    ResolveFailed(String),
}

impl Error {
    /// True for failures that originate at the remote endpoint.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::UpstreamFetch(_) | Error::UpstreamStatus(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
