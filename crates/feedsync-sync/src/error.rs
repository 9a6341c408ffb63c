use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected content type {content_type:?}: {snippet}")]
    UnexpectedContentType {
        content_type: String,
        snippet: String,
    },
    /// The response decoded but carried an `error` field.
    #[error("backend error: {0}")]
    Backend(String),
    #[error("{0}")]
    Other(String),
}
