use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

/// Failure of a single indexer call. Views render these inline; nothing in the
/// engine retries on its own.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request to indexer failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("indexer returned HTTP {status} for {path}")]
    Status { status: u16, path: String },
    #[error("indexer reported an error: {0}")]
    Indexer(String),
    #[error("post {0} not found")]
    NotFound(String),
    #[error("malformed indexer response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid indexer URL: {0}")]
    InvalidUrl(String),
}
