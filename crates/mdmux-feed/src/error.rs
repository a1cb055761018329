//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription rejected for {topic}: {reason}")]
    Rejected { topic: String, reason: String },

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Feed closed")]
    Closed,
}

pub type FeedResult<T> = Result<T, FeedError>;
