//! Multiplexer error types.

use mdmux_feed::FeedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    /// The feed provider refused or failed the upstream subscribe.
    /// No multiplexer state was changed.
    #[error("Subscribe failed for {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: FeedError,
    },
}

pub type MuxResult<T> = Result<T, MuxError>;
