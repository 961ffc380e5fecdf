//! Error types for pmx-feed.

use pmx_core::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("connection setup exceeded {0}s")]
    ConnectTimeout(u64),

    #[error("tick channel closed by consumer")]
    ChannelClosed,
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;
