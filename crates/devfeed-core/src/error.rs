//! Error type for the read and mutation paths.
//!
//! Store methods return `anyhow::Result`; the feed, profile, and mutation
//! entry points wrap those failures as [`FeedError::Store`] so callers can
//! tell a retryable backend failure from a bad request.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// The caller sent parameters the core cannot serve.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A referenced content item (or comment) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The authoritative store failed. Safe to retry.
    #[error("store read failed: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl FeedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Store(_))
    }
}

impl From<anyhow::Error> for FeedError {
    fn from(err: anyhow::Error) -> Self {
        FeedError::Store(err)
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
