use async_trait::async_trait;
use thiserror::Error;

use super::types::Notice;
use crate::api::models::FeedEntry;

/// Handler errors
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("upstream returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
    #[error("no content retrieved from {0}")]
    Empty(String),
    #[error("host is banned: {0}")]
    Banned(String),
    #[error("handler construction failed: {0}")]
    Build(String),
}

impl From<reqwest::Error> for HandlerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            HandlerError::InvalidResponse(err.to_string())
        } else {
            HandlerError::Request(err.to_string())
        }
    }
}

/// Fetches the full readable content of an entry
#[async_trait]
pub trait ContentRetriever: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns extracted plain text; empty output is an error
    async fn retrieve(&self, entry: &FeedEntry) -> Result<String, HandlerError>;
}

/// Produces a summary of retrieved content
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the handler intentionally produced no summary
    async fn summarize(
        &self,
        entry: &FeedEntry,
        content: &str,
    ) -> Result<Option<String>, HandlerError>;
}

/// Pushes a notice about a new entry to an external channel
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, notice: &Notice) -> Result<(), HandlerError>;
}
