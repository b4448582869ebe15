//! Content retrieval
//!
//! The [`Fetcher`] turns an input URL (or local path) into raw bytes. Remote
//! pages go through the lightweight path first: a pooled HTTP client with
//! retry and backoff. The heavyweight path, a [`PageRenderer`] backed by the
//! browser pool, takes over when the lightweight path keeps timing out or the
//! response looks like a client-rendered shell.
//!
//! Concurrent fetches of the same normalized URL are coalesced into one
//! network operation on either path.

mod fetcher;
mod render;
pub mod sniff;

pub use fetcher::{FetchStats, Fetcher, FetcherSettings};
pub use render::BrowserRenderer;

use crate::pool::PoolError;
use crate::retry::Retryable;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use url::Url;

/// How a document was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchedVia {
    Lightweight,
    Heavyweight,
    Local,
}

impl FetchedVia {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lightweight => "lightweight",
            Self::Heavyweight => "heavyweight",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for FetchedVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw document content as retrieved
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Normalized final location, after redirects
    pub url: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetched_via: FetchedVia,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    /// Lossy UTF-8 view of the content
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Errors that can occur while fetching a document
///
/// Causes are kept as strings so results can be shared between coalesced
/// callers.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Invalid input location: {0}")]
    InvalidUrl(String),

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to read {path}: {message}")]
    Local { path: String, message: String },

    #[error("Rendering {url} failed: {message}")]
    Render { url: String, message: String },

    /// A pool stayed at capacity past the acquire timeout
    #[error("Backpressure: {0}")]
    Backpressure(#[from] PoolError),

    /// The caller's fetch deadline passed
    #[error("Fetching {url} exceeded the {timeout_ms}ms deadline")]
    Deadline { url: String, timeout_ms: u64 },
}

impl FetchError {
    pub(crate) fn from_reqwest(url: &Url, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }

    /// Whether the heavyweight path may succeed where the lightweight path failed
    pub fn should_escalate(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Backpressure(PoolError::Exhausted { .. }))
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Renders a page in a full browser and returns the resulting HTML
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url) -> Result<FetchResult, FetchError>;

    /// Releases any resources the renderer holds
    async fn shutdown(&self) {}
}
