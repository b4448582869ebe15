//! URL handling for the fetch and cache layers
//!
//! Every URL entering the pipeline is normalized once. The normalized form is
//! the request-coalescing key in the fetcher and part of the cache key, so two
//! spellings of the same page share one fetch and one cached summary.

mod normalize;

pub use normalize::{normalize_url, redirect_key};

use crate::UrlError;
use std::path::PathBuf;
use url::Url;

/// Where a pipeline input lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// A normalized http(s) URL
    Remote(Url),
    /// A document on the local filesystem
    Local(PathBuf),
}

impl SourceLocation {
    /// Classifies a raw input string as a remote URL or a local document
    ///
    /// `file://` URLs and strings that do not parse as absolute URLs are
    /// treated as filesystem paths.
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Parse("empty input".to_string()));
        }

        match Url::parse(trimmed) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(SourceLocation::Local)
                .map_err(|_| UrlError::Malformed(format!("invalid file URL: {}", trimmed))),
            Ok(_) => normalize_url(trimmed).map(SourceLocation::Remote),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(SourceLocation::Local(PathBuf::from(trimmed)))
            }
            Err(e) => Err(UrlError::Parse(e.to_string())),
        }
    }

    /// Returns the stable key used for deduplication and cache keys
    pub fn key(&self) -> String {
        match self {
            Self::Remote(url) => url.to_string(),
            Self::Local(path) => format!("file://{}", path.display()),
        }
    }
}
