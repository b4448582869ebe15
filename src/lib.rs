//! Sumi-Distill: A web document summarization pipeline
//!
//! This crate fetches documents behind URLs, extracts their readable text,
//! splits it into token-bounded chunks and condenses them through a
//! map-reduce pass over a language model. Finished summaries are cached and
//! identical concurrent requests share one generation.

pub mod cache;
pub mod chunk;
pub mod coalesce;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod llm;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod summarize;
pub mod tokenize;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Distill setup
///
/// Per-request failures are reported as [`pipeline::PipelineError`].
#[derive(Debug, Error)]
pub enum DistillError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("Chunking error: {0}")]
    Chunking(#[from] chunk::ChunkingError),

    #[error("Provider error: {0}")]
    Llm(#[from] llm::LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] pipeline::PipelineError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Distill setup
pub type Result<T> = std::result::Result<T, DistillError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use llm::{LlmProvider, OpenAiProvider};
pub use pipeline::{Pipeline, PipelineError, PipelineStats};
pub use summarize::{EngineState, SummaryEvent};
pub use url::{normalize_url, SourceLocation};
