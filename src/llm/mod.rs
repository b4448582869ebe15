//! Language model providers
//!
//! The summarization engine talks to models only through [`LlmProvider`].
//! [`OpenAiProvider`] covers any OpenAI-compatible `/chat/completions`
//! endpoint; tests substitute scripted providers.

mod openai;
mod sse;

pub use openai::OpenAiProvider;

use crate::retry::Retryable;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Incremental model output
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// One prompt sent to a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Overrides the provider's configured output limit
    pub max_output_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_output_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider call timed out")]
    Timeout,

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Provider unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout | Self::Unavailable { .. } | Self::Request(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A text completion backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier, used to pick the tokenizer
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// Streams the completion; providers without streaming yield one item
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TextStream, LlmError> {
        let text = self.complete(request).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Echo;

    #[async_trait]
    impl LlmProvider for Echo {
        fn provider(&self) -> &str {
            "test"
        }

        fn model(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            Ok(request.prompt.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_item() {
        let request = CompletionRequest::new("hello").with_system("be loud");
        let items: Vec<_> = Echo.complete_stream(&request).await.unwrap().collect().await;
        assert_eq!(items, vec![Ok("HELLO".to_string())]);
    }

    #[test]
    fn test_retryability() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Unavailable {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!LlmError::ContextLengthExceeded("too long".into()).is_retryable());
        assert!(!LlmError::Rejected {
            status: 401,
            message: String::new()
        }
        .is_retryable());

        let limited = LlmError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));
    }
}
