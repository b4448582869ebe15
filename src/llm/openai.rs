//! OpenAI-compatible chat completions client

use super::sse::text_stream;
use super::{CompletionRequest, LlmError, LlmProvider, TextStream};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Client for any endpoint speaking the OpenAI chat completions protocol
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    provider: String,
    model: String,
    max_output_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(
        provider: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        max_output_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            provider: provider.into(),
            model: model.into(),
            max_output_tokens,
        })
    }

    /// Builds a provider from `[provider]`, reading the key from `api-key-env`
    pub fn from_config(config: &ProviderConfig) -> Result<Self, LlmError> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var).map_err(|_| LlmError::MissingApiKey(var.clone()))?,
            ),
            None => None,
        };

        Self::new(
            config.name.clone(),
            &config.base_url,
            config.model.clone(),
            api_key,
            config.max_output_tokens,
            config.timeout(),
        )
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest, stream: bool) -> ChatCompletionRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_output_tokens.unwrap_or(self.max_output_tokens),
            temperature: 0.2,
            stream,
        }
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let mut builder = self.client.post(&self.endpoint).json(&self.body(request, stream));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let error = map_status(status, &headers, &body);
        tracing::debug!(
            provider = %self.provider,
            model = %self.model,
            status = status.as_u16(),
            "Completion request failed: {}",
            error
        );
        Err(error)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let response = self.send(request, false).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response has no message content".to_string()))
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TextStream, LlmError> {
        let response = self.send(request, true).await?;
        Ok(text_stream(response.bytes_stream(), parse_delta))
    }
}

fn parse_delta(data: &str) -> Result<Option<String>, LlmError> {
    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => {
            let text: String = chunk
                .choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .collect();
            Ok(Some(text))
        }
        Err(parse_error) => match serde_json::from_str::<ErrorResponse>(data) {
            Ok(error) => Err(LlmError::InvalidResponse(error.error.message)),
            Err(_) => Err(LlmError::InvalidResponse(format!(
                "Failed to parse stream chunk: {}",
                parse_error
            ))),
        },
    }
}

fn map_transport_error(error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Request(error.to_string())
    }
}

fn map_status(status: StatusCode, headers: &HeaderMap, body: &str) -> LlmError {
    let detail = serde_json::from_str::<ErrorResponse>(body).ok().map(|r| r.error);
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .unwrap_or_else(|| body.chars().take(200).collect());

    let mentions_context = |d: &ErrorDetail| {
        [d.code.as_deref(), d.kind.as_deref(), Some(d.message.as_str())]
            .into_iter()
            .flatten()
            .any(|s| s.contains("context_length") || s.contains("maximum context length"))
    };

    match status.as_u16() {
        429 => LlmError::RateLimited {
            retry_after: retry_after(headers),
        },
        408 => LlmError::Timeout,
        400 if detail.as_ref().map(mentions_context).unwrap_or(false) => {
            LlmError::ContextLengthExceeded(message)
        }
        code if status.is_server_error() => LlmError::Unavailable { status: code, message },
        code => LlmError::Rejected { status: code, message },
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(
            "openai",
            &format!("{}/v1/", server.uri()),
            "gpt-4o-mini",
            Some("test-key".to_string()),
            256,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn completion(text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}]
        })
    }

    #[tokio::test]
    async fn test_complete_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 64,
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("A summary.")))
            .expect(1)
            .mount(&server)
            .await;

        let request = CompletionRequest::new("Summarize this")
            .with_system("You summarize.")
            .with_max_output_tokens(64);
        let text = provider(&server).await.complete(&request).await.unwrap();
        assert_eq!(text, "A summary.");
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .complete(&CompletionRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LlmError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
    }

    #[tokio::test]
    async fn test_context_length_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "message": "This model's maximum context length is 8192 tokens",
                    "type": "invalid_request_error",
                    "code": "context_length_exceeded"
                }
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .await
            .complete(&CompletionRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ContextLengthExceeded(m) if m.contains("8192")));
    }

    #[tokio::test]
    async fn test_server_and_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Invalid API key", "type": "invalid_request_error", "code": "invalid_api_key"}
            })))
            .mount(&server)
            .await;

        let provider = provider(&server).await;
        let first = provider.complete(&CompletionRequest::new("x")).await.unwrap_err();
        assert_eq!(
            first,
            LlmError::Unavailable {
                status: 503,
                message: "overloaded".to_string()
            }
        );

        let second = provider.complete(&CompletionRequest::new("x")).await.unwrap_err();
        assert_eq!(
            second,
            LlmError::Rejected {
                status: 401,
                message: "Invalid API key".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_streamed_completion() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" world\"}}]}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider(&server)
            .await
            .complete_stream(&CompletionRequest::new("x"))
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|item| item.unwrap()).collect().await;
        assert_eq!(parts, vec!["Hello".to_string(), " world".to_string()]);
    }

    #[test]
    fn test_missing_api_key_env() {
        let config = ProviderConfig {
            name: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: Some("SUMI_DISTILL_TEST_UNSET_KEY".to_string()),
            max_output_tokens: 256,
            timeout_secs: 10,
        };
        let err = OpenAiProvider::from_config(&config).err().unwrap();
        assert_eq!(err, LlmError::MissingApiKey("SUMI_DISTILL_TEST_UNSET_KEY".to_string()));
    }
}
