//! Integration tests for the summarization pipeline
//!
//! These tests use wiremock to serve documents and a scripted provider in
//! place of a language model, and drive the full fetch, extract, chunk,
//! summarize and cache cycle end-to-end.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_distill::config::{
    CacheConfig, Config, ExecutionStrategy, FailurePolicy, FetchConfig, PipelineConfig,
    PoolsConfig, ProviderConfig, UserAgentConfig,
};
use sumi_distill::llm::{CompletionRequest, LlmError, LlmProvider};
use sumi_distill::summarize::SummaryEvent;
use sumi_distill::{OpenAiProvider, Pipeline, PipelineError};
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Stands in for a language model: deterministic answers, counted calls
struct ScriptedProvider {
    calls: AtomicUsize,
    fail_maps: AtomicBool,
    delay: Duration,
}

impl ScriptedProvider {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::from_millis(20))
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_maps: AtomicBool::new(false),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        "gpt-4"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if request.prompt.starts_with("Below are") {
            let parts = request.prompt.matches("Summary of").count();
            return Ok(format!("Combined summary of {} parts.", parts));
        }
        if self.fail_maps.load(Ordering::SeqCst) {
            return Err(LlmError::Rejected {
                status: 400,
                message: "bad request".to_string(),
            });
        }
        Ok(format!("Summary of a {}-byte passage.", request.prompt.len()))
    }
}

/// Creates a test configuration caching into `dir`
fn create_test_config(dir: &TempDir) -> Config {
    Config {
        pipeline: PipelineConfig {
            max_tokens_per_chunk: 512,
            overlap_tokens: 50,
            max_concurrent_map_calls: 4,
            request_timeout_secs: 30,
            ..PipelineConfig::default()
        },
        pools: PoolsConfig {
            connection_pool_size: 2,
            acquire_timeout_ms: 2000,
            enable_browser: false,
            ..PoolsConfig::default()
        },
        fetch: FetchConfig {
            timeout_secs: 5,
            max_retries: 1,
            retry_backoff_ms: 10,
            ..FetchConfig::default()
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestDistiller".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        cache: CacheConfig {
            database_path: dir.path().join("cache.db").to_string_lossy().into_owned(),
            ttl_secs: 3600,
            max_entries: 100,
        },
        provider: ProviderConfig {
            name: "openai".to_string(),
            model: "gpt-4".to_string(),
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_key_env: None,
            max_output_tokens: 256,
            timeout_secs: 5,
        },
    }
}

const WORDS: &[&str] = &[
    "the", "system", "stores", "data", "in", "a", "small", "table", "and", "each", "user", "can",
    "read", "it", "when", "they", "need", "to", "find", "new", "work", "for", "team", "on", "time",
];

/// A paragraph of `sentences` plain sentences, varied by `seed`
fn paragraph(seed: usize, sentences: usize) -> String {
    (0..sentences)
        .map(|s| {
            let words: Vec<&str> = (0..12)
                .map(|w| WORDS[(seed * 7 + s * 5 + w * 3) % WORDS.len()])
                .collect();
            let mut sentence = words.join(" ");
            sentence[..1].make_ascii_uppercase();
            sentence.push('.');
            sentence
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// An article with three heading levels, roughly `sections * 160` tokens long
fn article(title: &str, sections: usize) -> String {
    let mut body = format!("<h1>{}</h1>\n", title);
    for section in 0..sections {
        body.push_str(&format!("<h2>Section {}</h2>\n", section + 1));
        body.push_str(&format!("<p>{}</p>\n", paragraph(section * 3, 5)));
        body.push_str(&format!("<h3>Details {}</h3>\n", section + 1));
        body.push_str(&format!("<p>{}</p>\n", paragraph(section * 3 + 1, 4)));
        body.push_str(&format!("<p>{}</p>\n", paragraph(section * 3 + 2, 3)));
    }
    format!(
        "<html><head><title>{}</title></head><body><nav><a href=\"/\">Home</a></nav>\
         <article>{}</article><footer>Copyright</footer></body></html>",
        title, body
    )
}

async fn serve(server: &MockServer, route: &str, html: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sequential_requests_are_idempotent() {
    let server = MockServer::start().await;
    serve(&server, "/doc", article("Storage Notes", 6)).await;

    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new();
    let pipeline = Pipeline::init(&create_test_config(&dir), provider.clone()).unwrap();
    let url = format!("{}/doc", server.uri());

    let first = pipeline.summarize(&[&url], None).await.unwrap();
    let calls_after_first = provider.calls();
    let second = pipeline.summarize(&[&url], None).await.unwrap();

    assert_eq!(first, second);
    assert!(first.starts_with("Combined summary of"));
    assert_eq!(provider.calls(), calls_after_first);

    let stats = pipeline.stats();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.generations, 1);
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.cache.commits, 1);
    assert_eq!(stats.fetch.lightweight, 1);
    assert!(!stats.tokenizer_degraded);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(article("Persisted", 2), "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let url = format!("{}/doc", server.uri());

    let first = {
        let pipeline = Pipeline::init(&config, ScriptedProvider::new()).unwrap();
        let summary = pipeline.summarize(&[&url], Some("storage")).await.unwrap();
        pipeline.shutdown().await;
        summary
    };

    let provider = ScriptedProvider::new();
    let pipeline = Pipeline::init(&config, provider.clone()).unwrap();
    let second = pipeline.summarize(&[&url], Some(" storage ")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_identical_requests_share_one_generation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(article("Example Domain", 2), "text/html")
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new();
    let pipeline = Pipeline::init(&create_test_config(&dir), provider.clone()).unwrap();
    let url = server.uri();
    let urls = [&url];

    let (a, b) = tokio::join!(
        pipeline.summarize(&urls, None),
        pipeline.summarize(&urls, None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a, b);
    let stats = pipeline.stats();
    assert_eq!(stats.fetch.lightweight, 1);
    assert_eq!(stats.extractions, 1);
    assert_eq!(stats.summarization_batches, 1);
    assert_eq!(stats.generations, 1);
    assert_eq!(stats.cache.joined, 1);
}

#[tokio::test]
async fn test_url_spellings_share_a_cache_entry() {
    let server = MockServer::start().await;
    serve(&server, "/a", article("Alpha", 1)).await;
    serve(&server, "/b", article("Beta", 1)).await;

    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new();
    let pipeline = Pipeline::init(&create_test_config(&dir), provider.clone()).unwrap();
    let a = format!("{}/a", server.uri());
    let b = format!("{}/b", server.uri());

    let first = pipeline.summarize(&[&a, &b], None).await.unwrap();
    let calls = provider.calls();
    let reordered = pipeline
        .summarize(&[format!("{}/b/#top", server.uri()), format!("{}/a/", server.uri())], None)
        .await
        .unwrap();

    assert_eq!(first, reordered);
    assert_eq!(provider.calls(), calls);
}

#[tokio::test]
async fn test_failed_generation_commits_nothing() {
    let server = MockServer::start().await;
    serve(&server, "/doc", article("Fragile", 6)).await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.pipeline.per_chunk_failure_policy = FailurePolicy::Abort;
    let provider = ScriptedProvider::new();
    provider.fail_maps.store(true, Ordering::SeqCst);
    let pipeline = Pipeline::init(&config, provider.clone()).unwrap();
    let url = format!("{}/doc", server.uri());

    let err = pipeline.summarize(&[&url], None).await.unwrap_err();
    assert_eq!(err.stage(), "summarize");
    assert!(matches!(err, PipelineError::Summarize { .. }));
    assert_eq!(pipeline.cache().len().unwrap(), 0);
    assert_eq!(pipeline.stats().cache.commits, 0);

    // The next attempt generates from scratch
    provider.fail_maps.store(false, Ordering::SeqCst);
    let summary = pipeline.summarize(&[&url], None).await.unwrap();
    assert!(summary.starts_with("Combined summary of"));
    assert_eq!(pipeline.cache().len().unwrap(), 1);
}

#[tokio::test]
async fn test_timeout_cancels_and_commits_nothing() {
    let server = MockServer::start().await;
    serve(&server, "/doc", article("Slow", 2)).await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.pipeline.request_timeout_secs = 1;
    let provider = ScriptedProvider::with_delay(Duration::from_secs(5));
    let pipeline = Pipeline::init(&config, provider).unwrap();
    let url = format!("{}/doc", server.uri());

    let err = pipeline.summarize(&[&url], None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Timeout { timeout_ms: 1000 }));
    assert_eq!(pipeline.cache().len().unwrap(), 0);
    assert_eq!(pipeline.stats().connection_pool.active, 0);
}

#[tokio::test]
async fn test_fetch_errors_carry_context_and_release_slots() {
    let server = MockServer::start().await;
    serve(&server, "/ok", article("Fine", 1)).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new();
    let pipeline = Pipeline::init(&create_test_config(&dir), provider.clone()).unwrap();
    let ok = format!("{}/ok", server.uri());
    let missing = format!("{}/missing", server.uri());
    let baseline = pipeline.stats().connection_pool.active;

    for _ in 0..5 {
        let err = pipeline.summarize(&[&ok, &missing], None).await.unwrap_err();
        assert_eq!(err.stage(), "fetch");
        assert_eq!(err.url(), Some(missing.as_str()));
        assert!(!err.is_backpressure());
    }

    // Fetches aborted alongside a failed one unwind on the next scheduler pass
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.stats().connection_pool.active, baseline);
    assert_eq!(provider.calls(), 0);
    assert_eq!(pipeline.cache().len().unwrap(), 0);
}

#[tokio::test]
async fn test_slow_first_response_is_retried_within_fetch_deadline() {
    let server = MockServer::start().await;
    let html = article("Patience", 1);
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(html.clone(), "text/html")
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve(&server, "/slow", html).await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.fetch.timeout_secs = 1;
    config.fetch.max_retries = 2;
    let provider = ScriptedProvider::new();
    let pipeline = Pipeline::init(&config, provider.clone()).unwrap();
    let url = format!("{}/slow", server.uri());

    let summary = pipeline.summarize(&[&url], None).await.unwrap();

    assert!(!summary.is_empty());
    assert_eq!(pipeline.stats().fetch.lightweight, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::init(&create_test_config(&dir), ScriptedProvider::new()).unwrap();

    let none: [&str; 0] = [];
    let err = pipeline.summarize(&none, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoInput));
}

#[tokio::test]
async fn test_chunks_follow_structure_with_exact_overlap() {
    let server = MockServer::start().await;
    serve(&server, "/long", article("Long Read", 13)).await;

    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::init(&create_test_config(&dir), ScriptedProvider::new()).unwrap();
    let prepared = pipeline
        .prepare(&[format!("{}/long", server.uri())])
        .await
        .unwrap();

    let total_tokens = tiktoken_rs::cl100k_base()
        .unwrap()
        .encode_ordinary(&prepared.text)
        .len();
    assert!(total_tokens >= 1800, "document has {} tokens", total_tokens);
    assert!(prepared.chunks.len() >= 4);

    let forced_cuts = prepared
        .chunks
        .iter()
        .filter(|c| !c.is_semantic_boundary)
        .count();
    assert!(forced_cuts <= 1, "{} forced cuts", forced_cuts);

    for chunk in &prepared.chunks {
        assert!(chunk.token_count <= 512);
        if chunk.chunk_index > 0 {
            assert_eq!(chunk.overlap_tokens, 50);
        }
    }

    let coverage = sumi_distill::chunk::coverage(&prepared.chunks, prepared.text.len());
    assert!(coverage >= 0.99);
}

#[tokio::test]
async fn test_streaming_events_and_cached_replay() {
    let server = MockServer::start().await;
    serve(&server, "/doc", article("Streamed", 3)).await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.pipeline.execution_strategy = ExecutionStrategy::Streaming;
    let pipeline = Pipeline::init(&config, ScriptedProvider::new()).unwrap();
    let url = format!("{}/doc", server.uri());

    let collect = |pipeline: Pipeline, url: String| async move {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = pipeline
            .summarize_with_events(&[url], None, Some(tx))
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (summary, events)
    };

    let (summary, events) = collect(pipeline.clone(), url.clone()).await;
    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            SummaryEvent::Delta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, summary);
    assert!(events.iter().any(|e| matches!(e, SummaryEvent::ChunkDone { .. })));
    assert_eq!(events.last(), Some(&SummaryEvent::Complete));

    let (replayed, events) = collect(pipeline.clone(), url).await;
    assert_eq!(replayed, summary);
    assert_eq!(
        events,
        vec![SummaryEvent::Delta(summary.clone()), SummaryEvent::Complete]
    );
}

#[tokio::test]
async fn test_openai_compatible_endpoint_end_to_end() {
    let server = MockServer::start().await;
    serve(&server, "/doc", article("Wire Format", 6)).await;

    let sse = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"The document \"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"explains storage.\"}}]}\n\n",
        "data: [DONE]\n\n"
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "A partial."}, "finish_reason": "stop"}]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.pipeline.execution_strategy = ExecutionStrategy::Streaming;
    config.provider.base_url = format!("{}/v1", server.uri());
    let provider = OpenAiProvider::from_config(&config.provider).unwrap();
    let pipeline = Pipeline::init(&config, Arc::new(provider)).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = pipeline
        .summarize_with_events(&[format!("{}/doc", server.uri())], None, Some(tx))
        .await
        .unwrap();

    let mut deltas = Vec::new();
    while let Some(event) = rx.recv().await {
        if let SummaryEvent::Delta(text) = event {
            deltas.push(text);
        }
    }
    assert_eq!(summary, "The document explains storage.");
    assert_eq!(deltas, vec!["The document ".to_string(), "explains storage.".to_string()]);
    assert_eq!(pipeline.cache().len().unwrap(), 1);
}
