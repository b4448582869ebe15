use super::prompt::{combine, map_request, reduce_request};
use super::{emit, EngineState, EventSink, PartialStatus, PartialSummary, SummarizationError, SummaryEvent};
use crate::cache::TransientBuffer;
use crate::chunk::{Chunk, Chunker};
use crate::config::{ExecutionStrategy, FailurePolicy, PipelineConfig};
use crate::extract::StructureHints;
use crate::llm::{CompletionRequest, LlmError, LlmProvider};
use crate::retry::{RetryExhausted, RetryPolicy};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

type MapOutcome = (usize, Result<String, RetryExhausted<LlmError>>);

/// Knobs for one engine
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub max_concurrent_map_calls: usize,
    pub failure_policy: FailurePolicy,
    pub strategy: ExecutionStrategy,
    pub retry: RetryPolicy,
    pub max_reduce_depth: usize,
    pub reduce_budget_tokens: usize,
}

impl EngineSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_concurrent_map_calls: config.max_concurrent_map_calls,
            failure_policy: config.per_chunk_failure_policy,
            strategy: config.execution_strategy,
            retry: RetryPolicy::new(
                config.map_max_attempts,
                Duration::from_millis(config.map_retry_backoff_ms),
            ),
            max_reduce_depth: config.max_reduce_depth,
            reduce_budget_tokens: config.reduce_budget_tokens,
        }
    }
}

/// Tracks the batch state and reports every change
struct Progress<'a> {
    state: EngineState,
    sink: Option<&'a EventSink>,
}

impl<'a> Progress<'a> {
    fn new(sink: Option<&'a EventSink>) -> Self {
        Self {
            state: EngineState::Pending,
            sink,
        }
    }

    fn advance(&mut self, next: EngineState) -> Result<(), SummarizationError> {
        if !self.state.can_transition_to(next) {
            return Err(SummarizationError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = %self.state, to = %next, "Summarization state change");
        self.state = next;
        emit(self.sink, SummaryEvent::State(next));
        Ok(())
    }

    fn fail(&mut self) {
        if self.state.can_transition_to(EngineState::Failed) {
            self.state = EngineState::Failed;
            emit(self.sink, SummaryEvent::State(EngineState::Failed));
        }
    }
}

/// Collects map results and applies the failure policy
struct MapCollector<'a> {
    partials: Vec<PartialSummary>,
    total: usize,
    policy: FailurePolicy,
    sink: Option<&'a EventSink>,
}

impl<'a> MapCollector<'a> {
    fn new(total: usize, policy: FailurePolicy, sink: Option<&'a EventSink>) -> Self {
        Self {
            partials: Vec::with_capacity(total),
            total,
            policy,
            sink,
        }
    }

    fn record(&mut self, (chunk_index, outcome): MapOutcome) -> Result<(), SummarizationError> {
        let partial = match outcome {
            Ok(text) => PartialSummary {
                chunk_index,
                text,
                status: PartialStatus::Ok,
            },
            Err(RetryExhausted { attempts, error }) => match self.policy {
                FailurePolicy::Abort => {
                    tracing::warn!(chunk_index, attempts, "Chunk failed, aborting batch: {}", error);
                    emit(
                        self.sink,
                        SummaryEvent::ChunkDone {
                            chunk_index,
                            status: PartialStatus::Failed,
                            completed: self.partials.len() + 1,
                            total: self.total,
                        },
                    );
                    return Err(SummarizationError::ChunkFailed {
                        chunk_index,
                        attempts,
                        source: error,
                    });
                }
                FailurePolicy::Omit => {
                    tracing::warn!(chunk_index, attempts, "Omitting chunk after failure: {}", error);
                    PartialSummary {
                        chunk_index,
                        text: String::new(),
                        status: PartialStatus::Omitted,
                    }
                }
            },
        };

        let status = partial.status;
        self.partials.push(partial);
        emit(
            self.sink,
            SummaryEvent::ChunkDone {
                chunk_index,
                status,
                completed: self.partials.len(),
                total: self.total,
            },
        );
        Ok(())
    }

    /// Partials in document order
    fn finish(mut self) -> Vec<PartialSummary> {
        self.partials.sort_by_key(|p| p.chunk_index);
        self.partials
    }
}

/// Runs map-reduce summarization against one provider
pub struct SummarizationEngine {
    provider: Arc<dyn LlmProvider>,
    chunker: Chunker,
    settings: EngineSettings,
    batches: AtomicU64,
}

impl SummarizationEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, chunker: Chunker, settings: EngineSettings) -> Self {
        Self {
            provider,
            chunker,
            settings: EngineSettings {
                max_concurrent_map_calls: settings.max_concurrent_map_calls.max(1),
                ..settings
            },
            batches: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Number of batches that reached the map phase
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Summarizes `chunks` into one text
    ///
    /// Dropping the returned future aborts every in-flight map call.
    pub async fn summarize(
        &self,
        chunks: &[Chunk],
        query: Option<&str>,
        sink: Option<&EventSink>,
    ) -> Result<String, SummarizationError> {
        if chunks.is_empty() {
            return Err(SummarizationError::NoInput);
        }

        let mut progress = Progress::new(sink);
        progress.advance(EngineState::Mapping)?;
        self.batches.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            chunks = chunks.len(),
            strategy = self.settings.strategy.as_str(),
            "Starting map phase"
        );

        let partials = match self.map_all(chunks, query, sink).await {
            Ok(partials) => partials,
            Err(e) => {
                progress.fail();
                return Err(e);
            }
        };

        progress.advance(EngineState::Reducing)?;
        match self.reduce(partials, query, sink).await {
            Ok(text) => {
                progress.advance(EngineState::Complete)?;
                emit(sink, SummaryEvent::Complete);
                Ok(text)
            }
            Err(e) => {
                progress.fail();
                Err(e)
            }
        }
    }

    async fn map_all(
        &self,
        chunks: &[Chunk],
        query: Option<&str>,
        sink: Option<&EventSink>,
    ) -> Result<Vec<PartialSummary>, SummarizationError> {
        let mut collector = MapCollector::new(chunks.len(), self.settings.failure_policy, sink);

        match self.settings.strategy {
            ExecutionStrategy::Sequential => {
                for chunk in chunks {
                    let outcome = map_one(
                        Arc::clone(&self.provider),
                        chunk.chunk_index,
                        map_request(chunk, query),
                        self.settings.retry,
                    )
                    .await;
                    collector.record(outcome)?;
                }
            }
            ExecutionStrategy::Parallel | ExecutionStrategy::Streaming => {
                let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_map_calls));
                let mut tasks = JoinSet::new();

                for chunk in chunks {
                    let provider = Arc::clone(&self.provider);
                    let semaphore = Arc::clone(&semaphore);
                    let request = map_request(chunk, query);
                    let chunk_index = chunk.chunk_index;
                    let retry = self.settings.retry;

                    tasks.spawn(async move {
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => {
                                return (
                                    chunk_index,
                                    Err(RetryExhausted {
                                        attempts: 0,
                                        error: LlmError::Request("map semaphore closed".to_string()),
                                    }),
                                )
                            }
                        };
                        map_one(provider, chunk_index, request, retry).await
                    });
                }

                // Parallel reports once everything is in; streaming reports as results land
                let mut finished = Vec::new();
                while let Some(joined) = tasks.join_next().await {
                    let outcome = joined.map_err(|e| SummarizationError::Task(e.to_string()))?;
                    let failed = outcome.1.is_err();

                    if self.settings.strategy == ExecutionStrategy::Streaming
                        || (failed && self.settings.failure_policy == FailurePolicy::Abort)
                    {
                        collector.record(outcome)?;
                    } else {
                        finished.push(outcome);
                    }
                }

                finished.sort_by_key(|(index, _)| *index);
                for outcome in finished {
                    collector.record(outcome)?;
                }
            }
        }

        Ok(collector.finish())
    }

    async fn reduce(
        &self,
        mut partials: Vec<PartialSummary>,
        query: Option<&str>,
        sink: Option<&EventSink>,
    ) -> Result<String, SummarizationError> {
        let budget = self.settings.reduce_budget_tokens;
        let mut depth = 0;

        loop {
            let total = partials.len();
            let surviving: Vec<&PartialSummary> = partials
                .iter()
                .filter(|p| p.status == PartialStatus::Ok)
                .collect();

            if surviving.is_empty() {
                return Err(SummarizationError::AllChunksFailed { total });
            }
            if surviving.len() < total {
                tracing::warn!(
                    omitted = total - surviving.len(),
                    total,
                    "Reducing with omitted chunks"
                );
            }

            if surviving.len() == 1 {
                let text = surviving[0].text.trim().to_string();
                if self.settings.strategy == ExecutionStrategy::Streaming {
                    emit(sink, SummaryEvent::Delta(text.clone()));
                }
                return Ok(text);
            }

            let parts = surviving.len();
            let combined = combine(surviving);
            let tokens = self.chunker.count_tokens(&combined);

            if tokens <= budget {
                tracing::info!(parts, tokens, depth, "Final reduce call");
                return self.final_call(reduce_request(&combined, parts, query), sink).await;
            }

            if depth >= self.settings.max_reduce_depth {
                return Err(SummarizationError::ContextOverflow { depth, tokens, budget });
            }
            depth += 1;

            let rechunked = self
                .chunker
                .with_max_tokens(budget)?
                .chunk(&combined, &StructureHints::default())?;
            tracing::info!(depth, tokens, groups = rechunked.len(), "Reduce input over budget, re-chunking");
            partials = self.map_all(&rechunked, query, sink).await?;
        }
    }

    async fn final_call(
        &self,
        request: CompletionRequest,
        sink: Option<&EventSink>,
    ) -> Result<String, SummarizationError> {
        let provider = self.provider.as_ref();
        let request = &request;

        if self.settings.strategy != ExecutionStrategy::Streaming {
            return self
                .settings
                .retry
                .run("reduce", |_| provider.complete(request))
                .await
                .map_err(|RetryExhausted { attempts, error }| SummarizationError::Reduce {
                    attempts,
                    source: error,
                });
        }

        let mut stream = self
            .settings
            .retry
            .run("reduce-stream", |_| provider.complete_stream(request))
            .await
            .map_err(|RetryExhausted { attempts, error }| SummarizationError::Reduce {
                attempts,
                source: error,
            })?;

        let mut buffer = TransientBuffer::new();
        while let Some(delta) = stream.next().await {
            let delta = delta.map_err(|error| SummarizationError::Reduce {
                attempts: 1,
                source: error,
            })?;
            buffer.push(&delta);
            emit(sink, SummaryEvent::Delta(delta));
        }
        Ok(buffer.into_payload())
    }
}

async fn map_one(
    provider: Arc<dyn LlmProvider>,
    chunk_index: usize,
    request: CompletionRequest,
    retry: RetryPolicy,
) -> MapOutcome {
    let provider = provider.as_ref();
    let request = &request;
    let outcome = retry.run("map", |_| provider.complete(request)).await;
    if outcome.is_ok() {
        tracing::debug!(chunk_index, "Chunk summarized");
    }
    (chunk_index, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarize::prompt::REDUCE_SYSTEM;
    use crate::tokenize::WhitespaceTokenizer;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    type Script = dyn Fn(&CompletionRequest, usize) -> Result<String, LlmError> + Send + Sync;

    /// Provider answering from a closure, recording calls and peak concurrency
    struct ScriptedProvider {
        script: Box<Script>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: fn(&CompletionRequest) -> Duration,
        prompts: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(
            script: impl Fn(&CompletionRequest, usize) -> Result<String, LlmError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                script: Box::new(script),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay: |_| Duration::from_millis(5),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, delay: fn(&CompletionRequest) -> Duration) -> Self {
            self.delay = delay;
            self
        }

        fn reduce_prompts(&self) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .filter(|r| is_reduce(r))
                .map(|r| r.prompt.clone())
                .collect()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.clone());

            tokio::time::sleep((self.delay)(request)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            (self.script)(request, call)
        }
    }

    fn is_reduce(request: &CompletionRequest) -> bool {
        request.system.as_deref() == Some(REDUCE_SYSTEM)
    }

    /// The body text after the prompt preamble
    fn body(request: &CompletionRequest) -> &str {
        request.prompt.rsplit("---\n").next().unwrap_or("")
    }

    fn chunks(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                text: text.to_string(),
                start_pos: 0,
                content_start: 0,
                end_pos: text.len(),
                token_count: text.split_whitespace().count(),
                overlap_tokens: 0,
                chunk_index: i,
                total_chunks: texts.len(),
                is_semantic_boundary: true,
            })
            .collect()
    }

    fn settings(strategy: ExecutionStrategy, policy: FailurePolicy) -> EngineSettings {
        EngineSettings {
            max_concurrent_map_calls: 2,
            failure_policy: policy,
            strategy,
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
            max_reduce_depth: 2,
            reduce_budget_tokens: 1000,
        }
    }

    fn engine(provider: Arc<ScriptedProvider>, settings: EngineSettings) -> SummarizationEngine {
        let chunker = Chunker::new(Arc::new(WhitespaceTokenizer), 50, 5).unwrap();
        SummarizationEngine::new(provider, chunker, settings)
    }

    /// Map calls echo "sum(<body>)", reduce calls return "final"
    fn echo_script(request: &CompletionRequest, _call: usize) -> Result<String, LlmError> {
        if is_reduce(request) {
            Ok("final".to_string())
        } else {
            Ok(format!("sum({})", body(request)))
        }
    }

    #[tokio::test]
    async fn test_parallel_map_then_reduce() {
        let provider = Arc::new(ScriptedProvider::new(echo_script));
        let engine = engine(
            Arc::clone(&provider),
            settings(ExecutionStrategy::Parallel, FailurePolicy::Omit),
        );

        let result = engine
            .summarize(&chunks(&["alpha", "beta", "gamma"]), None, None)
            .await
            .unwrap();

        assert_eq!(result, "final");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert_eq!(engine.batches(), 1);
        let reduce = provider.reduce_prompts();
        assert_eq!(reduce.len(), 1);
        assert!(reduce[0].ends_with("sum(alpha)\n\nsum(beta)\n\nsum(gamma)"));
    }

    #[tokio::test]
    async fn test_reduce_uses_document_order_not_completion_order() {
        // Earlier chunks finish last
        let provider = Arc::new(ScriptedProvider::new(echo_script).with_delay(|request| {
            match body(request) {
                "one" => Duration::from_millis(60),
                "two" => Duration::from_millis(30),
                _ => Duration::from_millis(1),
            }
        }));
        let mut settings = settings(ExecutionStrategy::Streaming, FailurePolicy::Omit);
        settings.max_concurrent_map_calls = 3;
        let engine = engine(Arc::clone(&provider), settings);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        engine
            .summarize(&chunks(&["one", "two", "three"]), None, Some(&tx))
            .await
            .unwrap();
        drop(tx);

        let reduce = provider.reduce_prompts();
        assert!(reduce[0].ends_with("sum(one)\n\nsum(two)\n\nsum(three)"));

        let mut done_order = Vec::new();
        while let Some(event) = rx.recv().await {
            if let SummaryEvent::ChunkDone { chunk_index, .. } = event {
                done_order.push(chunk_index);
            }
        }
        assert_eq!(done_order, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let provider = Arc::new(
            ScriptedProvider::new(echo_script).with_delay(|_| Duration::from_millis(20)),
        );
        let engine = engine(
            Arc::clone(&provider),
            settings(ExecutionStrategy::Parallel, FailurePolicy::Omit),
        );

        let texts: Vec<String> = (0..8).map(|i| format!("chunk{}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        engine.summarize(&chunks(&refs), None, None).await.unwrap();

        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_sequential_runs_one_at_a_time() {
        let provider = Arc::new(ScriptedProvider::new(echo_script));
        let engine = engine(
            Arc::clone(&provider),
            settings(ExecutionStrategy::Sequential, FailurePolicy::Omit),
        );

        engine
            .summarize(&chunks(&["a", "b", "c", "d"]), None, None)
            .await
            .unwrap();
        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_omit_policy_continues_degraded() {
        let provider = Arc::new(ScriptedProvider::new(|request, _| {
            if body(request) == "broken" {
                Err(LlmError::Rejected {
                    status: 400,
                    message: "bad input".to_string(),
                })
            } else {
                echo_script(request, 0)
            }
        }));
        let engine = engine(
            Arc::clone(&provider),
            settings(ExecutionStrategy::Parallel, FailurePolicy::Omit),
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let result = engine
            .summarize(&chunks(&["good", "broken", "fine"]), None, Some(&tx))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(result, "final");
        let reduce = provider.reduce_prompts();
        assert!(reduce[0].ends_with("sum(good)\n\nsum(fine)"));
        assert!(reduce[0].contains("2 partial summaries"));

        let mut omitted = Vec::new();
        while let Some(event) = rx.recv().await {
            if let SummaryEvent::ChunkDone {
                chunk_index,
                status: PartialStatus::Omitted,
                ..
            } = event
            {
                omitted.push(chunk_index);
            }
        }
        assert_eq!(omitted, vec![1]);
    }

    #[tokio::test]
    async fn test_abort_policy_fails_batch() {
        let provider = Arc::new(ScriptedProvider::new(|request, _| {
            if body(request) == "broken" {
                Err(LlmError::Timeout)
            } else {
                echo_script(request, 0)
            }
        }));
        let engine = engine(
            Arc::clone(&provider),
            settings(ExecutionStrategy::Parallel, FailurePolicy::Abort),
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let err = engine
            .summarize(&chunks(&["good", "broken"]), None, Some(&tx))
            .await
            .unwrap_err();
        drop(tx);

        assert!(matches!(
            err,
            SummarizationError::ChunkFailed {
                chunk_index: 1,
                attempts: 3,
                source: LlmError::Timeout
            }
        ));
        assert!(provider.reduce_prompts().is_empty());

        let mut last_state = None;
        let mut failed = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                SummaryEvent::State(state) => last_state = Some(state),
                SummaryEvent::ChunkDone {
                    chunk_index,
                    status: PartialStatus::Failed,
                    ..
                } => failed.push(chunk_index),
                _ => {}
            }
        }
        assert_eq!(last_state, Some(EngineState::Failed));
        assert_eq!(failed, vec![1]);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(ScriptedProvider::new(|request, call| {
            if call == 0 {
                Err(LlmError::RateLimited {
                    retry_after: Some(Duration::from_millis(1)),
                })
            } else {
                echo_script(request, call)
            }
        }));
        let engine = engine(
            Arc::clone(&provider),
            settings(ExecutionStrategy::Sequential, FailurePolicy::Abort),
        );

        let result = engine.summarize(&chunks(&["a", "b"]), None, None).await;
        assert_eq!(result.unwrap(), "final");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_configured_attempts_bound_provider_calls() {
        let provider = Arc::new(ScriptedProvider::new(|_, _| {
            Err(LlmError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            })
        }));
        let config = PipelineConfig {
            map_max_attempts: 2,
            map_retry_backoff_ms: 1,
            ..PipelineConfig::default()
        };
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.retry.max_attempts, 2);
        assert_eq!(settings.retry.initial_backoff, Duration::from_millis(1));

        let engine = engine(Arc::clone(&provider), settings);
        let err = engine.summarize(&chunks(&["only"]), None, None).await.unwrap_err();

        assert_eq!(err, SummarizationError::AllChunksFailed { total: 1 });
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_chunk_skips_reduce() {
        let provider = Arc::new(ScriptedProvider::new(echo_script));
        let engine = engine(
            Arc::clone(&provider),
            settings(ExecutionStrategy::Parallel, FailurePolicy::Omit),
        );

        let result = engine.summarize(&chunks(&["only"]), None, None).await.unwrap();
        assert_eq!(result, "sum(only)");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_chunks_failing_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(|_, _| {
            Err(LlmError::Rejected {
                status: 403,
                message: "forbidden".to_string(),
            })
        }));
        let engine = engine(
            Arc::clone(&provider),
            settings(ExecutionStrategy::Parallel, FailurePolicy::Omit),
        );

        let err = engine.summarize(&chunks(&["a", "b"]), None, None).await.unwrap_err();
        assert_eq!(err, SummarizationError::AllChunksFailed { total: 2 });
    }

    /// Map calls return eight words regardless of input
    fn eight_words(request: &CompletionRequest, _call: usize) -> Result<String, LlmError> {
        if is_reduce(request) {
            Ok("final".to_string())
        } else {
            Ok("w1 w2 w3 w4 w5 w6 w7 w8".to_string())
        }
    }

    #[tokio::test]
    async fn test_oversized_reduce_input_is_rechunked() {
        let provider = Arc::new(ScriptedProvider::new(eight_words));
        let mut settings = settings(ExecutionStrategy::Parallel, FailurePolicy::Omit);
        settings.reduce_budget_tokens = 20;
        let engine = engine(Arc::clone(&provider), settings);

        let result = engine
            .summarize(&chunks(&["a", "b", "c"]), None, None)
            .await
            .unwrap();

        assert_eq!(result, "final");
        assert_eq!(provider.reduce_prompts().len(), 1);
        // Three first-round map calls, at least two second-round ones, one reduce
        assert!(provider.calls.load(Ordering::SeqCst) >= 6);
    }

    #[tokio::test]
    async fn test_reduce_depth_limit_reports_overflow() {
        let provider = Arc::new(ScriptedProvider::new(eight_words));
        let mut settings = settings(ExecutionStrategy::Parallel, FailurePolicy::Omit);
        settings.reduce_budget_tokens = 20;
        settings.max_reduce_depth = 0;
        let engine = engine(Arc::clone(&provider), settings);

        let err = engine
            .summarize(&chunks(&["a", "b", "c"]), None, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SummarizationError::ContextOverflow {
                depth: 0,
                tokens: 24,
                budget: 20
            }
        );
    }

    #[tokio::test]
    async fn test_streaming_emits_deltas_and_states() {
        let provider = Arc::new(ScriptedProvider::new(echo_script));
        let engine = engine(
            Arc::clone(&provider),
            settings(ExecutionStrategy::Streaming, FailurePolicy::Omit),
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let result = engine
            .summarize(&chunks(&["a", "b"]), Some("why?"), Some(&tx))
            .await
            .unwrap();
        drop(tx);

        let mut states = Vec::new();
        let mut streamed = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                SummaryEvent::State(state) => states.push(state),
                SummaryEvent::Delta(delta) => streamed.push_str(&delta),
                _ => {}
            }
        }

        assert_eq!(streamed, result);
        assert_eq!(
            states,
            vec![EngineState::Mapping, EngineState::Reducing, EngineState::Complete]
        );
        assert!(provider.reduce_prompts()[0].contains("why?"));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let provider = Arc::new(ScriptedProvider::new(echo_script));
        let engine = engine(provider, settings(ExecutionStrategy::Parallel, FailurePolicy::Omit));
        assert_eq!(
            engine.summarize(&[], None, None).await.unwrap_err(),
            SummarizationError::NoInput
        );
    }
}
