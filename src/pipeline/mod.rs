//! The summarize operation
//!
//! A [`Pipeline`] owns every long-lived service: the resource pools (inside
//! the fetcher), the extractor, the chunker bound to the provider's
//! tokenizer, the summarization engine and the summary cache. It is built
//! once with [`Pipeline::init`] and torn down with [`Pipeline::shutdown`].
//!
//! One invocation runs: cache lookup or in-flight join, concurrent fetches,
//! extraction, chunking, map-reduce summarization, commit. The whole
//! invocation is bounded by the request timeout; when it expires the task
//! tree is dropped, which cancels outstanding fetches and map calls and
//! returns their pool slots.

mod stats;

pub use stats::{print_statistics, PipelineStats};

use crate::cache::{CacheError, CacheKey, ConfigFingerprint, SummaryCache};
use crate::chunk::{Chunk, Chunker, ChunkingError};
use crate::config::Config;
use crate::extract::{BlockKind, Extraction, ExtractionError, Extractor, StructureHints, TextBlock};
use crate::fetch::{BrowserRenderer, FetchError, FetchResult, Fetcher, FetcherSettings, PageRenderer};
use crate::llm::LlmProvider;
use crate::pool::{BrowserManager, BrowserSettings, HttpClientManager, Pool, PoolConfig};
use crate::summarize::{emit, EngineSettings, EventSink, SummarizationEngine, SummarizationError, SummaryEvent};
use crate::tokenize::resolve_tokenizer;
use crate::url::SourceLocation;
use crate::DistillError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

/// What callers of [`Pipeline::summarize`] see when a request fails
///
/// Every variant names the stage that failed and, where there is one, the
/// input it failed on.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("No input URLs given")]
    NoInput,

    #[error("[fetch] {url}: {source}")]
    Fetch { url: String, source: FetchError },

    #[error("[extract] {url}: {source}")]
    Extract { url: String, source: ExtractionError },

    #[error("[chunk] {source}")]
    Chunk { source: ChunkingError },

    #[error("[summarize] {source}")]
    Summarize { source: SummarizationError },

    #[error("Request exceeded the {timeout_ms}ms timeout")]
    Timeout { timeout_ms: u64 },

    #[error("[{stage}] task failed: {message}")]
    Task { stage: &'static str, message: String },
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::NoInput | Self::Fetch { .. } => "fetch",
            Self::Extract { .. } => "extract",
            Self::Chunk { .. } => "chunk",
            Self::Summarize { .. } => "summarize",
            Self::Timeout { .. } => "request",
            Self::Task { stage, .. } => stage,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Fetch { url, .. } | Self::Extract { url, .. } => Some(url),
            _ => None,
        }
    }

    /// A pool stayed full past its acquire timeout
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Fetch { source, .. } if source.is_backpressure())
    }
}

/// Fetched, extracted and chunked input, ready for summarization
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub text: String,
    pub hints: StructureHints,
    pub chunks: Vec<Chunk>,
    /// Some document needed the naive extraction fallback
    pub degraded_extraction: bool,
}

/// Pre-built services for [`Pipeline::from_parts`]
pub struct PipelineParts {
    pub fetcher: Fetcher,
    pub extractor: Extractor,
    pub chunker: Chunker,
    pub engine: SummarizationEngine,
    pub cache: SummaryCache<PipelineError>,
    pub fingerprint: ConfigFingerprint,
    pub fetch_timeout: Duration,
    pub request_timeout: Duration,
    pub tokenizer_degraded: bool,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    generations: AtomicU64,
    extractions: AtomicU64,
    degraded_extractions: AtomicU64,
}

struct PipelineInner {
    fetcher: Fetcher,
    extractor: Extractor,
    chunker: Chunker,
    engine: SummarizationEngine,
    cache: SummaryCache<PipelineError>,
    fingerprint: ConfigFingerprint,
    fetch_timeout: Duration,
    request_timeout: Duration,
    tokenizer_degraded: bool,
    browser_pool: Option<Pool<BrowserManager>>,
    counters: Counters,
}

/// Summarizes documents behind URLs, with caching and deduplication
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Builds every service from configuration
    ///
    /// Pools create their slots lazily, so no browser is launched here.
    pub fn init(config: &Config, provider: Arc<dyn LlmProvider>) -> Result<Self, DistillError> {
        let pool_config = |max_size: usize| PoolConfig {
            max_age: Duration::from_secs(config.pools.max_age_secs),
            idle_timeout: Duration::from_secs(config.pools.idle_timeout_secs),
            ..PoolConfig::new(max_size)
        };

        let http_pool = Pool::new(
            HttpClientManager::new(&config.user_agent, &config.fetch),
            pool_config(config.pools.connection_pool_size),
        );

        let browser_pool = config.pools.enable_browser.then(|| {
            Pool::new(
                BrowserManager::new(BrowserSettings::default()),
                pool_config(config.pools.browser_pool_size),
            )
        });
        let renderer = browser_pool.as_ref().map(|pool| {
            Arc::new(BrowserRenderer::new(
                pool.clone(),
                config.pools.acquire_timeout(),
                config.fetch.timeout(),
            )) as Arc<dyn PageRenderer>
        });

        let fetcher = Fetcher::new(http_pool, renderer, FetcherSettings::from_config(config));
        let fetch_timeout = fetcher.deadline();

        let selection = resolve_tokenizer(provider.provider(), provider.model());
        if selection.degraded {
            tracing::warn!(
                provider = provider.provider(),
                model = provider.model(),
                tokenizer = selection.tokenizer.name(),
                "Using an estimated token count; chunk sizes are approximate"
            );
        }

        let chunker = Chunker::new(
            selection.tokenizer,
            config.pipeline.max_tokens_per_chunk,
            config.pipeline.overlap_tokens,
        )?;
        let engine = SummarizationEngine::new(
            provider,
            chunker.clone(),
            EngineSettings::from_config(&config.pipeline),
        );
        let cache = SummaryCache::open(&config.cache)?;

        tracing::info!(
            tokenizer = chunker.tokenizer().name(),
            max_tokens = config.pipeline.max_tokens_per_chunk,
            overlap = config.pipeline.overlap_tokens,
            browser = config.pools.enable_browser,
            "Pipeline initialized"
        );

        Ok(Self {
            inner: Arc::new(PipelineInner {
                fetcher,
                extractor: Extractor::default(),
                chunker,
                engine,
                cache,
                fingerprint: ConfigFingerprint::from_config(config),
                fetch_timeout,
                request_timeout: config.pipeline.request_timeout(),
                tokenizer_degraded: selection.degraded,
                browser_pool,
                counters: Counters::default(),
            }),
        })
    }

    pub fn from_parts(parts: PipelineParts) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                fetcher: parts.fetcher,
                extractor: parts.extractor,
                chunker: parts.chunker,
                engine: parts.engine,
                cache: parts.cache,
                fingerprint: parts.fingerprint,
                fetch_timeout: parts.fetch_timeout,
                request_timeout: parts.request_timeout,
                tokenizer_degraded: parts.tokenizer_degraded,
                browser_pool: None,
                counters: Counters::default(),
            }),
        }
    }

    /// Summarizes the documents at `urls`, optionally focused on `query`
    pub async fn summarize<S: AsRef<str>>(&self, urls: &[S], query: Option<&str>) -> Result<String, PipelineError> {
        self.summarize_with_events(urls, query, None).await
    }

    /// Like [`Pipeline::summarize`], reporting progress to `sink`
    ///
    /// Callers served from the cache or by another caller's identical
    /// in-flight request receive the finished text as a single delta.
    pub async fn summarize_with_events<S: AsRef<str>>(
        &self,
        urls: &[S],
        query: Option<&str>,
        sink: Option<EventSink>,
    ) -> Result<String, PipelineError> {
        self.inner.counters.requests.fetch_add(1, Ordering::Relaxed);

        let keys = source_keys(urls)?;
        let key = CacheKey::compute(&keys, query, &self.inner.fingerprint);
        let timeout = self.inner.request_timeout;

        let led = Arc::new(AtomicBool::new(false));
        let work = {
            let inner = Arc::clone(&self.inner);
            let led = Arc::clone(&led);
            let query = query.map(str::to_string);
            let sink = sink.clone();
            self.inner.cache.dedup_or_generate(&key, move || async move {
                // Only set once the leader's re-check missed and generation runs
                led.store(true, Ordering::Relaxed);
                inner.generate(keys, query, sink).await
            })
        };

        let summary = match tokio::time::timeout(timeout, work).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                return Err(PipelineError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        if summary.hit || !led.load(Ordering::Relaxed) {
            tracing::debug!(key = %key, hit = summary.hit, "Served without generating");
            emit(sink.as_ref(), SummaryEvent::Delta(summary.payload.clone()));
            emit(sink.as_ref(), SummaryEvent::Complete);
        }
        Ok(summary.payload)
    }

    /// Fetches, extracts and chunks without calling the provider
    pub async fn prepare<S: AsRef<str>>(&self, urls: &[S]) -> Result<PreparedInput, PipelineError> {
        let keys = source_keys(urls)?;
        self.inner.prepare(&keys).await
    }

    pub fn stats(&self) -> PipelineStats {
        let inner = &self.inner;
        let c = &inner.counters;
        PipelineStats {
            requests: c.requests.load(Ordering::Relaxed),
            generations: c.generations.load(Ordering::Relaxed),
            extractions: c.extractions.load(Ordering::Relaxed),
            degraded_extractions: c.degraded_extractions.load(Ordering::Relaxed),
            summarization_batches: inner.engine.batches(),
            fetch: inner.fetcher.stats(),
            cache: inner.cache.stats(),
            connection_pool: inner.fetcher.http_pool().metrics(),
            browser_pool: inner.browser_pool.as_ref().map(Pool::metrics),
            tokenizer: inner.chunker.tokenizer().name().to_string(),
            tokenizer_degraded: inner.tokenizer_degraded,
        }
    }

    pub fn cache(&self) -> &SummaryCache<PipelineError> {
        &self.inner.cache
    }

    /// Applies cache expiry and the size bound
    pub fn purge_cache(&self) -> Result<usize, CacheError> {
        self.inner.cache.purge()
    }

    /// Shuts every pool down; in-flight requests fail with backpressure errors
    pub async fn shutdown(&self) {
        self.inner.fetcher.shutdown().await;
        tracing::info!("Pipeline shut down");
    }
}

/// Normalized, deduplication-ready keys for the inputs
fn source_keys<S: AsRef<str>>(urls: &[S]) -> Result<Vec<String>, PipelineError> {
    if urls.is_empty() {
        return Err(PipelineError::NoInput);
    }

    urls.iter()
        .map(|raw| {
            let raw = raw.as_ref();
            SourceLocation::parse(raw)
                .map(|location| location.key())
                .map_err(|e| PipelineError::Fetch {
                    url: raw.to_string(),
                    source: FetchError::InvalidUrl(e.to_string()),
                })
        })
        .collect()
}

impl PipelineInner {
    async fn generate(
        &self,
        keys: Vec<String>,
        query: Option<String>,
        sink: Option<EventSink>,
    ) -> Result<String, PipelineError> {
        self.counters.generations.fetch_add(1, Ordering::Relaxed);

        let prepared = self.prepare(&keys).await?;
        if prepared.degraded_extraction {
            tracing::warn!(urls = keys.len(), "Summarizing degraded extraction output");
        }

        self.engine
            .summarize(&prepared.chunks, query.as_deref(), sink.as_ref())
            .await
            .map_err(|source| PipelineError::Summarize { source })
    }

    async fn prepare(&self, keys: &[String]) -> Result<PreparedInput, PipelineError> {
        let fetched = self.fetch_all(keys).await?;

        let mut sections = Vec::with_capacity(fetched.len());
        let mut degraded_extraction = false;
        for (key, result) in fetched {
            let extraction = self.extract(&key, result).await?;
            degraded_extraction |= extraction.quality.degraded;
            sections.push((key, extraction));
        }

        let (text, hints) = join_sections(&sections);
        let chunks = self
            .chunker
            .chunk(&text, &hints)
            .map_err(|source| PipelineError::Chunk { source })?;

        tracing::info!(
            documents = sections.len(),
            bytes = text.len(),
            chunks = chunks.len(),
            "Prepared input"
        );

        Ok(PreparedInput {
            text,
            hints,
            chunks,
            degraded_extraction,
        })
    }

    /// Fetches every input concurrently, in input order
    async fn fetch_all(&self, keys: &[String]) -> Result<Vec<(String, FetchResult)>, PipelineError> {
        let mut tasks = JoinSet::new();
        for (index, key) in keys.iter().enumerate() {
            let fetcher = self.fetcher.clone();
            let key = key.clone();
            let timeout = self.fetch_timeout;
            tasks.spawn(async move {
                let result = fetcher.fetch(&key, timeout).await;
                (index, key, result)
            });
        }

        let mut fetched: Vec<Option<(String, FetchResult)>> = vec![None; keys.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, key, result) = joined.map_err(|e| PipelineError::Task {
                stage: "fetch",
                message: e.to_string(),
            })?;
            match result {
                Ok(document) => fetched[index] = Some((key, document)),
                // Dropping the JoinSet aborts the remaining fetches
                Err(source) => return Err(PipelineError::Fetch { url: key, source }),
            }
        }

        Ok(fetched.into_iter().flatten().collect())
    }

    async fn extract(&self, key: &str, fetched: FetchResult) -> Result<Extraction, PipelineError> {
        let extractor = self.extractor.clone();
        let extraction = tokio::task::spawn_blocking(move || extractor.extract(&fetched))
            .await
            .map_err(|e| PipelineError::Task {
                stage: "extract",
                message: e.to_string(),
            })?
            .map_err(|source| PipelineError::Extract {
                url: key.to_string(),
                source,
            })?;

        self.counters.extractions.fetch_add(1, Ordering::Relaxed);
        if extraction.quality.degraded {
            self.counters.degraded_extractions.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(
            url = key,
            chars = extraction.quality.text_chars,
            coverage = extraction.quality.coverage,
            strategy = extraction.quality.strategy.map(|s| s.as_str()).unwrap_or("naive"),
            "Extracted document"
        );
        Ok(extraction)
    }
}

/// Concatenates documents into one text; several documents become top-level sections
fn join_sections(sections: &[(String, Extraction)]) -> (String, StructureHints) {
    if let [(_, only)] = sections {
        return (only.text.clone(), only.hints.clone());
    }

    let mut text = String::new();
    let mut hints = StructureHints::default();
    for (key, extraction) in sections {
        if !text.is_empty() {
            text.push_str("\n\n");
        }

        let heading_start = text.len();
        text.push_str("# ");
        text.push_str(extraction.title.as_deref().unwrap_or(key).trim());
        hints.blocks.push(TextBlock {
            kind: BlockKind::Heading(1),
            start: heading_start,
            end: text.len(),
        });
        text.push_str("\n\n");

        let offset = text.len();
        text.push_str(&extraction.text);
        hints.blocks.extend(extraction.hints.blocks.iter().map(|block| TextBlock {
            kind: block.kind,
            start: block.start + offset,
            end: block.end + offset,
        }));
        hints.max_depth = hints.max_depth.max(extraction.hints.max_depth);
    }
    (text, hints)
}
