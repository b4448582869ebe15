use super::{sniff, FetchError, FetchResult, FetchedVia, PageRenderer};
use crate::coalesce::Coalescer;
use crate::config::{Config, FetchConfig};
use crate::pool::{HttpClientManager, Pool};
use crate::retry::RetryPolicy;
use crate::url::{normalize_url, SourceLocation};
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::Response;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Fetcher tuning derived from configuration
#[derive(Debug, Clone, Copy)]
pub struct FetcherSettings {
    pub retry: RetryPolicy,
    pub acquire_timeout: Duration,
    /// Static text below this (with scripts present) triggers rendering
    pub min_static_text_chars: usize,
    /// Overall budget for one fetch: every lightweight attempt, the backoff
    /// between them and a heavyweight render
    pub deadline: Duration,
}

impl FetcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.fetch, config.pools.acquire_timeout())
    }

    /// Derives the retry schedule and the fetch deadline
    ///
    /// The per-request timeout applies to each attempt and to the render's
    /// navigation, so the deadline has to cover all of them plus a pool wait
    /// for each.
    pub fn new(fetch: &FetchConfig, acquire_timeout: Duration) -> Self {
        let retry = RetryPolicy::new(
            fetch.max_retries,
            Duration::from_millis(fetch.retry_backoff_ms),
        );
        let steps = retry.max_attempts + 1;
        let deadline = fetch.timeout() * steps + acquire_timeout * steps + retry.total_backoff();
        Self {
            retry,
            acquire_timeout,
            min_static_text_chars: fetch.min_static_text_chars,
            deadline,
        }
    }
}

/// Snapshot of fetcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub lightweight: u64,
    pub heavyweight: u64,
    pub local: u64,
    /// Lightweight results replaced or rescued by the heavyweight path
    pub escalations: u64,
    /// Callers that joined a fetch already in flight
    pub coalesced: u64,
}

#[derive(Default)]
struct Counters {
    lightweight: AtomicU64,
    heavyweight: AtomicU64,
    local: AtomicU64,
    escalations: AtomicU64,
}

struct FetcherInner {
    http: Pool<HttpClientManager>,
    renderer: Option<Arc<dyn PageRenderer>>,
    settings: FetcherSettings,
    inflight: Coalescer<String, FetchResult, FetchError>,
    counters: Counters,
}

/// Retrieves documents over HTTP, through a browser, or from disk
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<FetcherInner>,
}

impl Fetcher {
    pub fn new(
        http: Pool<HttpClientManager>,
        renderer: Option<Arc<dyn PageRenderer>>,
        settings: FetcherSettings,
    ) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                http,
                renderer,
                settings,
                inflight: Coalescer::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Fetches one input, joining an identical fetch already in flight
    ///
    /// `timeout` bounds this caller's wait. When it passes, the caller gets
    /// [`FetchError::Deadline`]; the underlying fetch keeps running only if
    /// another caller is still waiting on it.
    pub async fn fetch(&self, input: &str, timeout: Duration) -> Result<FetchResult, FetchError> {
        let location =
            SourceLocation::parse(input).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let key = location.key();

        let inner = Arc::clone(&self.inner);
        let work = self.inner.inflight.run(key.clone(), move || async move {
            inner.fetch_location(location).await
        });

        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(url = %key, timeout_ms = timeout.as_millis() as u64, "Fetch deadline exceeded");
                Err(FetchError::Deadline {
                    url: key,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    pub fn stats(&self) -> FetchStats {
        let c = &self.inner.counters;
        FetchStats {
            lightweight: c.lightweight.load(Ordering::Relaxed),
            heavyweight: c.heavyweight.load(Ordering::Relaxed),
            local: c.local.load(Ordering::Relaxed),
            escalations: c.escalations.load(Ordering::Relaxed),
            coalesced: self.inner.inflight.joined(),
        }
    }

    pub fn http_pool(&self) -> &Pool<HttpClientManager> {
        &self.inner.http
    }

    /// Deadline that leaves room for retries and escalation
    pub fn deadline(&self) -> Duration {
        self.inner.settings.deadline
    }

    pub fn has_renderer(&self) -> bool {
        self.inner.renderer.is_some()
    }

    /// Shuts down the HTTP pool and the renderer
    pub async fn shutdown(&self) {
        self.inner.http.shutdown().await;
        if let Some(renderer) = &self.inner.renderer {
            renderer.shutdown().await;
        }
    }
}

impl FetcherInner {
    async fn fetch_location(&self, location: SourceLocation) -> Result<FetchResult, FetchError> {
        match location {
            SourceLocation::Local(path) => self.fetch_local(&path).await,
            SourceLocation::Remote(url) => self.fetch_remote(&url).await,
        }
    }

    async fn fetch_local(&self, path: &Path) -> Result<FetchResult, FetchError> {
        let content = tokio::fs::read(path).await.map_err(|e| FetchError::Local {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        self.counters.local.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path = %path.display(), bytes = content.len(), "Read local document");

        Ok(FetchResult {
            url: format!("file://{}", path.display()),
            content_type: content_type_for_path(path).to_string(),
            content,
            etag: None,
            last_modified: None,
            fetched_via: FetchedVia::Local,
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_remote(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let lightweight = self
            .settings
            .retry
            .run("fetch", |_| self.fetch_lightweight(url))
            .await;

        match (lightweight, &self.renderer) {
            (Ok(result), Some(renderer))
                if sniff::needs_rendering(
                    &result.content_type,
                    &result.content,
                    self.settings.min_static_text_chars,
                ) =>
            {
                tracing::info!(url = %url, "Static content looks client-rendered, escalating");
                self.counters.escalations.fetch_add(1, Ordering::Relaxed);
                match self.render(renderer.as_ref(), url).await {
                    Ok(rendered) => Ok(rendered),
                    Err(e) => {
                        tracing::warn!(url = %url, "Rendering failed, keeping static content: {}", e);
                        Ok(result)
                    }
                }
            }
            (Ok(result), _) => Ok(result),
            (Err(exhausted), Some(renderer)) if exhausted.error.should_escalate() => {
                tracing::warn!(
                    url = %url,
                    attempts = exhausted.attempts,
                    "Lightweight fetch failed ({}), escalating",
                    exhausted.error
                );
                self.counters.escalations.fetch_add(1, Ordering::Relaxed);
                self.render(renderer.as_ref(), url).await
            }
            (Err(exhausted), _) => {
                tracing::warn!(
                    url = %url,
                    attempts = exhausted.attempts,
                    "Fetch failed: {}",
                    exhausted.error
                );
                Err(exhausted.error)
            }
        }
    }

    async fn fetch_lightweight(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let mut client = self.http.acquire(self.settings.acquire_timeout).await?;

        let response = match client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_connect() {
                    client.mark_unhealthy();
                }
                return Err(FetchError::from_reqwest(url, e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = normalize_url(response.url().as_str())
            .map(|u| u.to_string())
            .unwrap_or_else(|_| response.url().to_string());
        let (content_type, etag, last_modified) = response_metadata(&response);
        let content = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
            .to_vec();

        self.counters.lightweight.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(url = %final_url, bytes = content.len(), "Fetched document");

        Ok(FetchResult {
            url: final_url,
            content,
            content_type,
            etag,
            last_modified,
            fetched_via: FetchedVia::Lightweight,
            fetched_at: Utc::now(),
        })
    }

    async fn render(&self, renderer: &dyn PageRenderer, url: &Url) -> Result<FetchResult, FetchError> {
        let result = renderer.render(url).await?;
        self.counters.heavyweight.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }
}

fn response_metadata(response: &Response) -> (String, Option<String>, Option<String>) {
    let header = |name| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    (
        header(CONTENT_TYPE).unwrap_or_default(),
        header(ETAG),
        header(LAST_MODIFIED),
    )
}

fn content_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html") | Some("htm") | Some("xhtml") => "text/html",
        Some("md") | Some("markdown") => "text/markdown",
        _ => "text/plain",
    }
}
