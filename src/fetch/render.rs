//! Heavyweight rendering through the browser pool

use super::{FetchError, FetchResult, FetchedVia, PageRenderer};
use crate::pool::{BrowserManager, Pool};
use crate::url::normalize_url;
use async_trait::async_trait;
use chromiumoxide::Page;
use chrono::Utc;
use std::time::Duration;
use url::Url;

/// Closes a browser tab on every exit path
///
/// `Page` needs an async `close()`; on early returns and cancellation the
/// guard hands the close to the runtime instead.
struct TabGuard {
    page: Option<Page>,
    url: String,
}

impl TabGuard {
    fn new(page: Page, url: String) -> Self {
        Self {
            page: Some(page),
            url,
        }
    }

    fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::debug!(url = %self.url, "Failed to close tab: {}", e);
            }
        }
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            let url = std::mem::take(&mut self.url);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::debug!(url = %url, "Tab cleanup on drop failed: {}", e);
                    }
                });
            }
        }
    }
}

/// Renders pages in pooled headless browsers
pub struct BrowserRenderer {
    pool: Pool<BrowserManager>,
    acquire_timeout: Duration,
    navigation_timeout: Duration,
}

impl BrowserRenderer {
    pub fn new(pool: Pool<BrowserManager>, acquire_timeout: Duration, navigation_timeout: Duration) -> Self {
        Self {
            pool,
            acquire_timeout,
            navigation_timeout,
        }
    }

    pub fn pool(&self) -> &Pool<BrowserManager> {
        &self.pool
    }
}

#[async_trait]
impl PageRenderer for BrowserRenderer {
    async fn render(&self, url: &Url) -> Result<FetchResult, FetchError> {
        let render_error = |message: String| FetchError::Render {
            url: url.to_string(),
            message,
        };

        let mut browser = self.pool.acquire(self.acquire_timeout).await?;

        let page = match browser.browser().new_page(url.as_str()).await {
            Ok(page) => page,
            Err(e) => {
                browser.mark_unhealthy();
                return Err(render_error(e.to_string()));
            }
        };
        let tab = TabGuard::new(page, url.to_string());
        let page = tab
            .page()
            .ok_or_else(|| render_error("tab already closed".to_string()))?;

        match tokio::time::timeout(self.navigation_timeout, page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(render_error(e.to_string())),
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                })
            }
        }

        let html = page
            .content()
            .await
            .map_err(|e| render_error(e.to_string()))?;
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|u| normalize_url(&u).ok())
            .unwrap_or_else(|| url.clone());

        tab.close().await;
        tracing::debug!(url = %final_url, bytes = html.len(), "Rendered document");

        Ok(FetchResult {
            url: final_url.to_string(),
            content: html.into_bytes(),
            content_type: "text/html; charset=utf-8".to_string(),
            etag: None,
            last_modified: None,
            fetched_via: FetchedVia::Heavyweight,
            fetched_at: Utc::now(),
        })
    }

    async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
