//! Pooled headless browser instances for the heavyweight fetch path

use super::{Manager, PoolError};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Launch options shared by every pooled browser
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// CDP request timeout
    pub request_timeout: Duration,
    /// Explicit Chrome binary; auto-detected when unset
    pub executable: Option<PathBuf>,
    pub window_size: (u32, u32),
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            executable: None,
            window_size: (1280, 800),
        }
    }
}

impl BrowserSettings {
    fn to_config(&self) -> Result<BrowserConfig, String> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.request_timeout)
            .window_size(self.window_size.0, self.window_size.1)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder.build()
    }
}

/// A launched browser and the task driving its CDP connection
pub struct BrowserInstance {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserInstance {
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// The CDP event loop has stopped; the browser is unusable
    pub fn is_disconnected(&self) -> bool {
        self.handler.is_finished()
    }
}

/// Launches and retires headless Chrome processes
#[derive(Debug, Clone, Default)]
pub struct BrowserManager {
    settings: BrowserSettings,
}

impl BrowserManager {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BrowserSettings {
        &self.settings
    }
}

#[async_trait]
impl Manager for BrowserManager {
    type Resource = BrowserInstance;

    fn name(&self) -> &'static str {
        "browser"
    }

    async fn create(&self) -> Result<BrowserInstance, PoolError> {
        let create_error = |message: String| PoolError::Create {
            pool: "browser",
            message,
        };

        let config = self.settings.to_config().map_err(create_error)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| create_error(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        tracing::info!("Launched headless browser");
        Ok(BrowserInstance { browser, handler })
    }

    async fn health_check(&self, instance: &mut BrowserInstance) -> bool {
        if instance.is_disconnected() {
            return false;
        }
        match tokio::time::timeout(self.settings.request_timeout, instance.browser.version()).await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::warn!("Browser health check failed: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!("Browser health check timed out");
                false
            }
        }
    }

    async fn destroy(&self, mut instance: BrowserInstance) {
        if let Err(e) = instance.browser.close().await {
            tracing::debug!("Browser close failed: {}", e);
        }
        if let Err(e) = instance.browser.wait().await {
            tracing::debug!("Browser process wait failed: {}", e);
        }
        instance.handler.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BrowserSettings::default();
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert!(settings.executable.is_none());
    }

    #[test]
    fn test_manager_name() {
        assert_eq!(BrowserManager::default().name(), "browser");
    }
}
