//! Pooled HTTP clients for the lightweight fetch path

use super::{Manager, PoolError};
use crate::config::{FetchConfig, UserAgentConfig};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::time::Duration;

/// Maximum redirect hops followed by a pooled client
const MAX_REDIRECTS: usize = 10;

/// Builds identically configured reqwest clients
///
/// Each pool slot owns one client and therefore one keep-alive connection
/// set, so the pool size bounds concurrent outbound connections.
#[derive(Debug, Clone)]
pub struct HttpClientManager {
    user_agent: String,
    timeout: Duration,
    connect_timeout: Duration,
}

impl HttpClientManager {
    pub fn new(user_agent: &UserAgentConfig, fetch: &FetchConfig) -> Self {
        Self {
            user_agent: user_agent.header_value(),
            timeout: fetch.timeout(),
            connect_timeout: Duration::from_secs(10).min(fetch.timeout()),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Builds a client outside of any pool
    pub fn build_client(&self) -> Result<Client, reqwest::Error> {
        Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .pool_max_idle_per_host(1)
            .gzip(true)
            .brotli(true)
            .build()
    }
}

#[async_trait]
impl Manager for HttpClientManager {
    type Resource = Client;

    fn name(&self) -> &'static str {
        "connection"
    }

    async fn create(&self) -> Result<Client, PoolError> {
        self.build_client().map_err(|e| PoolError::Create {
            pool: self.name(),
            message: e.to_string(),
        })
    }
}
