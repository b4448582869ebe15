use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for sumi-distill
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub pools: PoolsConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub cache: CacheConfig,
    pub provider: ProviderConfig,
}

/// What to do when a chunk still fails after its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Drop the chunk with a warning and continue degraded
    Omit,
    /// Fail the whole request
    Abort,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Omit => "omit",
            Self::Abort => "abort",
        }
    }
}

/// How map calls are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStrategy {
    /// Launch every map call, await them all
    Parallel,
    /// Handle map results as they complete and stream the final answer
    Streaming,
    /// One call at a time
    Sequential,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Streaming => "streaming",
            Self::Sequential => "sequential",
        }
    }
}

/// Chunking and summarization behavior
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on tokens per chunk, in the provider's tokenizer
    #[serde(rename = "max-tokens-per-chunk", default = "default_max_tokens_per_chunk")]
    pub max_tokens_per_chunk: usize,

    /// Tokens shared between consecutive chunks
    #[serde(rename = "overlap-tokens", default = "default_overlap_tokens")]
    pub overlap_tokens: usize,

    /// Maximum number of in-flight map calls
    #[serde(rename = "max-concurrent-map-calls", default = "default_max_concurrent_map_calls")]
    pub max_concurrent_map_calls: usize,

    #[serde(rename = "per-chunk-failure-policy", default = "default_failure_policy")]
    pub per_chunk_failure_policy: FailurePolicy,

    #[serde(rename = "execution-strategy", default = "default_execution_strategy")]
    pub execution_strategy: ExecutionStrategy,

    /// How many times the reduce phase may re-chunk its own input
    #[serde(rename = "max-reduce-depth", default = "default_max_reduce_depth")]
    pub max_reduce_depth: usize,

    /// Token budget for the input of the final reduce call
    #[serde(rename = "reduce-budget-tokens", default = "default_reduce_budget_tokens")]
    pub reduce_budget_tokens: usize,

    /// Wall-clock limit for one summarize invocation (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per provider call, including the first one
    #[serde(rename = "map-max-attempts", default = "default_map_max_attempts")]
    pub map_max_attempts: u32,

    /// Initial backoff between provider call attempts (milliseconds)
    #[serde(rename = "map-retry-backoff-ms", default = "default_map_retry_backoff_ms")]
    pub map_retry_backoff_ms: u64,
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: default_max_tokens_per_chunk(),
            overlap_tokens: default_overlap_tokens(),
            max_concurrent_map_calls: default_max_concurrent_map_calls(),
            per_chunk_failure_policy: default_failure_policy(),
            execution_strategy: default_execution_strategy(),
            max_reduce_depth: default_max_reduce_depth(),
            reduce_budget_tokens: default_reduce_budget_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            map_max_attempts: default_map_max_attempts(),
            map_retry_backoff_ms: default_map_retry_backoff_ms(),
        }
    }
}

/// Resource pool sizing and slot lifetimes
#[derive(Debug, Clone, Deserialize)]
pub struct PoolsConfig {
    /// Maximum concurrent headless browser instances
    #[serde(rename = "browser-pool-size", default = "default_browser_pool_size")]
    pub browser_pool_size: usize,

    /// Maximum concurrent pooled HTTP clients
    #[serde(rename = "connection-pool-size", default = "default_connection_pool_size")]
    pub connection_pool_size: usize,

    /// How long acquire waits before reporting exhaustion (milliseconds)
    #[serde(rename = "acquire-timeout-ms", default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Slots older than this are retired (seconds)
    #[serde(rename = "max-age-secs", default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Idle slots unused for this long are retired (seconds)
    #[serde(rename = "idle-timeout-secs", default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Whether the headless browser fallback is available at all
    #[serde(rename = "enable-browser", default = "default_enable_browser")]
    pub enable_browser: bool,
}

impl PoolsConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            browser_pool_size: default_browser_pool_size(),
            connection_pool_size: default_connection_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            max_age_secs: default_max_age_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            enable_browser: default_enable_browser(),
        }
    }
}

/// Fetch behavior
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts on the lightweight path before escalating
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff between attempts (milliseconds)
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Below this much static text an HTML page is considered client-rendered
    #[serde(rename = "min-static-text-chars", default = "default_min_static_text_chars")]
    pub min_static_text_chars: usize,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            min_static_text_chars: default_min_static_text_chars(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    #[serde(rename = "contact-url")]
    pub contact_url: String,

    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Format: Name/Version (+ContactURL; ContactEmail)
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Durable summary cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Lifetime of a committed summary (seconds)
    #[serde(rename = "ttl-secs", default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Upper bound on stored summaries; least recently used go first
    #[serde(rename = "max-entries", default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Language model provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier, selects the tokenizer (e.g. "openai")
    pub name: String,

    pub model: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(rename = "api-key-env", default)]
    pub api_key_env: Option<String>,

    #[serde(rename = "max-output-tokens", default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Per-call timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_max_tokens_per_chunk() -> usize {
    2048
}

fn default_overlap_tokens() -> usize {
    128
}

fn default_max_concurrent_map_calls() -> usize {
    4
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::Omit
}

fn default_execution_strategy() -> ExecutionStrategy {
    ExecutionStrategy::Parallel
}

fn default_max_reduce_depth() -> usize {
    3
}

fn default_reduce_budget_tokens() -> usize {
    6000
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_map_max_attempts() -> u32 {
    3
}

fn default_map_retry_backoff_ms() -> u64 {
    500
}

fn default_browser_pool_size() -> usize {
    2
}

fn default_connection_pool_size() -> usize {
    8
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

fn default_max_age_secs() -> u64 {
    600
}

fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_enable_browser() -> bool {
    true
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_min_static_text_chars() -> usize {
    200
}

fn default_cache_ttl_secs() -> u64 {
    86_400
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_output_tokens() -> u32 {
    512
}

fn default_provider_timeout_secs() -> u64 {
    120
}
