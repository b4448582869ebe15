use crate::config::types::{
    CacheConfig, Config, FetchConfig, PipelineConfig, PoolsConfig, ProviderConfig,
    UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_pipeline_config(&config.pipeline)?;
    validate_pools_config(&config.pools)?;
    validate_fetch_config(&config.fetch)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_cache_config(&config.cache)?;
    validate_provider_config(&config.provider)?;
    Ok(())
}

fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.max_tokens_per_chunk < 16 {
        return Err(ConfigError::Validation(format!(
            "max_tokens_per_chunk must be >= 16, got {}",
            config.max_tokens_per_chunk
        )));
    }

    // Overlap is prepended to every chunk after the first, so it has to leave room for new text
    if config.overlap_tokens >= config.max_tokens_per_chunk {
        return Err(ConfigError::Validation(format!(
            "overlap_tokens ({}) must be smaller than max_tokens_per_chunk ({})",
            config.overlap_tokens, config.max_tokens_per_chunk
        )));
    }

    if config.max_concurrent_map_calls < 1 || config.max_concurrent_map_calls > 256 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_map_calls must be between 1 and 256, got {}",
            config.max_concurrent_map_calls
        )));
    }

    if config.reduce_budget_tokens < config.max_tokens_per_chunk {
        return Err(ConfigError::Validation(format!(
            "reduce_budget_tokens ({}) must be >= max_tokens_per_chunk ({})",
            config.reduce_budget_tokens, config.max_tokens_per_chunk
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.map_max_attempts < 1 || config.map_max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "map_max_attempts must be between 1 and 10, got {}",
            config.map_max_attempts
        )));
    }

    Ok(())
}

fn validate_pools_config(config: &PoolsConfig) -> Result<(), ConfigError> {
    if config.connection_pool_size < 1 || config.connection_pool_size > 1024 {
        return Err(ConfigError::Validation(format!(
            "connection_pool_size must be between 1 and 1024, got {}",
            config.connection_pool_size
        )));
    }

    if config.enable_browser && (config.browser_pool_size < 1 || config.browser_pool_size > 64) {
        return Err(ConfigError::Validation(format!(
            "browser_pool_size must be between 1 and 64, got {}",
            config.browser_pool_size
        )));
    }

    if config.acquire_timeout_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "acquire_timeout_ms must be >= 10ms, got {}ms",
            config.acquire_timeout_ms
        )));
    }

    if config.idle_timeout_secs > config.max_age_secs {
        return Err(ConfigError::Validation(format!(
            "idle_timeout_secs ({}) cannot exceed max_age_secs ({})",
            config.idle_timeout_secs, config.max_age_secs
        )));
    }

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fetch timeout_secs must be > 0".to_string(),
        ));
    }

    if config.max_retries < 1 || config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be between 1 and 10, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.ttl_secs == 0 {
        return Err(ConfigError::Validation("ttl_secs must be > 0".to_string()));
    }

    if config.max_entries < 1 {
        return Err(ConfigError::Validation(
            "max_entries must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_provider_config(config: &ProviderConfig) -> Result<(), ConfigError> {
    if config.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "provider name cannot be empty".to_string(),
        ));
    }

    if config.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "provider model cannot be empty".to_string(),
        ));
    }

    let base = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;
    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must be http(s), got '{}'",
            config.base_url
        )));
    }

    if config.max_output_tokens == 0 {
        return Err(ConfigError::Validation(
            "max_output_tokens must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
