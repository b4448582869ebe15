//! Configuration module for sumi-distill
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_distill::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("distill.toml")).unwrap();
//! println!("Map concurrency: {}", config.pipeline.max_concurrent_map_calls);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    CacheConfig, Config, ExecutionStrategy, FailurePolicy, FetchConfig, PipelineConfig,
    PoolsConfig, ProviderConfig, UserAgentConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
