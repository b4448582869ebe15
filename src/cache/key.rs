//! Cache key derivation

use crate::config::{Config, FailurePolicy};
use sha2::{Digest, Sha256};
use std::fmt;

/// Configuration values that change what a summary looks like
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigFingerprint {
    pub max_tokens_per_chunk: usize,
    pub overlap_tokens: usize,
    pub reduce_budget_tokens: usize,
    pub failure_policy: FailurePolicy,
    pub provider: String,
    pub model: String,
    pub max_output_tokens: u32,
}

impl ConfigFingerprint {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tokens_per_chunk: config.pipeline.max_tokens_per_chunk,
            overlap_tokens: config.pipeline.overlap_tokens,
            reduce_budget_tokens: config.pipeline.reduce_budget_tokens,
            failure_policy: config.pipeline.per_chunk_failure_policy,
            provider: config.provider.name.clone(),
            model: config.provider.model.clone(),
            max_output_tokens: config.provider.max_output_tokens,
        }
    }

    fn canonical(&self) -> String {
        format!(
            "max_tokens={};overlap={};reduce_budget={};policy={};provider={};model={};max_output={}",
            self.max_tokens_per_chunk,
            self.overlap_tokens,
            self.reduce_budget_tokens,
            self.failure_policy.as_str(),
            self.provider,
            self.model,
            self.max_output_tokens
        )
    }
}

/// SHA-256 over the normalized request inputs, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a request
    ///
    /// `urls` must already be normalized. Order and duplicates do not
    /// matter; a blank query is the same as no query.
    pub fn compute<S: AsRef<str>>(urls: &[S], query: Option<&str>, fingerprint: &ConfigFingerprint) -> Self {
        let mut sorted: Vec<&str> = urls.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = Sha256::new();
        for url in sorted {
            hasher.update(b"url\x1f");
            hasher.update(url.as_bytes());
            hasher.update(b"\x1e");
        }

        let query = query.map(str::trim).filter(|q| !q.is_empty());
        if let Some(query) = query {
            hasher.update(b"query\x1f");
            hasher.update(query.as_bytes());
            hasher.update(b"\x1e");
        }

        hasher.update(b"config\x1f");
        hasher.update(fingerprint.canonical().as_bytes());

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
