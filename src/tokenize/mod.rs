//! Token counting per provider
//!
//! Chunk budgets and overlaps are measured with the tokenizer of the model
//! that will consume the chunks. [`resolve_tokenizer`] maps a provider and
//! model to that tokenizer. Any selection that only estimates counts, whether
//! a provider without a public encoding or a fallback after the exact
//! tokenizer failed to build, is reported as degraded.

mod bpe;
mod heuristic;

pub use bpe::TiktokenTokenizer;
pub use heuristic::{HeuristicTokenizer, WhitespaceTokenizer};

use std::sync::Arc;

/// Counts tokens the way a particular model does
pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;

    fn count_tokens(&self, text: &str) -> usize;

    /// True when counts are approximations rather than the model's encoding
    fn is_estimate(&self) -> bool {
        false
    }
}

/// How a provider's tokens are counted
#[derive(Debug, Clone, Copy, PartialEq)]
enum TokenizerKind {
    /// Model-specific BPE
    Bpe,
    /// Characters per token for providers without a public encoding
    Ratio(f64),
}

/// Provider name to tokenizer family
const PROVIDER_TOKENIZERS: &[(&str, TokenizerKind)] = &[
    ("openai", TokenizerKind::Bpe),
    ("azure-openai", TokenizerKind::Bpe),
    ("anthropic", TokenizerKind::Ratio(3.5)),
    ("mistral", TokenizerKind::Ratio(3.6)),
    ("ollama", TokenizerKind::Ratio(3.7)),
    ("gemini", TokenizerKind::Ratio(4.0)),
];

/// Characters per token assumed for unknown providers
const FALLBACK_CHARS_PER_TOKEN: f64 = 3.7;

/// The tokenizer chosen for a provider/model pair
#[derive(Clone)]
pub struct TokenizerSelection {
    pub tokenizer: Arc<dyn Tokenizer>,
    /// Set whenever counts are estimates rather than the model's encoding
    pub degraded: bool,
}

impl std::fmt::Debug for TokenizerSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizerSelection")
            .field("tokenizer", &self.tokenizer.name())
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// Picks the tokenizer for `provider`/`model`
pub fn resolve_tokenizer(provider: &str, model: &str) -> TokenizerSelection {
    let provider_key = provider.to_ascii_lowercase();
    let kind = PROVIDER_TOKENIZERS
        .iter()
        .find(|(name, _)| *name == provider_key)
        .map(|(_, kind)| *kind);

    match kind {
        Some(TokenizerKind::Bpe) => match TiktokenTokenizer::for_model(model) {
            Ok(tokenizer) => TokenizerSelection {
                tokenizer: Arc::new(tokenizer),
                degraded: false,
            },
            Err(e) => {
                tracing::warn!(provider, model, "Model tokenizer unavailable ({}), trying cl100k_base", e);
                match TiktokenTokenizer::cl100k() {
                    Ok(tokenizer) => TokenizerSelection {
                        tokenizer: Arc::new(tokenizer),
                        degraded: true,
                    },
                    Err(e) => {
                        tracing::warn!(provider, model, "BPE tokenizer unavailable ({}), estimating", e);
                        degraded_estimate(model)
                    }
                }
            }
        },
        Some(TokenizerKind::Ratio(chars_per_token)) => TokenizerSelection {
            tokenizer: Arc::new(HeuristicTokenizer::new(model, chars_per_token)),
            degraded: true,
        },
        None => {
            tracing::warn!(provider, model, "No tokenizer known for provider, estimating");
            degraded_estimate(model)
        }
    }
}

fn degraded_estimate(model: &str) -> TokenizerSelection {
    TokenizerSelection {
        tokenizer: Arc::new(HeuristicTokenizer::new(model, FALLBACK_CHARS_PER_TOKEN)),
        degraded: true,
    }
}
