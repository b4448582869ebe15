use super::Tokenizer;
use crate::chunk::ChunkingError;
use tiktoken_rs::CoreBPE;

/// OpenAI byte-pair encoding via tiktoken
pub struct TiktokenTokenizer {
    bpe: CoreBPE,
    name: String,
}

impl TiktokenTokenizer {
    /// Encoding used by `model`, e.g. "gpt-4" or "gpt-3.5-turbo"
    pub fn for_model(model: &str) -> Result<Self, ChunkingError> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| ChunkingError::TokenizerUnavailable(format!("{}: {}", model, e)))?;
        Ok(Self {
            bpe,
            name: model.to_string(),
        })
    }

    pub fn cl100k() -> Result<Self, ChunkingError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| ChunkingError::TokenizerUnavailable(format!("cl100k_base: {}", e)))?;
        Ok(Self {
            bpe,
            name: "cl100k_base".to_string(),
        })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}
