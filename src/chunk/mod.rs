//! Token-budgeted chunking
//!
//! Splits extracted text into chunks that fit the consuming model's context,
//! measured with that model's tokenizer. The algorithm is a single greedy
//! pass over precomputed segments:
//!
//! 1. Boundaries (section > paragraph > sentence) are found once, and each
//!    segment between them is counted once. Oversized segments are cut at
//!    words, oversized words at characters.
//! 2. Each chunk takes segments until its budget is spent, then looks back
//!    for the strongest boundary that still leaves it at least half full.
//! 3. The assembled chunk is re-counted and shrunk while it exceeds the
//!    budget, so estimation drift between segment sums and the real count
//!    can never produce an oversized chunk.
//! 4. The next chunk starts `overlap_tokens` tokens before the previous
//!    chunk's end, located by binary search in the same tokenizer.
//!
//! Chunk texts are slices of the source. Dropping each chunk's overlap
//! prefix and concatenating gives back the source exactly.

mod boundary;
mod overlap;

pub use boundary::Strength;

use crate::extract::StructureHints;
use crate::tokenize::Tokenizer;
use boundary::Segment;
use std::sync::Arc;
use thiserror::Error;

/// A piece of a document sized for one model call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Byte offset of `text` in the source, overlap included
    pub start_pos: usize,
    /// Byte offset where this chunk's new content begins
    pub content_start: usize,
    pub end_pos: usize,
    pub token_count: usize,
    /// Tokens repeated from the previous chunk
    pub overlap_tokens: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// The chunk ends at a sentence, paragraph or section break
    pub is_semantic_boundary: bool,
}

impl Chunk {
    /// The chunk text without the overlap prefix
    pub fn content(&self) -> &str {
        &self.text[self.content_start - self.start_pos..]
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("Invalid chunk budget: overlap of {overlap_tokens} tokens must be below the {max_tokens}-token maximum")]
    InvalidBudget {
        max_tokens: usize,
        overlap_tokens: usize,
    },

    #[error("Tokenizer unavailable: {0}")]
    TokenizerUnavailable(String),
}

/// Chunks `text` so that every chunk counts at most `max_tokens` in `tokenizer`
pub fn chunk_text(
    text: &str,
    hints: &StructureHints,
    max_tokens: usize,
    overlap_tokens: usize,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<Chunk>, ChunkingError> {
    validate_budget(max_tokens, overlap_tokens)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = boundary::segments(text, hints, max_tokens - overlap_tokens, tokenizer);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut next = 0;

    while next < segments.len() {
        let content_start = segments[next].start;
        let (mut start, mut overlap) = match chunks.last() {
            Some(prev) if overlap_tokens > 0 => {
                let from = overlap::overlap_start(
                    text,
                    prev.start_pos,
                    content_start,
                    overlap_tokens,
                    tokenizer,
                );
                (from, tokenizer.count_tokens(&text[from..content_start]))
            }
            _ => (content_start, 0),
        };
        if overlap >= max_tokens {
            start = content_start;
            overlap = 0;
        }

        let mut end_seg = greedy_end(&segments, next, max_tokens - overlap);
        let mut count = tokenizer.count_tokens(&text[start..segments[end_seg - 1].end]);

        while count > max_tokens && end_seg > next + 1 {
            end_seg -= 1;
            count = tokenizer.count_tokens(&text[start..segments[end_seg - 1].end]);
        }

        if count > max_tokens {
            // A single segment plus the overlap is still over budget
            let seg = segments[next];
            let mut cut = overlap::fit_end(text, start, seg.start, seg.end, max_tokens, tokenizer);
            if cut.is_none() && overlap > 0 {
                start = content_start;
                overlap = 0;
                cut = overlap::fit_end(text, start, seg.start, seg.end, max_tokens, tokenizer);
            }
            match cut {
                Some(cut) if cut < seg.end => {
                    segments[next].end = cut;
                    segments[next].tokens = tokenizer.count_tokens(&text[seg.start..cut]);
                    segments.insert(
                        next + 1,
                        Segment {
                            start: cut,
                            end: seg.end,
                            tokens: tokenizer.count_tokens(&text[cut..seg.end]),
                            strength: Strength::Hard,
                        },
                    );
                }
                Some(_) => {}
                None => {
                    tracing::warn!(
                        position = seg.start,
                        max_tokens,
                        "A single character exceeds the chunk budget"
                    );
                }
            }
            count = tokenizer.count_tokens(&text[start..segments[end_seg - 1].end]);
        }

        let end = segments[end_seg - 1].end;
        let is_semantic_boundary =
            end_seg >= segments.len() || segments[end_seg].strength >= Strength::Sentence;

        chunks.push(Chunk {
            text: text[start..end].to_string(),
            start_pos: start,
            content_start,
            end_pos: end,
            token_count: count,
            overlap_tokens: overlap,
            chunk_index: chunks.len(),
            total_chunks: 0,
            is_semantic_boundary,
        });
        next = end_seg;
    }

    let total = chunks.len();
    for chunk in &mut chunks {
        chunk.total_chunks = total;
    }

    tracing::debug!(
        chunks = total,
        segments = segments.len(),
        max_tokens,
        overlap_tokens,
        tokenizer = tokenizer.name(),
        "Chunked document"
    );
    Ok(chunks)
}

/// Exclusive end segment index for a chunk starting at `start`
///
/// Takes at least one segment. When the chunk stops before the end of the
/// document, the split moves back to the strongest boundary whose prefix
/// still uses half the budget; ties keep the later split.
fn greedy_end(segments: &[Segment], start: usize, budget: usize) -> usize {
    let mut end = start;
    let mut used = 0usize;
    while end < segments.len() && (end == start || used + segments[end].tokens <= budget) {
        used += segments[end].tokens;
        end += 1;
    }
    if end >= segments.len() {
        return end;
    }

    let half = budget / 2;
    let mut best = end;
    let mut best_strength = segments[end].strength;
    let mut prefix = used;
    let mut split = end;
    while split > start + 1 {
        prefix -= segments[split - 1].tokens;
        split -= 1;
        if prefix < half {
            break;
        }
        if segments[split].strength > best_strength {
            best = split;
            best_strength = segments[split].strength;
        }
    }
    best
}

fn validate_budget(max_tokens: usize, overlap_tokens: usize) -> Result<(), ChunkingError> {
    if max_tokens == 0 || overlap_tokens >= max_tokens {
        return Err(ChunkingError::InvalidBudget {
            max_tokens,
            overlap_tokens,
        });
    }
    Ok(())
}

/// Fraction of `text_len` covered by chunk contents, overlaps removed
pub fn coverage(chunks: &[Chunk], text_len: usize) -> f64 {
    if text_len == 0 {
        return 1.0;
    }
    let mut ranges: Vec<(usize, usize)> = chunks.iter().map(|c| (c.content_start, c.end_pos)).collect();
    ranges.sort_unstable();

    let mut covered = 0usize;
    let mut reach = 0usize;
    for (start, end) in ranges {
        let start = start.max(reach);
        if end > start {
            covered += end - start;
            reach = end;
        }
    }
    covered as f64 / text_len as f64
}

/// Concatenates chunk contents in index order
pub fn reconstruct(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::content).collect()
}

/// Chunking bound to one tokenizer and budget
#[derive(Clone)]
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        max_tokens: usize,
        overlap_tokens: usize,
    ) -> Result<Self, ChunkingError> {
        validate_budget(max_tokens, overlap_tokens)?;
        Ok(Self {
            tokenizer,
            max_tokens,
            overlap_tokens,
        })
    }

    pub fn chunk(&self, text: &str, hints: &StructureHints) -> Result<Vec<Chunk>, ChunkingError> {
        chunk_text(
            text,
            hints,
            self.max_tokens,
            self.overlap_tokens,
            self.tokenizer.as_ref(),
        )
    }

    /// Same budget, different maximum; used when re-chunking for reduction
    pub fn with_max_tokens(&self, max_tokens: usize) -> Result<Self, ChunkingError> {
        Self::new(
            Arc::clone(&self.tokenizer),
            max_tokens,
            self.overlap_tokens.min(max_tokens / 4),
        )
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("tokenizer", &self.tokenizer.name())
            .field("max_tokens", &self.max_tokens)
            .field("overlap_tokens", &self.overlap_tokens)
            .finish()
    }
}
