//! Map-reduce summarization
//!
//! Each chunk is summarized independently (map) under a concurrency bound,
//! then the partial summaries are merged in document order (reduce). When
//! the merged partials are themselves too large for one call, they are
//! re-chunked and mapped again, up to a configured depth.

mod engine;
mod prompt;
mod state;

pub use engine::{EngineSettings, SummarizationEngine};
pub use state::EngineState;

use crate::chunk::ChunkingError;
use crate::llm::LlmError;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Outcome of one chunk's map call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialStatus {
    Ok,
    /// Failed permanently under the abort policy; the batch stops here
    Failed,
    /// Failed permanently and dropped under the omit policy
    Omitted,
}

/// A chunk summary tagged with its position in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSummary {
    pub chunk_index: usize,
    pub text: String,
    pub status: PartialStatus,
}

/// Progress notifications for callers that want incremental output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryEvent {
    State(EngineState),
    ChunkDone {
        chunk_index: usize,
        status: PartialStatus,
        completed: usize,
        total: usize,
    },
    /// A piece of the final summary, streaming strategy only
    Delta(String),
    Complete,
}

pub type EventSink = UnboundedSender<SummaryEvent>;

pub(crate) fn emit(sink: Option<&EventSink>, event: SummaryEvent) {
    if let Some(sink) = sink {
        // A caller that stopped listening does not stop the batch
        let _ = sink.send(event);
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SummarizationError {
    #[error("Nothing to summarize")]
    NoInput,

    #[error("Chunk {chunk_index} failed after {attempts} attempts: {source}")]
    ChunkFailed {
        chunk_index: usize,
        attempts: u32,
        source: LlmError,
    },

    #[error("All {total} chunks failed")]
    AllChunksFailed { total: usize },

    #[error("Reduce input of {tokens} tokens still exceeds the {budget}-token budget after {depth} rounds")]
    ContextOverflow {
        depth: usize,
        tokens: usize,
        budget: usize,
    },

    #[error("Reduce call failed after {attempts} attempts: {source}")]
    Reduce { attempts: u32, source: LlmError },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: EngineState, to: EngineState },

    #[error("Chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    #[error("Map task failed: {0}")]
    Task(String),
}
