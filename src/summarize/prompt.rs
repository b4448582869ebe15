//! Prompt construction for the map and reduce phases

use super::PartialSummary;
use crate::chunk::Chunk;
use crate::llm::CompletionRequest;

pub(crate) const MAP_SYSTEM: &str = "You write faithful, compact summaries of documents. \
Keep concrete facts, names and figures. Never add information that is not in the text.";

pub(crate) const REDUCE_SYSTEM: &str = "You merge partial summaries of one document into a single \
coherent summary. The parts are given in document order. Remove repetition and keep every \
distinct fact.";

/// Request summarizing one chunk
pub(crate) fn map_request(chunk: &Chunk, query: Option<&str>) -> CompletionRequest {
    let mut prompt = String::with_capacity(chunk.text.len() + 256);

    if chunk.total_chunks > 1 {
        prompt.push_str(&format!(
            "This is part {} of {} of a longer document.\n",
            chunk.chunk_index + 1,
            chunk.total_chunks
        ));
    }
    if let Some(query) = query {
        prompt.push_str(&format!(
            "Focus on what is relevant to this question: {}\n",
            query
        ));
    }
    prompt.push_str("Summarize the following text.\n\n---\n");
    prompt.push_str(&chunk.text);

    CompletionRequest::new(prompt).with_system(MAP_SYSTEM)
}

/// Request merging the ordered partial summaries
pub(crate) fn reduce_request(combined: &str, parts: usize, query: Option<&str>) -> CompletionRequest {
    let mut prompt = String::with_capacity(combined.len() + 256);

    prompt.push_str(&format!(
        "Below are {} partial summaries of the same document, in order.\n",
        parts
    ));
    if let Some(query) = query {
        prompt.push_str(&format!("Answer this question from them: {}\n", query));
    } else {
        prompt.push_str("Write one summary of the whole document.\n");
    }
    prompt.push_str("\n---\n");
    prompt.push_str(combined);

    CompletionRequest::new(prompt).with_system(REDUCE_SYSTEM)
}

/// Joins surviving partial summaries in the order given
pub(crate) fn combine<'a>(partials: impl IntoIterator<Item = &'a PartialSummary>) -> String {
    partials
        .into_iter()
        .map(|p| p.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
