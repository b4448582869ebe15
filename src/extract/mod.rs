//! Main-content extraction
//!
//! Raw fetched bytes become clean text plus lightweight structure hints
//! (heading, paragraph and list boundaries) for the chunker. HTML is walked
//! iteratively, so arbitrarily deep documents cannot overflow the stack.
//!
//! Extraction is adaptive: large or deeply nested documents get the
//! [`ExtractionStrategy::Precision`] treatment (aggressive boilerplate
//! removal), small ones [`ExtractionStrategy::Recall`]. A sparse result is
//! retried with `Recall`, and only when that yields nothing does a naive tag
//! strip run. Every result carries an [`ExtractionQuality`] signal.

mod html;
mod plain;
mod strip;

use crate::fetch::{sniff, FetchResult};
use scraper::Html;
use std::fmt;
use thiserror::Error;

/// Semantic role of a run of extracted text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Heading with its level, 1 to 6
    Heading(u8),
    Paragraph,
    ListItem,
    Preformatted,
    Quote,
}

/// A block of extracted text; `start..end` are byte offsets into the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextBlock {
    pub kind: BlockKind,
    pub start: usize,
    pub end: usize,
}

/// Structural boundaries found during extraction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureHints {
    pub blocks: Vec<TextBlock>,
    /// DOM depth for HTML, deepest heading level for text
    pub max_depth: usize,
}

/// How aggressively boilerplate is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    Precision,
    Balanced,
    Recall,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precision => "precision",
            Self::Balanced => "balanced",
            Self::Recall => "recall",
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal describing how trustworthy an extraction is
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionQuality {
    /// Strategy that produced the final text; `None` for the naive strip and plain text
    pub strategy: Option<ExtractionStrategy>,
    /// Kept visible characters over all visible characters
    pub coverage: f64,
    pub visible_chars: usize,
    pub text_chars: usize,
    /// Set when the naive fallback produced the text
    pub degraded: bool,
}

/// Clean text ready for chunking
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub title: Option<String>,
    pub hints: StructureHints,
    pub quality: ExtractionQuality,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// Every strategy, including the naive strip, came back empty
    #[error("No usable text could be extracted")]
    NoUsableText,

    #[error("Unsupported content type: {0}")]
    Unsupported(String),
}

/// Thresholds steering strategy selection
#[derive(Debug, Clone, Copy)]
pub struct ExtractorSettings {
    /// Results with fewer non-whitespace characters are retried with `Recall`
    pub min_text_chars: usize,
    /// Documents at least this large start with `Precision`
    pub precision_bytes: usize,
    /// Documents at least this deeply nested start with `Precision`
    pub precision_depth: usize,
    /// Documents smaller than this start with `Recall`
    pub recall_bytes: usize,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            min_text_chars: 200,
            precision_bytes: 512 * 1024,
            precision_depth: 48,
            recall_bytes: 16 * 1024,
        }
    }
}

/// Turns fetched documents into text and structure hints
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    settings: ExtractorSettings,
}

impl Extractor {
    pub fn new(settings: ExtractorSettings) -> Self {
        Self { settings }
    }

    pub fn extract(&self, fetched: &FetchResult) -> Result<Extraction, ExtractionError> {
        self.extract_bytes(&fetched.content, &fetched.content_type)
            .map_err(|e| {
                tracing::warn!(url = %fetched.url, "Extraction failed: {}", e);
                e
            })
    }

    pub fn extract_bytes(&self, content: &[u8], content_type: &str) -> Result<Extraction, ExtractionError> {
        let lowered = content_type.to_ascii_lowercase();
        if is_binary_type(&lowered) {
            return Err(ExtractionError::Unsupported(content_type.to_string()));
        }

        if sniff::is_html(&lowered, content) {
            self.extract_html(content)
        } else {
            plain::extract(&String::from_utf8_lossy(content)).ok_or(ExtractionError::NoUsableText)
        }
    }

    /// Picks a starting strategy from document size and nesting depth
    pub fn choose_strategy(&self, bytes: usize, depth: usize) -> ExtractionStrategy {
        if bytes >= self.settings.precision_bytes || depth >= self.settings.precision_depth {
            ExtractionStrategy::Precision
        } else if bytes < self.settings.recall_bytes {
            ExtractionStrategy::Recall
        } else {
            ExtractionStrategy::Balanced
        }
    }

    fn extract_html(&self, content: &[u8]) -> Result<Extraction, ExtractionError> {
        let source = String::from_utf8_lossy(content);
        let document = Html::parse_document(&source);
        let depth = html::dom_depth(&document);
        let visible_chars = sniff::static_text_chars(&document);
        let title = html::title(&document);

        let mut strategy = self.choose_strategy(content.len(), depth);
        let mut rendered = html::render(&document, strategy);

        if rendered.kept_chars < self.settings.min_text_chars && strategy != ExtractionStrategy::Recall {
            tracing::debug!(
                strategy = strategy.as_str(),
                kept = rendered.kept_chars,
                "Sparse extraction, retrying with recall"
            );
            let recall = html::render(&document, ExtractionStrategy::Recall);
            if recall.kept_chars > rendered.kept_chars {
                strategy = ExtractionStrategy::Recall;
                rendered = recall;
            }
        }

        if rendered.text.trim().is_empty() {
            let stripped = strip::strip_tags(&source);
            if stripped.is_empty() {
                return Err(ExtractionError::NoUsableText);
            }
            tracing::warn!("Structured extraction empty, using naive tag strip");
            let text_chars = non_whitespace_chars(&stripped);
            let end = stripped.len();
            return Ok(Extraction {
                text: stripped,
                title,
                hints: StructureHints {
                    blocks: vec![TextBlock {
                        kind: BlockKind::Paragraph,
                        start: 0,
                        end,
                    }],
                    max_depth: depth,
                },
                quality: ExtractionQuality {
                    strategy: None,
                    coverage: coverage(text_chars, visible_chars),
                    visible_chars,
                    text_chars,
                    degraded: true,
                },
            });
        }

        Ok(Extraction {
            quality: ExtractionQuality {
                strategy: Some(strategy),
                coverage: coverage(rendered.kept_chars, visible_chars),
                visible_chars,
                text_chars: rendered.kept_chars,
                degraded: false,
            },
            text: rendered.text,
            title,
            hints: StructureHints {
                blocks: rendered.blocks,
                max_depth: depth,
            },
        })
    }
}

fn is_binary_type(content_type: &str) -> bool {
    ["image/", "audio/", "video/", "font/", "application/pdf", "application/zip"]
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}

pub(crate) fn non_whitespace_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

fn coverage(kept: usize, visible: usize) -> f64 {
    if visible == 0 {
        1.0
    } else {
        (kept as f64 / visible as f64).min(1.0)
    }
}
