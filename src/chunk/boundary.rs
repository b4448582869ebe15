//! Split points and the segments between them
//!
//! Boundaries are computed once per document from the extractor's block hints
//! and a single scan of the text. Every segment is counted once; segments
//! over budget are cut at word starts, and single words over budget are cut
//! at character positions.

use super::overlap::fit_end;
use crate::extract::{BlockKind, StructureHints};
use crate::tokenize::Tokenizer;

/// How good a place to split a boundary is, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    /// Inside a word, only when nothing else fits
    Hard,
    Word,
    Sentence,
    Paragraph,
    Section,
}

/// Text between two consecutive boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment {
    pub start: usize,
    pub end: usize,
    pub tokens: usize,
    /// Strength of the boundary at `start`
    pub strength: Strength,
}

/// Sentence-level and stronger boundaries, sorted and deduplicated
pub(crate) fn boundaries(text: &str, hints: &StructureHints) -> Vec<(usize, Strength)> {
    let mut found: Vec<(usize, Strength)> = hints
        .blocks
        .iter()
        .filter(|block| block.start > 0 && block.start < text.len() && text.is_char_boundary(block.start))
        .map(|block| {
            let strength = match block.kind {
                BlockKind::Heading(_) => Strength::Section,
                _ => Strength::Paragraph,
            };
            (block.start, strength)
        })
        .collect();

    scan_text(text, &mut found);

    found.sort_unstable_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    found.dedup_by_key(|(pos, _)| *pos);
    found
}

fn scan_text(text: &str, found: &mut Vec<(usize, Strength)>) {
    let mut newlines = 0usize;
    let mut in_space = false;
    let mut terminal = false;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if c == '\n' {
                newlines += 1;
            }
            in_space = true;
            continue;
        }

        if in_space && i > 0 {
            let rest = &text[i..];
            let strength = if newlines >= 2 {
                if rest.starts_with('#') {
                    Some(Strength::Section)
                } else {
                    Some(Strength::Paragraph)
                }
            } else if newlines == 1 && rest.starts_with('#') {
                Some(Strength::Section)
            } else if newlines == 1 && ["- ", "* ", "> "].iter().any(|m| rest.starts_with(m)) {
                Some(Strength::Sentence)
            } else if terminal {
                Some(Strength::Sentence)
            } else {
                None
            };
            if let Some(strength) = strength {
                found.push((i, strength));
            }
        }

        in_space = false;
        newlines = 0;
        // Closing quotes and brackets keep the sentence-end state
        if !matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}') {
            terminal = matches!(c, '.' | '!' | '?' | ';' | '\u{3002}' | '\u{ff01}' | '\u{ff1f}');
        }
    }
}

/// Byte offsets of word starts in `text[from..to]`, always including `from`
pub(crate) fn word_starts(text: &str, from: usize, to: usize) -> Vec<usize> {
    let mut starts = vec![from];
    let mut prev_space = false;
    for (i, c) in text[from..to].char_indices() {
        if c.is_whitespace() {
            prev_space = true;
        } else {
            if prev_space && i > 0 {
                starts.push(from + i);
            }
            prev_space = false;
        }
    }
    starts
}

/// Splits `text` into counted segments, none estimated above `limit`
pub(crate) fn segments(
    text: &str,
    hints: &StructureHints,
    limit: usize,
    tokenizer: &dyn Tokenizer,
) -> Vec<Segment> {
    let found = boundaries(text, hints);
    let mut out = Vec::with_capacity(found.len() + 1);

    let mut start = 0;
    let mut strength = Strength::Section;
    for (pos, next_strength) in found.into_iter().chain(std::iter::once((text.len(), Strength::Section))) {
        if pos > start {
            push_segment(text, start, pos, strength, limit, tokenizer, &mut out);
        }
        start = pos;
        strength = next_strength;
    }

    out
}

fn push_segment(
    text: &str,
    start: usize,
    end: usize,
    strength: Strength,
    limit: usize,
    tokenizer: &dyn Tokenizer,
    out: &mut Vec<Segment>,
) {
    let tokens = tokenizer.count_tokens(&text[start..end]);
    if tokens <= limit {
        out.push(Segment {
            start,
            end,
            tokens,
            strength,
        });
        return;
    }

    // Oversized: pack whole words, each counted once
    let mut words = word_starts(text, start, end);
    words.push(end);

    let mut piece_start = start;
    let mut piece_tokens = 0;
    let mut piece_strength = strength;

    for pair in words.windows(2) {
        let (w, w_end) = (pair[0], pair[1]);
        if w == w_end {
            continue;
        }
        let word_tokens = tokenizer.count_tokens(&text[w..w_end]);

        if word_tokens > limit {
            if w > piece_start {
                out.push(Segment {
                    start: piece_start,
                    end: w,
                    tokens: piece_tokens,
                    strength: piece_strength,
                });
                piece_strength = Strength::Word;
            }
            hard_cut(text, w, w_end, piece_strength, limit, tokenizer, out);
            piece_start = w_end;
            piece_tokens = 0;
            piece_strength = Strength::Word;
            continue;
        }

        if piece_tokens > 0 && piece_tokens + word_tokens > limit {
            out.push(Segment {
                start: piece_start,
                end: w,
                tokens: piece_tokens,
                strength: piece_strength,
            });
            piece_start = w;
            piece_tokens = 0;
            piece_strength = Strength::Word;
        }
        piece_tokens += word_tokens;
    }

    if end > piece_start {
        out.push(Segment {
            start: piece_start,
            end,
            tokens: piece_tokens,
            strength: piece_strength,
        });
    }
}

/// Cuts a single oversized word at character positions
fn hard_cut(
    text: &str,
    start: usize,
    end: usize,
    strength: Strength,
    limit: usize,
    tokenizer: &dyn Tokenizer,
    out: &mut Vec<Segment>,
) {
    let mut from = start;
    let mut strength = strength;
    while from < end {
        let cut = fit_end(text, from, from, end, limit, tokenizer)
            .unwrap_or_else(|| next_char_boundary(text, from, end));
        out.push(Segment {
            start: from,
            end: cut,
            tokens: tokenizer.count_tokens(&text[from..cut]),
            strength,
        });
        from = cut;
        strength = Strength::Hard;
    }
}

pub(crate) fn next_char_boundary(text: &str, from: usize, end: usize) -> usize {
    text[from..end]
        .char_indices()
        .nth(1)
        .map(|(i, _)| from + i)
        .unwrap_or(end)
}
