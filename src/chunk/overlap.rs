//! Token-exact positioning by binary search
//!
//! Both helpers assume counts grow as the measured span grows, which holds
//! for BPE and ratio tokenizers up to merge effects at the edges.

use super::boundary::{next_char_boundary, word_starts};
use crate::tokenize::Tokenizer;

/// Bytes per token assumed when bounding the search window
const MAX_BYTES_PER_TOKEN: usize = 32;

/// Where the next chunk should start so it repeats `target` tokens of `text[window_start..end]`
///
/// Returns the latest position whose suffix up to `end` still counts at
/// least `target` tokens: word starts are searched first, then characters
/// inside the chosen word when the word-level count overshoots. When the
/// whole window has fewer tokens than `target`, the window start is returned.
pub(crate) fn overlap_start(
    text: &str,
    window_start: usize,
    end: usize,
    target: usize,
    tokenizer: &dyn Tokenizer,
) -> usize {
    if target == 0 || window_start >= end {
        return end;
    }
    let suffix = |from: usize| tokenizer.count_tokens(&text[from..end]);

    if suffix(window_start) <= target {
        return window_start;
    }

    let starts = word_starts(text, window_start, end);
    // Invariant: suffix(starts[lo]) >= target
    let (mut lo, mut hi) = (0usize, starts.len() - 1);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if suffix(starts[mid]) >= target {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    let word = starts[lo];
    if suffix(word) == target {
        return word;
    }

    // Refine inside the word: later character starts give shorter suffixes
    let word_end = starts.get(lo + 1).copied().unwrap_or(end);
    let chars: Vec<usize> = text[word..word_end]
        .char_indices()
        .map(|(i, _)| word + i)
        .collect();
    let (mut lo, mut hi) = (0usize, chars.len() - 1);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if suffix(chars[mid]) >= target {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    chars[lo]
}

/// Latest character boundary `p` in `(lo, hi]` with `text[from..p]` within `limit` tokens
///
/// `None` when not even one character after `lo` fits.
pub(crate) fn fit_end(
    text: &str,
    from: usize,
    lo: usize,
    hi: usize,
    limit: usize,
    tokenizer: &dyn Tokenizer,
) -> Option<usize> {
    if lo >= hi {
        return None;
    }

    let mut window_end = hi.min(lo.saturating_add(limit.saturating_mul(MAX_BYTES_PER_TOKEN)));
    while !text.is_char_boundary(window_end) {
        window_end -= 1;
    }
    if window_end <= lo {
        window_end = next_char_boundary(text, lo, hi);
    }

    let ends: Vec<usize> = text[lo..window_end]
        .char_indices()
        .skip(1)
        .map(|(i, _)| lo + i)
        .chain(std::iter::once(window_end))
        .collect();

    let fits = |p: usize| tokenizer.count_tokens(&text[from..p]) <= limit;
    if !fits(ends[0]) {
        return None;
    }

    // Invariant: ends[lo] fits
    let (mut a, mut b) = (0usize, ends.len() - 1);
    while a < b {
        let mid = a + (b - a + 1) / 2;
        if fits(ends[mid]) {
            a = mid;
        } else {
            b = mid - 1;
        }
    }
    Some(ends[a])
}
