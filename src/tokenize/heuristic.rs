use super::Tokenizer;

/// Estimates tokens from a characters-per-token ratio
#[derive(Debug, Clone)]
pub struct HeuristicTokenizer {
    name: String,
    chars_per_token: f64,
}

impl HeuristicTokenizer {
    pub fn new(name: &str, chars_per_token: f64) -> Self {
        Self {
            name: name.to_string(),
            chars_per_token: if chars_per_token > 0.0 { chars_per_token } else { 3.7 },
        }
    }
}

impl Tokenizer for HeuristicTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn count_tokens(&self, text: &str) -> usize {
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }

    fn is_estimate(&self) -> bool {
        true
    }
}

/// One token per whitespace-separated word
///
/// Exact and additive across word boundaries, which makes chunk budgets
/// easy to reason about in tests and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_rounds_up() {
        let tokenizer = HeuristicTokenizer::new("est", 4.0);
        assert_eq!(tokenizer.count_tokens(""), 0);
        assert_eq!(tokenizer.count_tokens("abcd"), 1);
        assert_eq!(tokenizer.count_tokens("abcde"), 2);
        assert!(tokenizer.is_estimate());
    }

    #[test]
    fn test_heuristic_counts_chars_not_bytes() {
        let tokenizer = HeuristicTokenizer::new("est", 2.0);
        assert_eq!(tokenizer.count_tokens("éé"), 1);
    }

    #[test]
    fn test_whitespace_counts_words() {
        assert_eq!(WhitespaceTokenizer.count_tokens("  one two\nthree "), 3);
        assert_eq!(WhitespaceTokenizer.count_tokens(""), 0);
    }
}
