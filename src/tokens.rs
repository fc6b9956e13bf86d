//! Token estimation for mission documents
//!
//! Model tokenizers are vendor-specific and unstable across versions, so the
//! mapper only needs a deterministic estimate that grows with text length.

/// Estimates how many model tokens a text occupies
pub trait TokenCounter: Send + Sync {
    /// Deterministic for a given text; never decreases as text grows
    fn count(&self, text: &str) -> usize;
}

/// Default characters per token for English prose and code
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Character-ratio estimator: `ceil(chars / chars_per_token)`
#[derive(Debug, Clone, Copy)]
pub struct HeuristicCounter {
    chars_per_token: usize,
}

impl HeuristicCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }
}

impl Default for HeuristicCounter {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        // chars, not bytes, so non-ASCII text is not over-counted
        text.chars().count().div_ceil(self.chars_per_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_zero() {
        assert_eq!(HeuristicCounter::default().count(""), 0);
    }

    #[test]
    fn test_rounds_up() {
        let counter = HeuristicCounter::default();
        assert_eq!(counter.count("abc"), 1);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        let counter = HeuristicCounter::default();
        // 4 chars, 12 bytes
        assert_eq!(counter.count("日本語だ"), 1);
    }

    #[test]
    fn test_zero_ratio_clamped() {
        let counter = HeuristicCounter::new(0);
        assert_eq!(counter.chars_per_token(), 1);
        assert_eq!(counter.count("abc"), 3);
    }

    #[test]
    fn test_monotonic_in_length() {
        let counter = HeuristicCounter::default();
        let mut text = String::new();
        let mut last = 0;
        for _ in 0..200 {
            text.push('x');
            let n = counter.count(&text);
            assert!(n >= last);
            last = n;
        }
        assert_eq!(last, 50);
    }
}
