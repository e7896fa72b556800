//! Token usage tracking for LLM operations.
//!
//! [`TokenUsage`] carries the four counters reported by chat providers:
//! input, output, cache-creation, and cache-read tokens. Values are summed
//! per step into the agent state, so the type supports `+` and `+=`.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Token usage statistics from a single LLM operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the input/prompt.
    #[serde(default)]
    pub input_tokens: u64,

    /// Number of tokens in the output/completion.
    #[serde(default)]
    pub output_tokens: u64,

    /// Tokens written to the prompt cache.
    #[serde(default)]
    pub cache_creation_input_tokens: u64,

    /// Tokens served from the prompt cache.
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    /// Create a new usage record with input and output counts.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        }
    }

    /// Create an empty usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Set cache creation tokens.
    #[must_use]
    pub const fn with_cache_creation(mut self, tokens: u64) -> Self {
        self.cache_creation_input_tokens = tokens;
        self
    }

    /// Set cache read tokens.
    #[must_use]
    pub const fn with_cache_read(mut self, tokens: u64) -> Self {
        self.cache_read_input_tokens = tokens;
        self
    }

    /// Total tokens used (input + output).
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Check if usage is empty (no tokens used).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_tokens() == 0
            && self.cache_creation_input_tokens == 0
            && self.cache_read_input_tokens == 0
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            cache_creation_input_tokens: self.cache_creation_input_tokens
                + rhs.cache_creation_input_tokens,
            cache_read_input_tokens: self.cache_read_input_tokens + rhs.cache_read_input_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::fmt::Display for TokenUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TokenUsage(in: {}, out: {}, total: {})",
            self.input_tokens,
            self.output_tokens,
            self.total_tokens()
        )?;
        if self.cache_read_input_tokens > 0 {
            write!(f, " [cache read: {}]", self.cache_read_input_tokens)?;
        }
        if self.cache_creation_input_tokens > 0 {
            write!(f, " [cache creation: {}]", self.cache_creation_input_tokens)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_usage() {
        let usage = TokenUsage::new(100, 50);
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 50);
        assert_eq!(usage.total_tokens(), 150);
    }

    #[test]
    fn zero_is_empty() {
        assert!(TokenUsage::zero().is_empty());
        assert!(!TokenUsage::new(1, 0).is_empty());
    }

    #[test]
    fn cache_counters_affect_emptiness() {
        let usage = TokenUsage::zero().with_cache_read(5);
        assert!(!usage.is_empty());
    }

    #[test]
    fn add_sums_all_counters() {
        let a = TokenUsage::new(100, 50).with_cache_creation(10);
        let b = TokenUsage::new(200, 100).with_cache_read(20);
        let c = a + b;

        assert_eq!(c.input_tokens, 300);
        assert_eq!(c.output_tokens, 150);
        assert_eq!(c.cache_creation_input_tokens, 10);
        assert_eq!(c.cache_read_input_tokens, 20);
    }

    #[test]
    fn add_assign_works() {
        let mut usage = TokenUsage::new(100, 50);
        usage += TokenUsage::new(200, 100);
        assert_eq!(usage.input_tokens, 300);
        assert_eq!(usage.output_tokens, 150);
    }

    #[test]
    fn serde_defaults_missing_fields() {
        let usage: TokenUsage = serde_json::from_str(r#"{"input_tokens": 7}"#).unwrap();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 0);
    }

    #[test]
    fn display_mentions_cache_only_when_present() {
        let plain = TokenUsage::new(10, 5).to_string();
        assert!(!plain.contains("cache"));

        let cached = TokenUsage::new(10, 5).with_cache_read(3).to_string();
        assert!(cached.contains("cache read: 3"));
    }
}
