//! Token budget estimation.
//!
//! The whole crate trades in one currency: an estimated token count derived
//! from text length at a fixed four characters per token. It is not a real
//! tokenizer — it deliberately under-counts short strings — but every budget
//! comparison in the system uses the same rule, so the approximation is
//! self-consistent. Callers that need a structural picture of a document
//! (line/word/fence/header counts) use [`content_stats`].

use serde::Serialize;

/// Fixed chars-per-token divisor. All budget math in the crate uses this
/// exact integer division; do not replace it with a tokenizer.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a text using the 4-chars-per-token rule.
///
/// Truncates toward zero: `estimate_tokens("abc") == 0`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Structural statistics for a document.
///
/// Feeds the optimization-suggestion heuristics in
/// [`analytics`](crate::analytics); advisory only.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ContentStats {
    /// Total length in bytes.
    pub characters: usize,
    /// Estimated tokens ([`estimate_tokens`]).
    pub estimated_tokens: usize,
    /// Number of lines (`\n`-separated segments, so an empty text is 1 line).
    pub lines: usize,
    /// Whitespace-separated word count.
    pub words: usize,
    /// Paired code fences: occurrences of ` ``` ` divided by two.
    pub code_blocks: usize,
    /// Lines whose trimmed form starts with `#`.
    pub headers: usize,
}

/// Compute [`ContentStats`] for a document.
pub fn content_stats(text: &str) -> ContentStats {
    ContentStats {
        characters: text.len(),
        estimated_tokens: estimate_tokens(text),
        lines: text.split('\n').count(),
        words: text.split_whitespace().count(),
        code_blocks: text.matches("```").count() / 2,
        headers: text
            .split('\n')
            .filter(|line| line.trim_start().starts_with('#'))
            .count(),
    }
}
