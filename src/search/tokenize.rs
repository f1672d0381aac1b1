//! Word tokenizer shared by index building and query encoding.
//!
//! Tokens are lowercased, split on whitespace runs, and trimmed of any
//! leading/trailing characters outside `[a-z0-9]`. Interior punctuation is
//! kept, so `"o'brien"` and `"v1.2"` survive as single tokens.

use itertools::Itertools;

/// Split `text` into normalized word tokens, in order, duplicates kept.
pub fn extract_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(trim_non_alnum)
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Drop repeated tokens, keeping each one at its first position.
pub fn dedup_preserving_order<I>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    tokens.into_iter().unique().collect()
}

fn trim_non_alnum(word: &str) -> &str {
    word.trim_matches(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
}
