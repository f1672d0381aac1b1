//! Packs a message's hashed and raw tokens into its `search_index` string.

use super::hasher::{HashInput, SemanticHasher};
use super::tokenize::{dedup_preserving_order, extract_words};

/// Upper bound on `messages.search_index`.
///
/// Measured in UTF-8 bytes (`str::len`), not characters: non-ASCII text
/// fills the budget sooner than its character count suggests.
pub const MAX_INDEX_LEN: usize = 5000;

/// Result of packing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedIndex {
    pub text: String,
    pub hashed_tokens: usize,
    pub raw_tokens: usize,
    /// Tokens that did not fit in the budget.
    pub dropped: usize,
}

/// Raw (prefix-match) tokens: the sender verbatim, then subject and body words.
pub fn extract_raw_words(input: &HashInput<'_>) -> Vec<String> {
    let mut words = Vec::new();
    if let Some(from) = input.email_from.filter(|f| !f.is_empty()) {
        words.push(from.to_string());
    }
    if let Some(subject) = input.subject {
        words.extend(extract_words(subject));
    }
    if let Some(body) = input.body {
        words.extend(extract_words(body));
    }
    dedup_preserving_order(words)
}

/// Greedily join tokens with single spaces until the next one would overflow.
///
/// Each token costs `len + 1`. Packing stops at the first token that does not
/// fit; nothing after it is considered, even if shorter.
pub fn pack_tokens<'a, I>(tokens: I, budget: usize) -> (String, usize)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut total = 0usize;
    let mut kept: Vec<&str> = Vec::new();
    let mut iter = tokens.into_iter();

    while let Some(token) = iter.next() {
        if total + token.len() + 1 > budget {
            let dropped = 1 + iter.count();
            return (kept.join(" "), dropped);
        }
        kept.push(token);
        total += token.len() + 1;
    }

    (kept.join(" "), 0)
}

/// Build the packed index for one message: hashed tokens first, raw second.
pub fn build_search_index(hasher: &dyn SemanticHasher, input: &HashInput<'_>) -> PackedIndex {
    build_search_index_with_budget(hasher, input, MAX_INDEX_LEN)
}

pub fn build_search_index_with_budget(
    hasher: &dyn SemanticHasher,
    input: &HashInput<'_>,
    budget: usize,
) -> PackedIndex {
    let hashed = hasher.hash_words(input);
    let raw = extract_raw_words(input);

    let stream = hashed.iter().chain(raw.iter()).map(String::as_str);
    let (text, dropped) = pack_tokens(stream, budget);

    PackedIndex {
        text,
        hashed_tokens: hashed.len(),
        raw_tokens: raw.len(),
        dropped,
    }
}
