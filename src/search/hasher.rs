//! Semantic hashing of message content into exact-match tokens.
//!
//! The same hasher must be used to build a message's index and to encode a
//! search query: exact matching is a set-containment test between the two
//! outputs, so equal normalized content has to produce equal tokens no
//! matter which side produced it.
//!
//! Two implementations ship:
//!
//! - [`NormalizingHasher`] (default): Unicode NFKC followed by the word
//!   tokenizer. Tokens stay human-readable, so a query token can also be a
//!   prefix of a stored token.
//! - [`KeyedHasher`]: HMAC-SHA256 over each normalized word, truncated to
//!   [`KEYED_TOKEN_HEX_LEN`] hex characters. Prefix relationships between
//!   words are destroyed, so against the hashed segment a prefix test only
//!   ever succeeds on whole-token equality.

use std::fmt;

use ring::hmac;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::tokenize::{dedup_preserving_order, extract_words};

/// Hex characters kept from each keyed digest (64 bits).
pub const KEYED_TOKEN_HEX_LEN: usize = 16;

/// Fields fed to a [`SemanticHasher`]. Query encoding only sets `body`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashInput<'a> {
    pub email_from: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub body: Option<&'a str>,
}

impl<'a> HashInput<'a> {
    pub fn body(body: &'a str) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }

    fn fields(&self) -> impl Iterator<Item = &'a str> {
        [self.email_from, self.subject, self.body].into_iter().flatten()
    }
}

/// Deterministic content → token-set function.
///
/// Output is deduplicated and its order depends only on the input content.
pub trait SemanticHasher: Send + Sync {
    fn name(&self) -> &'static str;
    fn hash_words(&self, input: &HashInput<'_>) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HasherKind {
    #[default]
    Normalizing,
    Keyed,
}

impl HasherKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HasherKind::Normalizing => "normalizing",
            HasherKind::Keyed => "keyed",
        }
    }
}

impl std::str::FromStr for HasherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normalizing" => Ok(HasherKind::Normalizing),
            "keyed" => Ok(HasherKind::Keyed),
            other => Err(format!("unknown hasher '{other}'")),
        }
    }
}

fn normalized_words(input: &HashInput<'_>) -> Vec<String> {
    let words = input.fields().flat_map(|field| {
        let folded: String = field.nfkc().collect();
        extract_words(&folded)
    });
    dedup_preserving_order(words)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizingHasher;

impl SemanticHasher for NormalizingHasher {
    fn name(&self) -> &'static str {
        HasherKind::Normalizing.as_str()
    }

    fn hash_words(&self, input: &HashInput<'_>) -> Vec<String> {
        normalized_words(input)
    }
}

pub struct KeyedHasher {
    key: hmac::Key,
}

impl KeyedHasher {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    fn digest(&self, word: &str) -> String {
        let tag = hmac::sign(&self.key, word.as_bytes());
        let mut hexed = hex::encode(tag.as_ref());
        hexed.truncate(KEYED_TOKEN_HEX_LEN);
        hexed
    }
}

impl fmt::Debug for KeyedHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedHasher").finish_non_exhaustive()
    }
}

impl SemanticHasher for KeyedHasher {
    fn name(&self) -> &'static str {
        HasherKind::Keyed.as_str()
    }

    fn hash_words(&self, input: &HashInput<'_>) -> Vec<String> {
        let hashed = normalized_words(input)
            .into_iter()
            .map(|w| self.digest(&w));
        dedup_preserving_order(hashed)
    }
}
