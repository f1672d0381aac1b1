//! Search layer facade.
//!
//! - **[`tokenize`]**: word tokenizer shared by indexing and querying.
//! - **[`hasher`]**: semantic hashers producing exact-match tokens.
//! - **[`canonicalize`]**: message body cleanup (HTML, quoted replies, signatures).
//! - **[`index_builder`]**: packs hashed + raw tokens into the bounded `search_index`.
//! - **[`query`]**: query encoding, filters, ordering, and tenant-scoped search.

pub mod canonicalize;
pub mod hasher;
pub mod index_builder;
pub mod query;
pub mod tokenize;
