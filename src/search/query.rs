use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use itertools::Itertools;
use serde::Serialize;

use crate::search::hasher::{HashInput, SemanticHasher};
use crate::storage::MessageStore;
use crate::storage::sqlite::SqliteStorage;

/// Rows fetched from the store before conversation dedup.
pub const MAX_SEARCH_RESULTS: usize = 1000;

/// Hashed representation of the search input.
///
/// Produced by the same hasher as the indexed content, from the `body`
/// channel only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTokens(Vec<String>);

impl QueryTokens {
    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Space-joined form, mirroring the stored `search_index` layout.
    pub fn as_index_string(&self) -> String {
        self.0.join(" ")
    }
}

pub fn encode_query(hasher: &dyn SemanticHasher, keywords: &str) -> QueryTokens {
    QueryTokens(hasher.hash_words(&HashInput::body(keywords)))
}

/// Extra predicates, applied conjunctively with the keyword match.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict to these conversations (empty = no restriction).
    pub conversation_ids: BTreeSet<i64>,
    pub exclude_conversation_ids: BTreeSet<i64>,
    pub created_from: Option<i64>,
    pub created_to: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OrderBy {
    /// Descending message id (insertion recency).
    #[default]
    #[value(name = "newest")]
    NewestFirst,
    #[value(name = "oldest")]
    OldestFirst,
    #[value(name = "created-desc")]
    CreatedAtDesc,
    #[value(name = "created-asc")]
    CreatedAtAsc,
}

/// Everything a store needs to run the match query.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    pub mailbox_id: i64,
    pub tokens: &'a QueryTokens,
    pub filters: &'a SearchFilters,
    pub order_by: OrderBy,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    pub message_id: i64,
    pub conversation_id: i64,
    pub cleaned_body: Option<String>,
}

/// Keep the first match per conversation, preserving order.
pub fn dedup_by_conversation(matches: Vec<SearchMatch>) -> Vec<SearchMatch> {
    matches
        .into_iter()
        .unique_by(|m| m.conversation_id)
        .collect()
}

/// Keyword search scoped to one mailbox.
///
/// A row matches when its index contains every query token exactly, or when
/// any of its tokens starts with any query token. An empty keyword string
/// encodes to no tokens, which every indexed row trivially contains.
pub fn search_messages<S: MessageStore + ?Sized>(
    store: &S,
    hasher: &dyn SemanticHasher,
    keywords: &str,
    mailbox_id: i64,
    filters: &SearchFilters,
    order_by: OrderBy,
) -> Result<Vec<SearchMatch>> {
    let tokens = encode_query(hasher, keywords);
    let request = MatchRequest {
        mailbox_id,
        tokens: &tokens,
        filters,
        order_by,
        limit: MAX_SEARCH_RESULTS,
    };

    let rows = store.find_matches(&request)?;
    let fetched = rows.len();
    let matches = dedup_by_conversation(rows);

    tracing::debug!(
        mailbox_id,
        query_tokens = tokens.tokens().len(),
        fetched,
        returned = matches.len(),
        "search_done"
    );

    Ok(matches)
}

/// Search handle bundling a store with the hasher it was indexed with.
pub struct SearchClient {
    sqlite: SqliteStorage,
    hasher: Arc<dyn SemanticHasher>,
}

impl SearchClient {
    pub fn new(sqlite: SqliteStorage, hasher: Arc<dyn SemanticHasher>) -> Self {
        Self { sqlite, hasher }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.sqlite
    }

    pub fn search(
        &self,
        keywords: &str,
        mailbox_id: i64,
        filters: &SearchFilters,
        order_by: OrderBy,
    ) -> Result<Vec<SearchMatch>> {
        tracing::info!(
            hasher = self.hasher.name(),
            mailbox_id,
            query = keywords,
            "search_start"
        );
        search_messages(
            &self.sqlite,
            self.hasher.as_ref(),
            keywords,
            mailbox_id,
            filters,
            order_by,
        )
    }
}
