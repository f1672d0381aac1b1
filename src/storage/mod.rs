//! Persistence layer.
//!
//! Indexing and search only reach the store through [`MessageStore`], so the
//! job runner and tests can swap in other backends. [`sqlite`] is the
//! shipped implementation.

pub mod sqlite;

use anyhow::Result;

use crate::model::types::{Conversation, Message};
use crate::search::query::{MatchRequest, SearchMatch};

/// Narrow read/write contract used by indexing and retrieval.
///
/// Every error returned here is treated as transient by the indexer; a
/// missing row is reported as `Ok(None)`, never as an error.
pub trait MessageStore {
    fn find_message(&self, message_id: i64) -> Result<Option<Message>>;

    fn find_conversation(&self, conversation_id: i64) -> Result<Option<Conversation>>;

    /// Return the message's cleaned body, computing and caching it if needed.
    fn ensure_cleaned_body(&self, message: &Message) -> Result<String>;

    /// Replace `messages.search_index` for one row in a single update.
    fn write_search_index(&self, message_id: i64, search_index: &str) -> Result<()>;

    /// Rows matching `request`, ordered and capped, before conversation dedup.
    fn find_matches(&self, request: &MatchRequest<'_>) -> Result<Vec<SearchMatch>>;
}
