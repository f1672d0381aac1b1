//! Normalized entity structs.

use serde::{Deserialize, Serialize};

/// Tenant boundary. Every search is scoped to exactly one mailbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mailbox {
    pub id: Option<i64>,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: Option<i64>,
    pub mailbox_id: i64,
    /// Sender address; indexed verbatim as a single raw token.
    pub email_from: Option<String>,
    pub subject: Option<String>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Option<i64>,
    pub conversation_id: i64,
    pub email_from: Option<String>,
    pub body: Option<String>,
    /// Output of the cleanup transform, cached once computed.
    pub cleaned_body: Option<String>,
    pub created_at: Option<i64>,
    /// Packed token string; `None` until the indexing job has run.
    pub search_index: Option<String>,
}

impl Message {
    pub fn new(conversation_id: i64, body: impl Into<String>) -> Self {
        Self {
            id: None,
            conversation_id,
            email_from: None,
            body: Some(body.into()),
            cleaned_body: None,
            created_at: None,
            search_index: None,
        }
    }
}
