use mailbox_search::model::types::{Conversation, Message};
use mailbox_search::storage::sqlite::SqliteStorage;
use tempfile::TempDir;

/// Stable timestamp for deterministic tests.
#[allow(dead_code)]
pub const BASE_TS: i64 = 1_700_000_000_000;

/// On-disk database in a temp dir; the dir lives as long as the fixture.
#[allow(dead_code)]
pub struct TestDb {
    pub dir: TempDir,
    pub storage: SqliteStorage,
}

#[allow(dead_code)]
impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let storage = SqliteStorage::open(&dir.path().join("search.db")).expect("open db");
        Self { dir, storage }
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("search.db")
    }

    pub fn mailbox(&self, slug: &str) -> i64 {
        self.storage.ensure_mailbox(slug, slug).expect("mailbox")
    }

    pub fn conversation(&self, mailbox_id: i64, from: &str, subject: &str) -> i64 {
        self.storage
            .insert_conversation(&Conversation {
                id: None,
                mailbox_id,
                email_from: Some(from.to_string()),
                subject: Some(subject.to_string()),
                created_at: Some(BASE_TS),
            })
            .expect("conversation")
    }

    pub fn message(&self, conversation_id: i64, body: &str) -> i64 {
        self.message_at(conversation_id, body, BASE_TS)
    }

    pub fn message_at(&self, conversation_id: i64, body: &str, created_at: i64) -> i64 {
        let mut msg = Message::new(conversation_id, body);
        msg.created_at = Some(created_at);
        self.storage.insert_message(&msg).expect("message")
    }
}
