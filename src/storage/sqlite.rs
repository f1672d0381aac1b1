//! `SQLite` backend: schema, pragmas, migrations, and the match query.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};

use crate::model::types::{Conversation, Mailbox, Message};
use crate::search::canonicalize::clean_body;
use crate::search::query::{MatchRequest, OrderBy, SearchMatch};
use crate::storage::MessageStore;

const SCHEMA_VERSION: i64 = 2;

const MIGRATION_V1: &str = r"
CREATE TABLE IF NOT EXISTS mailboxes (
    id INTEGER PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY,
    mailbox_id INTEGER NOT NULL REFERENCES mailboxes(id) ON DELETE CASCADE,
    email_from TEXT,
    subject TEXT,
    created_at INTEGER
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    email_from TEXT,
    body TEXT,
    cleaned_body TEXT,
    created_at INTEGER,
    search_index TEXT
);

CREATE INDEX IF NOT EXISTS idx_conversations_mailbox ON conversations(mailbox_id);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
";

const MIGRATION_V2: &str = r"
-- created-at ordering and range filters
CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at);
";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, email_from, body, cleaned_body, created_at, search_index";

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating db directory {}", parent.display()))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("opening sqlite db at {}", path.display()))?;

        apply_pragmas(&mut conn)?;
        init_meta(&mut conn)?;
        migrate(&mut conn)?;

        Ok(Self { conn })
    }

    /// In-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        apply_common_pragmas(&conn)?;
        init_meta(&mut conn)?;
        migrate(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn raw(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
            )
            .optional()?
            .ok_or_else(|| anyhow!("schema_version missing"))
    }

    /// Insert the mailbox if its slug is new; return its id either way.
    pub fn ensure_mailbox(&self, slug: &str, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO mailboxes(slug, name, created_at) VALUES(?,?,?)
             ON CONFLICT(slug) DO UPDATE SET name=excluded.name",
            params![slug, name, Self::now_millis()],
        )?;

        self.conn
            .query_row(
                "SELECT id FROM mailboxes WHERE slug = ?",
                params![slug],
                |row| row.get(0),
            )
            .with_context(|| format!("fetching mailbox id for {slug}"))
    }

    pub fn find_mailbox_by_slug(&self, slug: &str) -> Result<Option<Mailbox>> {
        self.conn
            .query_row(
                "SELECT id, slug, name FROM mailboxes WHERE slug = ?",
                params![slug],
                |row| {
                    Ok(Mailbox {
                        id: Some(row.get(0)?),
                        slug: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("looking up mailbox {slug}"))
    }

    pub fn insert_conversation(&self, conv: &Conversation) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO conversations(mailbox_id, email_from, subject, created_at) VALUES(?,?,?,?)",
            params![
                conv.mailbox_id,
                conv.email_from,
                conv.subject,
                conv.created_at.unwrap_or_else(Self::now_millis)
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Store a message. Its `search_index` starts out unset.
    pub fn insert_message(&self, msg: &Message) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO messages(conversation_id, email_from, body, cleaned_body, created_at)
             VALUES(?,?,?,?,?)",
            params![
                msg.conversation_id,
                msg.email_from,
                msg.body,
                msg.cleaned_body,
                msg.created_at.unwrap_or_else(Self::now_millis)
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Message ids in ascending order, optionally limited to one mailbox.
    pub fn list_message_ids(&self, mailbox_id: Option<i64>) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE (?1 IS NULL OR c.mailbox_id = ?1)
             ORDER BY m.id",
        )?;
        let rows = stmt.query_map(params![mailbox_id], |row| row.get(0))?;
        let mut out = Vec::new();
        for id in rows {
            out.push(id?);
        }
        Ok(out)
    }

    pub fn search_index(&self, message_id: i64) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT search_index FROM messages WHERE id = ?",
                params![message_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten())
    }

    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

impl MessageStore for SqliteStorage {
    fn find_message(&self, message_id: i64) -> Result<Option<Message>> {
        self.conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"),
                params![message_id],
                message_from_row,
            )
            .optional()
            .with_context(|| format!("loading message {message_id}"))
    }

    fn find_conversation(&self, conversation_id: i64) -> Result<Option<Conversation>> {
        self.conn
            .query_row(
                "SELECT id, mailbox_id, email_from, subject, created_at
                 FROM conversations WHERE id = ?",
                params![conversation_id],
                |row| {
                    Ok(Conversation {
                        id: Some(row.get(0)?),
                        mailbox_id: row.get(1)?,
                        email_from: row.get(2)?,
                        subject: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("loading conversation {conversation_id}"))
    }

    fn ensure_cleaned_body(&self, message: &Message) -> Result<String> {
        if let Some(cleaned) = &message.cleaned_body {
            return Ok(cleaned.clone());
        }

        let cleaned = clean_body(message.body.as_deref().unwrap_or_default());
        if let Some(id) = message.id {
            self.conn
                .execute(
                    "UPDATE messages SET cleaned_body = ? WHERE id = ? AND cleaned_body IS NULL",
                    params![cleaned, id],
                )
                .with_context(|| format!("caching cleaned body for message {id}"))?;
        }
        Ok(cleaned)
    }

    fn write_search_index(&self, message_id: i64, search_index: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE messages SET search_index = ? WHERE id = ?",
                params![search_index, message_id],
            )
            .with_context(|| format!("writing search index for message {message_id}"))?;
        Ok(())
    }

    fn find_matches(&self, request: &MatchRequest<'_>) -> Result<Vec<SearchMatch>> {
        let (sql, values) = build_match_query(request);
        debug!(sql = %sql, params = values.len(), "match_query");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(SearchMatch {
                message_id: row.get(0)?,
                conversation_id: row.get(1)?,
                cleaned_body: row.get(2)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Compile a [`MatchRequest`] into SQL plus positional parameters.
///
/// Tokens are bound once as a JSON array and expanded with `json_each`, so
/// the statement shape does not grow with the query. They are compared with
/// `instr` on space-padded strings, i.e. literally (no LIKE wildcards,
/// case-sensitive):
/// - exact: `' ' || index || ' '` contains `' ' || token || ' '`, for all tokens
/// - prefix: `' ' || index` contains `' ' || token`, for any token
///
/// An empty array makes the exact arm vacuously true.
pub(crate) fn build_match_query(request: &MatchRequest<'_>) -> (String, Vec<Value>) {
    let tokens_json = serde_json::Value::from(request.tokens.tokens().to_vec()).to_string();
    let mut values: Vec<Value> = vec![
        Value::Integer(request.mailbox_id),
        Value::Text(tokens_json.clone()),
        Value::Text(tokens_json),
    ];

    let mut sql = String::from(
        "SELECT m.id, m.conversation_id, m.cleaned_body
         FROM messages m
         JOIN conversations c ON c.id = m.conversation_id
         WHERE c.mailbox_id = ?
           AND m.search_index IS NOT NULL
           AND (NOT EXISTS (SELECT 1 FROM json_each(?) q
                            WHERE instr(' ' || m.search_index || ' ', ' ' || q.value || ' ') = 0)
                OR EXISTS (SELECT 1 FROM json_each(?) q
                           WHERE instr(' ' || m.search_index, ' ' || q.value) > 0))",
    );

    let filters = request.filters;
    if !filters.conversation_ids.is_empty() {
        sql.push_str(&format!(
            " AND m.conversation_id IN ({})",
            placeholders(filters.conversation_ids.len())
        ));
        values.extend(filters.conversation_ids.iter().map(|id| Value::Integer(*id)));
    }
    if !filters.exclude_conversation_ids.is_empty() {
        sql.push_str(&format!(
            " AND m.conversation_id NOT IN ({})",
            placeholders(filters.exclude_conversation_ids.len())
        ));
        values.extend(
            filters
                .exclude_conversation_ids
                .iter()
                .map(|id| Value::Integer(*id)),
        );
    }
    if let Some(from) = filters.created_from {
        sql.push_str(" AND m.created_at >= ?");
        values.push(Value::Integer(from));
    }
    if let Some(to) = filters.created_to {
        sql.push_str(" AND m.created_at <= ?");
        values.push(Value::Integer(to));
    }

    sql.push_str(" ORDER BY ");
    sql.push_str(order_clause(request.order_by));
    sql.push_str(" LIMIT ?");
    values.push(Value::Integer(request.limit as i64));

    (sql, values)
}

fn order_clause(order_by: OrderBy) -> &'static str {
    match order_by {
        OrderBy::NewestFirst => "m.id DESC",
        OrderBy::OldestFirst => "m.id ASC",
        OrderBy::CreatedAtDesc => "m.created_at DESC, m.id DESC",
        OrderBy::CreatedAtAsc => "m.created_at ASC, m.id ASC",
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: Some(row.get(0)?),
        conversation_id: row.get(1)?,
        email_from: row.get(2)?,
        body: row.get(3)?,
        cleaned_body: row.get(4)?,
        created_at: row.get(5)?,
        search_index: row.get(6)?,
    })
}

fn apply_pragmas(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;
    apply_common_pragmas(conn)
}

fn apply_common_pragmas(conn: &Connection) -> Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        r"
        PRAGMA temp_store = MEMORY;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

fn init_meta(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?;

    if existing.is_none() {
        // Start at version 0 so migrate() applies full schema on first open.
        conn.execute(
            "INSERT INTO meta(key, value) VALUES('schema_version', '0')",
            [],
        )?;
    }

    Ok(())
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?
        .unwrap_or(0);

    if current == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;

    match current {
        0 => {
            tx.execute_batch(MIGRATION_V1)?;
            tx.execute_batch(MIGRATION_V2)?;
        }
        1 => {
            tx.execute_batch(MIGRATION_V2)?;
        }
        v => return Err(anyhow!("unsupported schema version {v}")),
    }

    tx.execute(
        "UPDATE meta SET value = ? WHERE key = 'schema_version'",
        params![SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()?;

    info!(from = current, to = SCHEMA_VERSION, "migrated sqlite schema");

    Ok(())
}
