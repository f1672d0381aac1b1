use mailbox_search::model::types::{Conversation, Message};
use mailbox_search::storage::MessageStore;
use mailbox_search::storage::sqlite::SqliteStorage;

fn sample_conv(mailbox_id: i64) -> Conversation {
    Conversation {
        id: None,
        mailbox_id,
        email_from: Some("ann@example.com".into()),
        subject: Some("Demo conversation".into()),
        created_at: Some(1),
    }
}

#[test]
fn schema_version_created_on_open() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db_path = tmp.path().join("store.db");
    let storage = SqliteStorage::open(&db_path).expect("open");

    assert_eq!(storage.schema_version().unwrap(), 2);

    // If meta row is removed, the getter surfaces an error.
    storage.raw().execute("DELETE FROM meta", []).unwrap();
    assert!(storage.schema_version().is_err());
}

#[test]
fn reopen_keeps_data_and_schema() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db_path = tmp.path().join("reopen.db");

    let msg_id = {
        let storage = SqliteStorage::open(&db_path).unwrap();
        let mailbox = storage.ensure_mailbox("ops", "Ops").unwrap();
        let conv = storage.insert_conversation(&sample_conv(mailbox)).unwrap();
        storage.insert_message(&Message::new(conv, "persisted")).unwrap()
    };

    let storage = SqliteStorage::open(&db_path).unwrap();
    assert_eq!(storage.schema_version().unwrap(), 2);
    let msg = storage.find_message(msg_id).unwrap().unwrap();
    assert_eq!(msg.body.as_deref(), Some("persisted"));
    assert_eq!(msg.search_index, None);
}

#[test]
fn open_creates_parent_directories() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db_path = tmp.path().join("nested/deeper/store.db");
    SqliteStorage::open(&db_path).expect("open");
    assert!(db_path.exists());
}

#[test]
fn migrates_from_v1() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db_path = tmp.path().join("v1.db");
    {
        let storage = SqliteStorage::open(&db_path).unwrap();
        storage
            .raw()
            .execute_batch(
                "DROP INDEX idx_messages_created;
                 UPDATE meta SET value = '1' WHERE key = 'schema_version';",
            )
            .unwrap();
    }

    let storage = SqliteStorage::open(&db_path).unwrap();
    assert_eq!(storage.schema_version().unwrap(), 2);
    let has_index: i64 = storage
        .raw()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_messages_created'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(has_index, 1);
}

#[test]
fn future_schema_version_is_rejected() {
    let tmp = tempfile::TempDir::new().unwrap();
    let db_path = tmp.path().join("future.db");
    {
        let storage = SqliteStorage::open(&db_path).unwrap();
        storage
            .raw()
            .execute("UPDATE meta SET value = '99' WHERE key = 'schema_version'", [])
            .unwrap();
    }
    let err = SqliteStorage::open(&db_path).err().expect("open should fail");
    assert!(err.to_string().contains("unsupported schema version 99"));
}

#[test]
fn ensure_mailbox_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let a = storage.ensure_mailbox("support", "Support").unwrap();
    let b = storage.ensure_mailbox("support", "Support Team").unwrap();
    assert_eq!(a, b);

    let mailbox = storage.find_mailbox_by_slug("support").unwrap().unwrap();
    assert_eq!(mailbox.id, Some(a));
    assert_eq!(mailbox.name, "Support Team");
    assert!(storage.find_mailbox_by_slug("missing").unwrap().is_none());
}

#[test]
fn message_requires_existing_conversation() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.insert_message(&Message::new(77, "orphan")).is_err());
}

#[test]
fn find_conversation_round_trips() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mailbox = storage.ensure_mailbox("ops", "Ops").unwrap();
    let conv_id = storage.insert_conversation(&sample_conv(mailbox)).unwrap();

    let conv = storage.find_conversation(conv_id).unwrap().unwrap();
    assert_eq!(
        conv,
        Conversation {
            id: Some(conv_id),
            ..sample_conv(mailbox)
        }
    );
    assert!(storage.find_conversation(conv_id + 1).unwrap().is_none());
}

#[test]
fn cleaned_body_is_computed_once_and_cached() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mailbox = storage.ensure_mailbox("ops", "Ops").unwrap();
    let conv = storage.insert_conversation(&sample_conv(mailbox)).unwrap();
    let id = storage
        .insert_message(&Message::new(conv, "<p>Ship <b>it</b></p>\n> quoted"))
        .unwrap();

    let msg = storage.find_message(id).unwrap().unwrap();
    assert_eq!(msg.cleaned_body, None);
    assert_eq!(storage.ensure_cleaned_body(&msg).unwrap(), "Ship it");

    let reloaded = storage.find_message(id).unwrap().unwrap();
    assert_eq!(reloaded.cleaned_body.as_deref(), Some("Ship it"));

    // A cached value wins over recomputation.
    storage
        .raw()
        .execute(
            "UPDATE messages SET cleaned_body = 'edited' WHERE id = ?",
            [id],
        )
        .unwrap();
    let edited = storage.find_message(id).unwrap().unwrap();
    assert_eq!(storage.ensure_cleaned_body(&edited).unwrap(), "edited");
}

#[test]
fn write_search_index_overwrites_whole_field() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mailbox = storage.ensure_mailbox("ops", "Ops").unwrap();
    let conv = storage.insert_conversation(&sample_conv(mailbox)).unwrap();
    let id = storage.insert_message(&Message::new(conv, "x")).unwrap();

    storage.write_search_index(id, "alpha beta").unwrap();
    assert_eq!(storage.search_index(id).unwrap().as_deref(), Some("alpha beta"));

    storage.write_search_index(id, "gamma").unwrap();
    assert_eq!(storage.search_index(id).unwrap().as_deref(), Some("gamma"));
}

#[test]
fn list_message_ids_scopes_by_mailbox() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let a = storage.ensure_mailbox("a", "A").unwrap();
    let b = storage.ensure_mailbox("b", "B").unwrap();
    let conv_a = storage.insert_conversation(&sample_conv(a)).unwrap();
    let conv_b = storage.insert_conversation(&sample_conv(b)).unwrap();
    let m1 = storage.insert_message(&Message::new(conv_a, "1")).unwrap();
    let m2 = storage.insert_message(&Message::new(conv_b, "2")).unwrap();
    let m3 = storage.insert_message(&Message::new(conv_a, "3")).unwrap();

    assert_eq!(storage.list_message_ids(None).unwrap(), vec![m1, m2, m3]);
    assert_eq!(storage.list_message_ids(Some(a)).unwrap(), vec![m1, m3]);
    assert_eq!(storage.list_message_ids(Some(b)).unwrap(), vec![m2]);
}
