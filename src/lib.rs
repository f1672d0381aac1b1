pub mod config;
pub mod indexer;
pub mod model;
pub mod search;
pub mod storage;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::json;

use config::SearchConfig;
use indexer::{IndexQueue, index_message};
use model::types::{Conversation, Message};
use search::hasher::{HasherKind, SemanticHasher};
use search::query::{OrderBy, SearchClient, SearchFilters};
use storage::MessageStore;
use storage::sqlite::SqliteStorage;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "mbsearch",
    version,
    about = "Tenant-scoped keyword search over stored email messages"
)]
pub struct Cli {
    /// Path to the SQLite database (defaults to <data-dir>/mailbox_search.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Override data dir (config.toml + database). Defaults to platform data dir.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Token hasher; must match the one the index was built with
    #[arg(long, global = true, value_enum)]
    pub hasher: Option<HasherKind>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or migrate the database
    Init,
    /// Store a message (creating mailbox/conversation as needed) and index it
    Ingest {
        /// Mailbox slug
        #[arg(long)]
        mailbox: String,

        /// Display name used when the mailbox is created
        #[arg(long)]
        mailbox_name: Option<String>,

        /// Append to an existing conversation instead of starting one
        #[arg(long)]
        conversation: Option<i64>,

        /// Sender address of a new conversation
        #[arg(long)]
        from: Option<String>,

        /// Subject of a new conversation
        #[arg(long)]
        subject: Option<String>,

        #[arg(long)]
        body: String,

        /// Store only; leave the message unindexed
        #[arg(long, default_value_t = false)]
        no_index: bool,
    },
    /// Build the search index for one message
    Index { message_id: i64 },
    /// Rebuild the search index for every message through the job queue
    Reindex {
        /// Limit to one mailbox slug
        #[arg(long)]
        mailbox: Option<String>,

        /// Worker threads (overrides config)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Search a mailbox by keywords
    Search {
        keywords: String,

        /// Mailbox slug
        #[arg(long)]
        mailbox: String,

        #[arg(long, value_enum, default_value_t = OrderBy::NewestFirst)]
        order: OrderBy,

        /// Restrict to these conversation ids
        #[arg(long = "conversation")]
        conversations: Vec<i64>,

        /// Emit JSON instead of tab-separated lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "mbsearch", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let mut cfg = SearchConfig::load(&data_dir)?;
    if let Some(db) = cli.db.clone() {
        cfg.db_path = Some(db);
    }
    if let Some(kind) = cli.hasher {
        cfg.hasher = kind;
    }
    let db_path = cfg.db_path(&data_dir);

    match cli.command {
        Commands::Init => {
            let storage = SqliteStorage::open(&db_path)?;
            println!(
                "{}",
                json!({
                    "db": db_path.display().to_string(),
                    "schema_version": storage.schema_version()?,
                })
            );
            Ok(())
        }
        Commands::Ingest {
            mailbox,
            mailbox_name,
            conversation,
            from,
            subject,
            body,
            no_index,
        } => {
            let storage = SqliteStorage::open(&db_path)?;
            let hasher = cfg.build_hasher()?;
            let ingest = IngestArgs {
                mailbox: &mailbox,
                mailbox_name: mailbox_name.as_deref(),
                conversation,
                from,
                subject,
                body,
            };
            run_ingest(&storage, hasher.as_ref(), ingest, !no_index)
        }
        Commands::Index { message_id } => {
            let storage = SqliteStorage::open(&db_path)?;
            let hasher = cfg.build_hasher()?;
            let packed = index_message(&storage, hasher.as_ref(), message_id)?;
            println!(
                "{}",
                json!({
                    "message_id": message_id,
                    "bytes": packed.text.len(),
                    "hashed_tokens": packed.hashed_tokens,
                    "raw_tokens": packed.raw_tokens,
                    "dropped": packed.dropped,
                })
            );
            Ok(())
        }
        Commands::Reindex { mailbox, workers } => {
            if let Some(n) = workers {
                cfg.workers = n.max(1);
            }
            run_reindex(&db_path, &cfg, mailbox.as_deref())
        }
        Commands::Search {
            keywords,
            mailbox,
            order,
            conversations,
            json,
        } => {
            let storage = SqliteStorage::open(&db_path)?;
            let mailbox_id = resolve_mailbox(&storage, &mailbox)?;
            let filters = SearchFilters {
                conversation_ids: conversations.into_iter().collect::<BTreeSet<_>>(),
                ..SearchFilters::default()
            };
            let client = SearchClient::new(storage, cfg.build_hasher()?);
            let matches = client.search(&keywords, mailbox_id, &filters, order)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else {
                for m in &matches {
                    println!(
                        "{}\t{}\t{}",
                        m.message_id,
                        m.conversation_id,
                        m.cleaned_body.as_deref().unwrap_or_default()
                    );
                }
            }
            Ok(())
        }
        // Handled above, before any config is loaded.
        Commands::Completions { .. } => Ok(()),
    }
}

struct IngestArgs<'a> {
    mailbox: &'a str,
    mailbox_name: Option<&'a str>,
    conversation: Option<i64>,
    from: Option<String>,
    subject: Option<String>,
    body: String,
}

fn run_ingest(
    storage: &SqliteStorage,
    hasher: &dyn SemanticHasher,
    args: IngestArgs<'_>,
    index: bool,
) -> Result<()> {
    let mailbox_id =
        storage.ensure_mailbox(args.mailbox, args.mailbox_name.unwrap_or(args.mailbox))?;

    let conversation_id = match args.conversation {
        Some(id) => {
            let conv = storage
                .find_conversation(id)?
                .ok_or_else(|| anyhow!("conversation {id} not found"))?;
            if conv.mailbox_id != mailbox_id {
                bail!("conversation {id} does not belong to mailbox {}", args.mailbox);
            }
            id
        }
        None => storage.insert_conversation(&Conversation {
            id: None,
            mailbox_id,
            email_from: args.from.clone(),
            subject: args.subject,
            created_at: None,
        })?,
    };

    let mut message = Message::new(conversation_id, args.body);
    message.email_from = args.from;
    let message_id = storage.insert_message(&message)?;

    if index {
        index_message(storage, hasher, message_id)?;
    }

    println!(
        "{}",
        json!({
            "mailbox_id": mailbox_id,
            "conversation_id": conversation_id,
            "message_id": message_id,
            "indexed": index,
        })
    );
    Ok(())
}

fn run_reindex(db_path: &Path, cfg: &SearchConfig, mailbox: Option<&str>) -> Result<()> {
    let storage = SqliteStorage::open(db_path)?;
    let mailbox_id = mailbox
        .map(|slug| resolve_mailbox(&storage, slug))
        .transpose()?;
    let ids = storage.list_message_ids(mailbox_id)?;
    drop(storage);

    let hasher: Arc<dyn SemanticHasher> = cfg.build_hasher()?;
    let stores = (0..cfg.workers.max(1))
        .map(|_| SqliteStorage::open(db_path))
        .collect::<Result<Vec<_>>>()?;
    let queue = IndexQueue::spawn(stores, hasher, cfg.retry_policy())?;

    for id in &ids {
        queue.enqueue(*id)?;
    }
    let report = queue.finish();

    println!(
        "{}",
        json!({
            "queued": ids.len(),
            "succeeded": report.succeeded,
            "retries": report.retries,
            "dead_letters": report.dead_letters.iter().map(|d| json!({
                "message_id": d.message_id,
                "attempts": d.attempts,
                "permanent": d.permanent,
                "error": d.error,
            })).collect::<Vec<_>>(),
        })
    );
    Ok(())
}

fn resolve_mailbox(storage: &SqliteStorage, slug: &str) -> Result<i64> {
    storage
        .find_mailbox_by_slug(slug)?
        .and_then(|m| m.id)
        .with_context(|| format!("unknown mailbox '{slug}'"))
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "mailbox-search", "mailbox-search")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".mailbox-search"))
}
