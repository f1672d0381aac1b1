//! Per-message indexing job and the background queue that runs it.
//!
//! [`index_message`] is the unit of work: load the message and its
//! conversation, build the packed index, and write it back in a single
//! update. It never retries on its own. [`IndexQueue`] plays the role of the
//! job system: it feeds message ids to worker threads over a bounded channel
//! and applies an injected [`RetryPolicy`], retrying transient failures and
//! dead-lettering permanent ones.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::search::hasher::{HashInput, SemanticHasher};
use crate::search::index_builder::{PackedIndex, build_search_index};
use crate::storage::MessageStore;

/// Jobs buffered ahead of the workers before `enqueue` blocks.
const QUEUE_CAPACITY: usize = 64;

/// Upper bound for a single retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("message {0} not found")]
    MessageNotFound(i64),
    #[error("conversation {conversation_id} of message {message_id} not found")]
    ConversationNotFound {
        message_id: i64,
        conversation_id: i64,
    },
    /// Store unreachable, read failure, or write conflict.
    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

impl IndexError {
    /// Whether the job executor may run the job again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, IndexError::Transient(_))
    }
}

/// Build and store the search index for one message.
pub fn index_message<S: MessageStore + ?Sized>(
    store: &S,
    hasher: &dyn SemanticHasher,
    message_id: i64,
) -> Result<PackedIndex, IndexError> {
    let message = store
        .find_message(message_id)?
        .ok_or(IndexError::MessageNotFound(message_id))?;

    let conversation = store.find_conversation(message.conversation_id)?.ok_or(
        IndexError::ConversationNotFound {
            message_id,
            conversation_id: message.conversation_id,
        },
    )?;

    let body = store.ensure_cleaned_body(&message)?;

    let input = HashInput {
        email_from: conversation.email_from.as_deref(),
        subject: conversation.subject.as_deref(),
        body: Some(&body),
    };
    let packed = build_search_index(hasher, &input);

    store.write_search_index(message_id, &packed.text)?;

    debug!(
        message_id,
        conversation_id = message.conversation_id,
        hashed = packed.hashed_tokens,
        raw = packed.raw_tokens,
        dropped = packed.dropped,
        bytes = packed.text.len(),
        "indexed message"
    );

    Ok(packed)
}

/// How many times a job runs and how long to wait between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failure; doubled for each later one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `failed_attempt + 1`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let shift = failed_attempt.saturating_sub(1).min(16);
        self.backoff
            .checked_mul(1u32 << shift)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexJob {
    pub message_id: i64,
}

/// A job the queue gave up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: i64,
    pub attempts: u32,
    /// `true` for not-found failures, which are never retried.
    pub permanent: bool,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct QueueStats {
    pub succeeded: AtomicUsize,
    pub retries: AtomicUsize,
    pub dead_lettered: AtomicUsize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub succeeded: usize,
    pub retries: usize,
    pub dead_letters: Vec<DeadLetter>,
}

pub struct IndexQueue {
    tx: Option<Sender<IndexJob>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<QueueStats>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl IndexQueue {
    /// Start one worker per store. Each worker owns its store exclusively.
    pub fn spawn<S>(
        stores: Vec<S>,
        hasher: Arc<dyn SemanticHasher>,
        policy: RetryPolicy,
    ) -> Result<Self>
    where
        S: MessageStore + Send + 'static,
    {
        if stores.is_empty() {
            return Err(anyhow!("index queue needs at least one worker"));
        }

        let (tx, rx) = bounded::<IndexJob>(QUEUE_CAPACITY);
        let stats = Arc::new(QueueStats::default());
        let dead_letters = Arc::new(Mutex::new(Vec::new()));

        let workers = stores
            .into_iter()
            .enumerate()
            .map(|(worker_id, store)| {
                let rx = rx.clone();
                let hasher = Arc::clone(&hasher);
                let stats = Arc::clone(&stats);
                let dead_letters = Arc::clone(&dead_letters);
                thread::Builder::new()
                    .name(format!("index-worker-{worker_id}"))
                    .spawn(move || {
                        run_worker(worker_id, store, rx, hasher, policy, stats, dead_letters);
                    })
                    .map_err(|e| anyhow!("spawning index worker {worker_id}: {e}"))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(workers = workers.len(), ?policy, "index queue started");

        Ok(Self {
            tx: Some(tx),
            workers,
            stats,
            dead_letters,
        })
    }

    /// Queue a message for indexing. Blocks while the buffer is full.
    pub fn enqueue(&self, message_id: i64) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("index queue is shut down"))?;
        tx.send(IndexJob { message_id })
            .map_err(|_| anyhow!("index workers have exited"))
    }

    /// Stop accepting jobs, drain the buffer, and wait for the workers.
    pub fn finish(mut self) -> QueueReport {
        self.shutdown();
        QueueReport {
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            dead_letters: std::mem::take(&mut *self.dead_letters.lock()),
        }
    }

    fn shutdown(&mut self) {
        // Dropping the sender ends each worker's receive loop once drained.
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("index worker panicked");
            }
        }
    }
}

impl Drop for IndexQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<S: MessageStore>(
    worker_id: usize,
    store: S,
    rx: Receiver<IndexJob>,
    hasher: Arc<dyn SemanticHasher>,
    policy: RetryPolicy,
    stats: Arc<QueueStats>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
) {
    for job in rx.iter() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run_job(&store, hasher.as_ref(), policy, job, &stats)
        }));
        let letter = match outcome {
            Ok(letter) => letter,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(worker_id, message_id = job.message_id, "index job panicked: {reason}");
                Some(DeadLetter {
                    message_id: job.message_id,
                    attempts: 1,
                    permanent: true,
                    error: format!("indexing panicked: {reason}"),
                })
            }
        };
        if let Some(letter) = letter {
            stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
            dead_letters.lock().push(letter);
        }
    }
    debug!(worker_id, "index worker exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one job under `policy`; returns a dead letter if it never succeeded.
fn run_job<S: MessageStore + ?Sized>(
    store: &S,
    hasher: &dyn SemanticHasher,
    policy: RetryPolicy,
    job: IndexJob,
    stats: &QueueStats,
) -> Option<DeadLetter> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match index_message(store, hasher, job.message_id) {
            Ok(_) => {
                stats.succeeded.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) if !e.is_retriable() => {
                warn!(message_id = job.message_id, "dropping index job: {e}");
                return Some(DeadLetter {
                    message_id: job.message_id,
                    attempts: attempt,
                    permanent: true,
                    error: e.to_string(),
                });
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    message_id = job.message_id,
                    attempts = attempt,
                    "index job failed after retries: {e:#}"
                );
                return Some(DeadLetter {
                    message_id: job.message_id,
                    attempts: attempt,
                    permanent: false,
                    error: format!("{e:#}"),
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                debug!(
                    message_id = job.message_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying index job: {e:#}"
                );
                stats.retries.fetch_add(1, Ordering::Relaxed);
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
