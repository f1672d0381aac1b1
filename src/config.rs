//! Runtime configuration.
//!
//! Settings come from `<data_dir>/config.toml` when it exists, then
//! environment variables (read through `dotenvy`, so a `.env` file works
//! too) override individual keys. The index budget and the result cap are
//! fixed constants.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::indexer::RetryPolicy;
use crate::search::hasher::{HasherKind, KeyedHasher, NormalizingHasher, SemanticHasher};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "mailbox_search.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("keyed hasher selected but no hash key configured (set MBSEARCH_HASH_KEY)")]
    MissingHashKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Database path; defaults to `<data_dir>/mailbox_search.db`.
    pub db_path: Option<PathBuf>,
    pub hasher: HasherKind,
    /// Secret for [`HasherKind::Keyed`]. Changing it invalidates every
    /// stored index, so a full reindex must follow.
    pub hash_key: Option<String>,
    /// Background indexing worker threads.
    pub workers: usize,
    /// Attempts per indexing job before it is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            hasher: HasherKind::Normalizing,
            hash_key: None,
            workers: 4,
            max_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl SearchConfig {
    /// Load `config.toml` from `data_dir` (if present) and apply env overrides.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut cfg = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse { path, source })?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Override fields from `MBSEARCH_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env(&mut self) {
        if let Ok(path) = dotenvy::var("MBSEARCH_DB") {
            self.db_path = Some(PathBuf::from(path));
        }

        if let Ok(val) = dotenvy::var("MBSEARCH_HASHER") {
            match val.parse() {
                Ok(kind) => self.hasher = kind,
                Err(e) => warn!(value = %val, "ignoring MBSEARCH_HASHER: {e}"),
            }
        }

        if let Ok(key) = dotenvy::var("MBSEARCH_HASH_KEY")
            && !key.is_empty()
        {
            self.hash_key = Some(key);
        }

        if let Ok(val) = dotenvy::var("MBSEARCH_WORKERS") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => self.workers = n,
                _ => warn!(value = %val, "ignoring MBSEARCH_WORKERS"),
            }
        }

        if let Ok(val) = dotenvy::var("MBSEARCH_MAX_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => self.max_attempts = n,
                _ => warn!(value = %val, "ignoring MBSEARCH_MAX_ATTEMPTS"),
            }
        }

        if let Ok(val) = dotenvy::var("MBSEARCH_RETRY_BACKOFF_MS") {
            match val.parse() {
                Ok(ms) => self.retry_backoff_ms = ms,
                Err(_) => warn!(value = %val, "ignoring MBSEARCH_RETRY_BACKOFF_MS"),
            }
        }
    }

    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| data_dir.join(DB_FILE_NAME))
    }

    pub fn build_hasher(&self) -> Result<Arc<dyn SemanticHasher>, ConfigError> {
        match self.hasher {
            HasherKind::Normalizing => Ok(Arc::new(NormalizingHasher)),
            HasherKind::Keyed => {
                let key = self
                    .hash_key
                    .as_deref()
                    .filter(|k| !k.is_empty())
                    .ok_or(ConfigError::MissingHashKey)?;
                Ok(Arc::new(KeyedHasher::new(key.as_bytes())))
            }
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}
