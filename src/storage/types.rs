use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by persistence backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend misconfigured (bad table name, missing path, ...)
    #[error("invalid store configuration: {0}")]
    Configuration(String),

    /// Another process has the database locked
    #[error("state database is locked by another process")]
    Locked,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Map lock-related SQLite failures to [`StoreError::Locked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return StoreError::Locked;
        }

        StoreError::Database(err)
    }
}

/// Key-value persistence for serialized feed state.
///
/// Values are opaque to the store. Both calls may fail when the backend is
/// unavailable.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Bytes stored under `key`, or `None` if nothing was stored yet.
    async fn load_state(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `state` under `key`, replacing any earlier value.
    async fn store_state(&self, key: &str, state: &[u8]) -> Result<(), StoreError>;
}

/// Backend-agnostic store settings, as read from `[stores.<name>]`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Registry name of the backend (`memory`, `sqlite`, `file`, `redis`)
    pub backend: String,
    /// Database file (sqlite) or directory (file)
    pub path: Option<PathBuf>,
    /// Connection URL (redis)
    pub url: Option<String>,
    /// Table name (sqlite) or hash key (redis)
    pub table: Option<String>,
}

impl StoreConfig {
    pub fn backend(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub(crate) fn require_url(&self) -> Result<&str, StoreError> {
        self.url.as_deref().ok_or_else(|| {
            StoreError::Configuration(format!("the {} backend requires a url", self.backend))
        })
    }

    pub(crate) fn require_path(&self) -> Result<&PathBuf, StoreError> {
        self.path.as_ref().ok_or_else(|| {
            StoreError::Configuration(format!("the {} backend requires a path", self.backend))
        })
    }
}
