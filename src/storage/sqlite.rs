use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

use super::types::{StateStore, StoreError};

/// Table used when none is configured.
pub const DEFAULT_TABLE: &str = "feed_states";

/// Feed state rows in a SQLite table: `(id, state, updated_at)`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the table exists.
    pub async fn open(path: &str, table: Option<&str>) -> Result<Self, StoreError> {
        let table = table.unwrap_or(DEFAULT_TABLE);
        validate_table_name(table)?;

        let url = format!("sqlite:{}?mode=rwc", path);
        // busy_timeout=5000: wait up to 5 seconds for another writer
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        Self::with_pool(pool, table).await
    }

    /// Use an existing pool. The pool's settings are not changed.
    pub async fn with_pool(pool: SqlitePool, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        // Table name is validated, so interpolation is safe
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                state BLOB NOT NULL,
                updated_at TEXT
            )
        "#,
            self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load_state(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as(&format!("SELECT state FROM {} WHERE id = ?", self.table))
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;

        Ok(row.map(|(state,)| state))
    }

    async fn store_state(&self, key: &str, state: &[u8]) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, state, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
        "#,
            self.table
        ))
        .bind(key)
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }
}

/// Accept only plain SQL identifiers: `[A-Za-z_][A-Za-z0-9_]*`, at most 64 chars.
fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && table.len() <= 64 {
        Ok(())
    } else {
        Err(StoreError::Configuration(format!(
            "invalid table name: {table:?}"
        )))
    }
}
