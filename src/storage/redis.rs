use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::fmt;

use super::types::{StateStore, StoreError};

/// Hash holding every feed's state when the config names none.
pub const DEFAULT_HASH_KEY: &str = "feed_states";

/// Feed states as fields of one Redis hash.
///
/// The connection manager reconnects on its own. Clones share the connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    hash_key: String,
}

impl RedisStore {
    /// Connect to `url` (`redis://host:port/db`).
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL, database number included
    /// * `hash_key` - Hash the states are stored in (default [`DEFAULT_HASH_KEY`])
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if the URL is invalid or the server is unreachable.
    pub async fn open(url: &str, hash_key: Option<&str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::debug!(hash_key = hash_key.unwrap_or(DEFAULT_HASH_KEY), "Connected to Redis");
        Ok(Self::with_connection(conn, hash_key))
    }

    pub fn with_connection(conn: ConnectionManager, hash_key: Option<&str>) -> Self {
        Self {
            conn,
            hash_key: hash_key.unwrap_or(DEFAULT_HASH_KEY).to_string(),
        }
    }

    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("hash_key", &self.hash_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn load_state(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let state: Option<Vec<u8>> = conn.hget(&self.hash_key, key).await?;
        Ok(state)
    }

    async fn store_state(&self, key: &str, state: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(&self.hash_key, key, state).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Server to run against, e.g. `redis://127.0.0.1:6379/15`. Tests are skipped without it.
    fn server_url() -> Option<String> {
        std::env::var("FEEDREADER_TEST_REDIS_URL").ok()
    }

    #[tokio::test]
    async fn test_store_and_load_state() {
        let Some(url) = server_url() else {
            eprintln!("FEEDREADER_TEST_REDIS_URL not set, skipping");
            return;
        };
        let hash_key = format!("feedreader-test-{}", std::process::id());
        let store = RedisStore::open(&url, Some(&hash_key)).await.unwrap();

        assert_eq!(store.load_state("feed").await.unwrap(), None);
        store.store_state("feed", b"one").await.unwrap();
        store.store_state("feed", b"two").await.unwrap();
        store.store_state("other", b"three").await.unwrap();
        assert_eq!(store.load_state("feed").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.load_state("other").await.unwrap(), Some(b"three".to_vec()));

        let mut conn = store.conn.clone();
        let _: () = conn.del(&hash_key).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let err = RedisStore::open("not a url", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Redis(_)));
    }
}
