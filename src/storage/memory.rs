use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::types::{StateStore, StoreError};

/// Process-local store. State is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_state(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.states.read().await.get(key).cloned())
    }

    async fn store_state(&self, key: &str, state: &[u8]) -> Result<(), StoreError> {
        self.states
            .write()
            .await
            .insert(key.to_string(), state.to_vec());
        Ok(())
    }
}
