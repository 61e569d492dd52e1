use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::file::FileStore;
use super::memory::MemoryStore;
use super::redis::RedisStore;
use super::sqlite::SqliteStore;
use super::types::{StateStore, StoreConfig, StoreError};

type StoreFactory =
    Box<dyn Fn(StoreConfig) -> BoxFuture<'static, Result<Arc<dyn StateStore>, StoreError>> + Send + Sync>;

/// Maps backend names to store constructors.
pub struct StoreRegistry {
    factories: BTreeMap<String, StoreFactory>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with `memory`, `sqlite`, `file` and `redis`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |_config| {
            async { Ok(Arc::new(MemoryStore::new()) as Arc<dyn StateStore>) }.boxed()
        });
        registry.register("sqlite", |config| {
            async move {
                let path = config.require_path()?.to_string_lossy().into_owned();
                let store = SqliteStore::open(&path, config.table.as_deref()).await?;
                Ok::<_, StoreError>(Arc::new(store) as Arc<dyn StateStore>)
            }
            .boxed()
        });
        registry.register("file", |config| {
            async move {
                let store = FileStore::open(config.require_path()?.clone()).await?;
                Ok::<_, StoreError>(Arc::new(store) as Arc<dyn StateStore>)
            }
            .boxed()
        });
        registry.register("redis", |config| {
            async move {
                let store = RedisStore::open(config.require_url()?, config.table.as_deref()).await?;
                Ok::<_, StoreError>(Arc::new(store) as Arc<dyn StateStore>)
            }
            .boxed()
        });
        registry
    }

    pub fn register<F>(&mut self, backend: impl Into<String>, factory: F)
    where
        F: Fn(StoreConfig) -> BoxFuture<'static, Result<Arc<dyn StateStore>, StoreError>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(backend.into(), Box::new(factory));
    }

    /// Construct the store `config.backend` names.
    pub async fn create(&self, config: &StoreConfig) -> Result<Arc<dyn StateStore>, StoreError> {
        let factory = self.factories.get(&config.backend).ok_or_else(|| {
            StoreError::Configuration(format!("unknown store backend {:?}", config.backend))
        })?;
        factory(config.clone()).await
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
