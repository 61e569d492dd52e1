//! Builds and runs every store and feed named in a [`Config`].

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, FeedConfig};
use crate::feed::{
    create_feed, DocumentFetcher, FeedOptions, FeedSession, FetchError, ParserRegistry,
    ReqwestFetcher, SessionError,
};
use crate::storage::{StateStore, StoreError, StoreRegistry};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("store {name:?}: {source}")]
    Store {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("feed {name:?}: {source}")]
    Feed {
        name: String,
        #[source]
        source: SessionError,
    },

    #[error("feed {0:?} has no url")]
    MissingUrl(String),

    #[error("feed {feed:?} references unknown store {store:?}")]
    UnknownStore { feed: String, store: String },

    #[error("cannot build HTTP client: {0}")]
    Http(#[from] FetchError),
}

/// Named stores and feed sessions sharing one HTTP client.
#[derive(Debug)]
pub struct FeedRuntime {
    stores: BTreeMap<String, Arc<dyn StateStore>>,
    sessions: BTreeMap<String, Arc<FeedSession>>,
}

impl FeedRuntime {
    /// Build with the built-in parsers and stores and a [`ReqwestFetcher`].
    pub async fn from_config(config: &Config) -> Result<Self, RuntimeError> {
        let fetcher = Arc::new(ReqwestFetcher::new(config.http.settings())?);
        Self::build(
            config,
            &ParserRegistry::with_defaults(),
            &StoreRegistry::with_defaults(),
            fetcher,
        )
        .await
    }

    /// Builds the runtime from explicit registries and a shared fetcher.
    ///
    /// # Arguments
    ///
    /// * `config` - Parsed configuration; feeds come from [`Config::resolved_feeds`]
    /// * `parsers` - Parser registry used for `reader` names and autodetection
    /// * `store_registry` - Backend constructors for `[stores.*]`
    /// * `fetcher` - HTTP collaborator shared by every session
    ///
    /// # Returns
    ///
    /// A runtime whose sessions exist but are not started.
    ///
    /// # Behavior
    ///
    /// - Stores are created first, in name order, so feeds can reference them
    /// - Feeds without a `reader` fetch their document once for autodetection
    /// - The first failing store or feed aborts the build
    pub async fn build(
        config: &Config,
        parsers: &ParserRegistry,
        store_registry: &StoreRegistry,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Result<Self, RuntimeError> {
        let mut stores = BTreeMap::new();
        for (name, store_config) in &config.stores {
            let store = store_registry
                .create(store_config)
                .await
                .map_err(|source| RuntimeError::Store {
                    name: name.clone(),
                    source,
                })?;
            tracing::debug!(store = %name, backend = %store_config.backend, "Created state store");
            stores.insert(name.clone(), store);
        }

        let mut sessions = BTreeMap::new();
        for (name, feed) in config.resolved_feeds() {
            let options = feed_options(&name, &feed, &stores, config.event_capacity)?;
            let session = create_feed(options, feed.reader.as_deref(), parsers, fetcher.clone())
                .await
                .map_err(|source| RuntimeError::Feed {
                    name: name.clone(),
                    source,
                })?;
            sessions.insert(name, session);
        }

        Ok(Self { stores, sessions })
    }

    /// Start every session (restoring state and arming timers).
    ///
    /// Sessions start in name order. If one fails, the sessions already
    /// started are shut down again before the error is returned.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let mut started: Vec<&Arc<FeedSession>> = Vec::with_capacity(self.sessions.len());
        for (name, session) in &self.sessions {
            if let Err(source) = session.start().await {
                join_all(started.iter().map(|session| session.shutdown())).await;
                return Err(RuntimeError::Feed {
                    name: name.clone(),
                    source,
                });
            }
            started.push(session);
        }
        tracing::info!(feeds = self.sessions.len(), "Feed runtime started");
        Ok(())
    }

    pub fn session(&self, name: &str) -> Option<&Arc<FeedSession>> {
        self.sessions.get(name)
    }

    pub fn sessions(&self) -> impl Iterator<Item = (&str, &Arc<FeedSession>)> {
        self.sessions.iter().map(|(name, session)| (name.as_str(), session))
    }

    pub fn store(&self, name: &str) -> Option<&Arc<dyn StateStore>> {
        self.stores.get(name)
    }

    /// Shut every session down and wait for their drivers to exit.
    pub async fn shutdown(&self) {
        join_all(self.sessions.values().map(|session| session.shutdown())).await;
        tracing::info!("Feed runtime stopped");
    }
}

fn feed_options(
    name: &str,
    feed: &FeedConfig,
    stores: &BTreeMap<String, Arc<dyn StateStore>>,
    event_capacity: usize,
) -> Result<FeedOptions, RuntimeError> {
    let url = feed
        .url
        .clone()
        .ok_or_else(|| RuntimeError::MissingUrl(name.to_string()))?;

    let mut options = FeedOptions::new(url);
    options.interval = feed.interval();
    options.state_key = feed.state_key.clone();
    options.event_capacity = event_capacity;
    if let Some(method) = &feed.http_method {
        options.http_method = method.clone();
    }
    options.http_headers = feed
        .http_headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(store_name) = &feed.store {
        let store = stores
            .get(store_name)
            .ok_or_else(|| RuntimeError::UnknownStore {
                feed: name.to_string(),
                store: store_name.clone(),
            })?;
        options.store = Some(Arc::clone(store));
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FetchRequest, FetchedDocument, SessionState};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct UnreachableFetcher;

    #[async_trait]
    impl DocumentFetcher for UnreachableFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> Result<FetchedDocument, FetchError> {
            Err(FetchError::Timeout)
        }
    }

    async fn build(toml: &str) -> Result<FeedRuntime, RuntimeError> {
        let config = Config::parse(toml).unwrap();
        FeedRuntime::build(
            &config,
            &ParserRegistry::with_defaults(),
            &StoreRegistry::with_defaults(),
            Arc::new(UnreachableFetcher),
        )
        .await
    }

    #[tokio::test]
    async fn test_named_readers_need_no_fetch() {
        let runtime = build(
            r#"
[stores.mem]
backend = "memory"

[feeds.foo]
url = "http://example.org/rss"
reader = "rss"
store = "mem"
state_key = "foo"
interval_secs = 0

[feeds.bar]
url = "http://example.org/atom"
reader = "atom"
interval_secs = 0
"#,
        )
        .await
        .unwrap();

        assert_eq!(runtime.session("foo").unwrap().parser().name(), "rss");
        assert_eq!(runtime.session("bar").unwrap().parser().name(), "atom");
        assert!(runtime.store("mem").is_some());
        assert_eq!(runtime.sessions().count(), 2);

        runtime.start().await.unwrap();
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_start_shuts_down_started_sessions() {
        let runtime = build(
            r#"
[stores.mem]
backend = "memory"

[feeds.a]
url = "http://example.org/a"
reader = "rss"
store = "mem"
state_key = "a"
interval_secs = 60

[feeds.b]
url = "http://example.org/b"
reader = "rss"
store = "mem"
state_key = "b"
interval_secs = 60
"#,
        )
        .await
        .unwrap();
        runtime
            .store("mem")
            .unwrap()
            .store_state("b", br#"{"version":2}"#)
            .await
            .unwrap();

        let err = runtime.start().await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Feed { ref name, source: SessionError::State(_) } if name == "b"
        ));
        assert_eq!(runtime.session("a").unwrap().state(), SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_unknown_store_reference() {
        let err = build("[feeds.a]\nurl = \"http://example.org\"\nreader = \"rss\"\nstore = \"nope\"\n")
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownStore { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_missing_url() {
        let err = build("[feeds.a]\nreader = \"rss\"\n").await.unwrap_err();
        assert!(matches!(err, RuntimeError::MissingUrl(name) if name == "a"));
    }

    #[tokio::test]
    async fn test_store_without_state_key_fails_at_build() {
        let err = build(
            "[stores.mem]\nbackend = \"memory\"\n[feeds.a]\nurl = \"http://example.org\"\nreader = \"rss\"\nstore = \"mem\"\n",
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Feed {
                source: SessionError::Configuration(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_autodetect_fetch_failure_is_reported() {
        let err = build("[defaults]\nurl = \"http://example.org/feed\"\n")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Feed {
                source: SessionError::Fetch(FetchError::Timeout),
                ..
            }
        ));
    }
}
