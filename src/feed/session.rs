use reqwest::header::{HeaderName, HeaderValue, ACCEPT};
use reqwest::Method;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::{FeedEvents, DEFAULT_EVENT_CAPACITY};
use super::fetcher::{DocumentFetcher, FetchError, FetchRequest};
use super::parser::{FeedParser, ParseError};
use super::scheduler;
use super::snapshot::{FeedMetadata, FeedSnapshot, StateError};
use crate::storage::{StateStore, StoreError};

// ============================================================================
// Errors
// ============================================================================

/// Errors that prevent a session from being created or started.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Persisted state could not be decoded (including version mismatches)
    #[error("cannot restore feed state: {0}")]
    State(#[from] StateError),

    #[error("cannot load feed state: {0}")]
    Store(#[from] StoreError),

    /// No registered parser accepted the document
    #[error("no parser accepts the document at {url}: {}", format_reasons(.reasons))]
    Detection {
        url: String,
        reasons: Vec<(String, String)>,
    },

    /// The document needed for autodetection could not be fetched
    #[error("cannot fetch document for autodetection: {0}")]
    Fetch(#[from] FetchError),

    #[error("unknown reader {0:?}")]
    UnknownReader(String),

    #[error("session has been shut down")]
    ShutDown,
}

fn format_reasons(reasons: &[(String, String)]) -> String {
    reasons
        .iter()
        .map(|(parser, reason)| format!("{parser}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why one update cycle did not complete. Contained to that cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    /// Persisting the snapshot failed; the in-memory snapshot is already updated
    #[error("persisting state failed: {0}")]
    Store(#[from] StoreError),

    #[error("serializing state failed: {0}")]
    State(#[from] StateError),

    #[error("cycle cancelled")]
    Cancelled,
}

// ============================================================================
// Options
// ============================================================================

/// Everything needed to set up one feed session.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub url: String,
    /// Poll interval. `None` or zero disables the driver loop
    pub interval: Option<Duration>,
    pub store: Option<Arc<dyn StateStore>>,
    /// Key under which the snapshot is stored. Required when `store` is set
    pub state_key: Option<String>,
    pub http_method: String,
    pub http_headers: Vec<(String, String)>,
    /// Buffer size of each broadcast channel
    pub event_capacity: usize,
}

impl FeedOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            interval: None,
            store: None,
            state_key: None,
            http_method: "GET".to_string(),
            http_headers: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>, state_key: impl Into<String>) -> Self {
        self.store = Some(store);
        self.state_key = Some(state_key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.push((name.into(), value.into()));
        self
    }

    /// Validate URL, method and headers into a request.
    pub(crate) fn fetch_request(&self) -> Result<FetchRequest, SessionError> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| SessionError::Configuration(format!("invalid feed URL {:?}: {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SessionError::Configuration(format!(
                "unsupported URL scheme {:?} (expected http or https)",
                url.scheme()
            )));
        }

        let method = Method::from_bytes(self.http_method.to_ascii_uppercase().as_bytes())
            .map_err(|_| {
                SessionError::Configuration(format!("invalid HTTP method {:?}", self.http_method))
            })?;

        let mut request = FetchRequest::get(self.url.clone());
        request.method = method;
        for (name, value) in &self.http_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                SessionError::Configuration(format!("invalid HTTP header name {name:?}"))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                SessionError::Configuration(format!("invalid value for HTTP header {name:?}"))
            })?;
            request.headers.append(header_name, header_value);
        }
        Ok(request)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Outcome of one completed update cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub metadata_changed: bool,
    /// Entries dispatched as discovered
    pub discovered: usize,
    /// Known ids absent from this document (never pruned)
    pub obsolete: usize,
    pub persisted: bool,
}

/// Lifecycle position of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Cancelled,
}

/// One feed: its URL, schedule, snapshot and the update cycle over them.
///
/// At most one cycle runs at a time; the driver loop and manual
/// [`FeedSession::update`] calls share a cycle lock.
#[derive(Debug)]
pub struct FeedSession {
    url: Arc<str>,
    interval: Option<Duration>,
    request: FetchRequest,
    fetcher: Arc<dyn DocumentFetcher>,
    parser: Arc<dyn FeedParser>,
    store: Option<(Arc<dyn StateStore>, String)>,
    snapshot: RwLock<FeedSnapshot>,
    cycle_lock: Mutex<()>,
    events: FeedEvents,
    cancel: CancellationToken,
    started: AtomicBool,
    driver: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FeedSession {
    /// Validate `options` and build an idle session with an empty snapshot.
    ///
    /// A fetch `Accept` header is filled in from the parser when the options
    /// do not set one.
    pub fn new(
        options: FeedOptions,
        parser: Arc<dyn FeedParser>,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Result<Self, SessionError> {
        let mut request = options.fetch_request()?;
        if let Some(accept) = parser.accept().and_then(|a| HeaderValue::from_str(a).ok()) {
            request.set_default_header(ACCEPT, accept);
        }

        let store = match (options.store, options.state_key) {
            (Some(store), Some(key)) => Some((store, key)),
            (Some(_), None) => {
                return Err(SessionError::Configuration(
                    "a state store is configured but no state key was given".to_string(),
                ))
            }
            (None, _) => None,
        };

        Ok(Self {
            url: Arc::from(options.url),
            interval: options.interval.filter(|i| !i.is_zero()),
            request,
            fetcher,
            parser,
            store,
            snapshot: RwLock::new(FeedSnapshot::default()),
            cycle_lock: Mutex::new(()),
            events: FeedEvents::new(options.event_capacity),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            driver: std::sync::Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn parser(&self) -> &Arc<dyn FeedParser> {
        &self.parser
    }

    pub fn events(&self) -> &FeedEvents {
        &self.events
    }

    pub async fn metadata(&self) -> FeedMetadata {
        self.snapshot.read().await.metadata.clone()
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        self.snapshot.read().await.clone()
    }

    pub fn state(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            SessionState::Cancelled
        } else if self.cycle_lock.try_lock().is_err() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    /// Restores persisted state, then arms the driver loop if an interval is set.
    ///
    /// # Errors
    ///
    /// - [`SessionError::State`]: the stored payload is unreadable or has an
    ///   unsupported version. The snapshot stays empty and no timer is armed.
    /// - [`SessionError::Store`]: the store could not be read
    /// - [`SessionError::ShutDown`]: the session was already shut down
    ///
    /// # Behavior
    ///
    /// - The first timed cycle runs one interval after `start` returns
    /// - Calling `start` again after success is a no-op
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::ShutDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.restore().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        if let Some(interval) = self.interval {
            let handle = scheduler::spawn_driver(Arc::downgrade(self), interval, self.cancel.clone());
            *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        tracing::info!(
            feed = %self.url,
            parser = %self.parser.name(),
            interval_secs = ?self.interval.map(|i| i.as_secs()),
            "Feed session started"
        );
        Ok(())
    }

    async fn restore(&self) -> Result<(), SessionError> {
        let Some((store, key)) = &self.store else {
            return Ok(());
        };
        let _cycle = self.cycle_lock.lock().await;

        match store.load_state(key).await? {
            Some(bytes) => {
                let mut snapshot = self.snapshot.write().await;
                snapshot.restore(&bytes)?;
                tracing::info!(
                    feed = %self.url,
                    key = %key,
                    known_entries = snapshot.seen_entry_ids.len(),
                    "Restored feed state"
                );
            }
            None => tracing::debug!(feed = %self.url, key = %key, "No stored state"),
        }
        Ok(())
    }

    /// Runs one fetch, parse, diff, notify and persist cycle.
    ///
    /// Safe to call alongside the driver loop: cycles of one session never
    /// overlap, a second caller waits for the running cycle to finish.
    ///
    /// # Returns
    ///
    /// A [`CycleReport`] with the number of entries dispatched, whether metadata
    /// changed and whether state was persisted.
    ///
    /// # Errors
    ///
    /// - [`CycleError::Fetch`] / [`CycleError::Parse`]: nothing changed in memory
    /// - [`CycleError::Store`]: events were dispatched and memory is ahead of the store
    /// - [`CycleError::Cancelled`]: the session was shut down before or during the cycle
    ///
    /// # Behavior
    ///
    /// - Metadata changes are dispatched as one event before any entry event
    /// - Entries are dispatched in document order; known ids are skipped
    /// - The snapshot is mutated only after fetch and parse succeed
    /// - State is persisted only when something new was seen and a store is set
    pub async fn update(&self) -> Result<CycleReport, CycleError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CycleError::Cancelled),
            result = self.run_cycle() => result,
        }
    }

    async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let _cycle = self.cycle_lock.lock().await;

        let document = self.fetcher.fetch(&self.request).await?;
        let parsed = self.parser.parse_document(&document.body)?;

        let mut report = CycleReport::default();
        // No suspension point between the first mutation and the serialization
        let state = {
            let mut snapshot = self.snapshot.write().await;

            let changes = snapshot.metadata.diff(&parsed.metadata);
            if !changes.is_empty() {
                snapshot.metadata.apply(&changes);
                report.metadata_changed = true;
                self.events.metadata_changed(&self.url, changes);
            }

            let mut newly_seen: HashSet<String> = HashSet::new();
            let mut in_document: HashSet<String> = HashSet::new();
            for entry in parsed.entries {
                if entry.id.trim().is_empty() {
                    tracing::warn!(feed = %self.url, "Dropping entry without an identifier");
                    continue;
                }
                in_document.insert(entry.id.clone());
                if snapshot.seen_entry_ids.contains(&entry.id) || newly_seen.contains(&entry.id) {
                    continue;
                }
                newly_seen.insert(entry.id.clone());
                self.events.entry_discovered(&self.url, entry);
            }

            report.discovered = newly_seen.len();
            report.obsolete = snapshot.seen_entry_ids.difference(&in_document).count();
            snapshot.seen_entry_ids.extend(newly_seen);

            let dirty = report.discovered > 0 || report.metadata_changed;
            match &self.store {
                Some(_) if dirty => Some(snapshot.to_bytes()?),
                _ => None,
            }
        };

        if let (Some(bytes), Some((store, key))) = (state, &self.store) {
            store.store_state(key, &bytes).await?;
            report.persisted = true;
        }

        tracing::debug!(
            feed = %self.url,
            discovered = report.discovered,
            obsolete = report.obsolete,
            metadata_changed = report.metadata_changed,
            persisted = report.persisted,
            "Feed cycle complete"
        );
        Ok(report)
    }

    /// Cancel the driver loop and any in-flight cycle, then wait for the driver to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(feed = %self.url, error = %e, "Feed driver task failed");
            }
        }
        tracing::info!(feed = %self.url, "Feed session stopped");
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fetcher::FetchedDocument;
    use crate::feed::rss::RssParser;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct StaticFetcher(&'static str);

    #[async_trait]
    impl DocumentFetcher for StaticFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> Result<FetchedDocument, FetchError> {
            Ok(FetchedDocument {
                body: self.0.to_string(),
                content_type: "application/rss+xml".to_string(),
            })
        }
    }

    const DOC: &str = r#"<rss version="2.0"><channel><title>T</title>
        <item><guid>1</guid></item>
    </channel></rss>"#;

    fn session(options: FeedOptions) -> Result<FeedSession, SessionError> {
        FeedSession::new(options, Arc::new(RssParser), Arc::new(StaticFetcher(DOC)))
    }

    #[test]
    fn test_store_without_key_is_configuration_error() {
        let mut options = FeedOptions::new("http://example.org/feed");
        options.store = Some(Arc::new(MemoryStore::new()));
        assert!(matches!(
            session(options),
            Err(SessionError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_url_method_header_rejected() {
        for options in [
            FeedOptions::new("not a url"),
            FeedOptions::new("ftp://example.org/feed"),
            FeedOptions {
                http_method: "GE T".to_string(),
                ..FeedOptions::new("http://example.org/feed")
            },
            FeedOptions::new("http://example.org/feed").with_header("bad header", "v"),
            FeedOptions::new("http://example.org/feed").with_header("x-ok", "line\nbreak"),
        ] {
            assert!(matches!(
                session(options),
                Err(SessionError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_accept_header_defaults_from_parser() {
        let session = session(FeedOptions::new("http://example.org/feed")).unwrap();
        assert_eq!(
            session.request.headers.get(ACCEPT).unwrap(),
            "application/rss+xml, text/xml"
        );

        let custom = FeedOptions::new("http://example.org/feed").with_header("Accept", "text/plain");
        let session = FeedSession::new(
            custom,
            Arc::new(RssParser),
            Arc::new(StaticFetcher(DOC)),
        )
        .unwrap();
        assert_eq!(session.request.headers.get(ACCEPT).unwrap(), "text/plain");
    }

    #[test]
    fn test_zero_interval_disables_driver() {
        let options = FeedOptions::new("http://example.org/feed").with_interval(Duration::ZERO);
        assert_eq!(session(options).unwrap().interval(), None);
    }

    #[tokio::test]
    async fn test_manual_update_without_start() {
        let session = session(FeedOptions::new("http://example.org/feed")).unwrap();
        let report = session.update().await.unwrap();
        assert_eq!(report.discovered, 1);
        assert!(report.metadata_changed);
        assert!(!report.persisted);
        assert_eq!(session.metadata().await.title.as_deref(), Some("T"));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_updates() {
        let session = Arc::new(session(FeedOptions::new("http://example.org/feed")).unwrap());
        session.start().await.unwrap();
        session.shutdown().await;

        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(matches!(session.update().await, Err(CycleError::Cancelled)));
        assert!(matches!(session.start().await, Err(SessionError::ShutDown)));
    }

    #[test]
    fn test_detection_error_lists_reasons() {
        let err = SessionError::Detection {
            url: "http://example.org".to_string(),
            reasons: vec![
                ("rss".to_string(), "wrong root".to_string()),
                ("atom".to_string(), "wrong namespace".to_string()),
            ],
        };
        assert_eq!(
            err.to_string(),
            "no parser accepts the document at http://example.org: rss: wrong root; atom: wrong namespace"
        );
    }
}
