//! TOML configuration for the feed runtime.
//!
//! The file is optional: a missing or empty file yields `Config::default()`,
//! a single feed can be configured entirely under `[defaults]`, and unknown
//! top-level keys are logged and ignored.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{HttpSettings, DEFAULT_EVENT_CAPACITY};
use crate::storage::StoreConfig;

/// Poll interval used when a feed does not set `interval_secs`.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Name of the feed created from `[defaults]` when `[feeds]` is empty.
pub const DEFAULT_FEED_NAME: &str = "default";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broadcast buffer per session and event kind.
    pub event_capacity: usize,

    pub http: HttpConfig,

    /// Values merged under every feed. Feed values win.
    pub defaults: FeedConfig,

    /// Named state stores, referenced by `FeedConfig::store`.
    pub stores: BTreeMap<String, StoreConfig>,

    pub feeds: BTreeMap<String, FeedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            http: HttpConfig::default(),
            defaults: FeedConfig::default(),
            stores: BTreeMap::new(),
            feeds: BTreeMap::new(),
        }
    }
}

/// Shared HTTP client settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_bytes: usize,
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let settings = HttpSettings::default();
        Self {
            timeout_secs: settings.timeout.as_secs(),
            max_bytes: settings.max_bytes,
            max_retries: settings.max_retries,
            user_agent: settings.user_agent,
        }
    }
}

impl HttpConfig {
    pub fn settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            max_bytes: self.max_bytes,
            max_retries: self.max_retries,
            user_agent: self.user_agent.clone(),
        }
    }
}

/// One feed. Every field is optional so the same shape serves `[defaults]`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    pub url: Option<String>,
    /// Parser name. Absent means autodetect.
    pub reader: Option<String>,
    /// Name of an entry in `[stores]`
    pub store: Option<String>,
    pub state_key: Option<String>,
    /// 0 disables polling; absent means [`DEFAULT_INTERVAL_SECS`]
    pub interval_secs: Option<u64>,
    pub http_method: Option<String>,
    pub http_headers: BTreeMap<String, String>,
}

impl FeedConfig {
    /// `self` with unset fields taken from `defaults`. Headers merge per name.
    pub fn merged_over(&self, defaults: &FeedConfig) -> FeedConfig {
        let mut http_headers = defaults.http_headers.clone();
        http_headers.extend(self.http_headers.clone());

        FeedConfig {
            url: self.url.clone().or_else(|| defaults.url.clone()),
            reader: self.reader.clone().or_else(|| defaults.reader.clone()),
            store: self.store.clone().or_else(|| defaults.store.clone()),
            state_key: self.state_key.clone().or_else(|| defaults.state_key.clone()),
            interval_secs: self.interval_secs.or(defaults.interval_secs),
            http_method: self.http_method.clone().or_else(|| defaults.http_method.clone()),
            http_headers,
        }
    }

    /// Poll interval, or `None` when polling is disabled.
    pub fn interval(&self) -> Option<Duration> {
        let secs = self.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS);
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = ["event_capacity", "http", "defaults", "stores", "feeds"];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → logged as warning, ignored
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            stores = config.stores.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        Ok(toml::from_str(content)?)
    }

    /// Feeds with `[defaults]` merged in, by name.
    ///
    /// When `[feeds]` is empty and `[defaults]` has a `url`, that single feed
    /// is returned under [`DEFAULT_FEED_NAME`].
    pub fn resolved_feeds(&self) -> BTreeMap<String, FeedConfig> {
        if self.feeds.is_empty() {
            return match self.defaults.url {
                Some(_) => BTreeMap::from([(DEFAULT_FEED_NAME.to_string(), self.defaults.clone())]),
                None => BTreeMap::new(),
            };
        }

        self.feeds
            .iter()
            .map(|(name, feed)| (name.clone(), feed.merged_over(&self.defaults)))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("feedreader.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.http.max_retries, 2);
        assert!(config.stores.is_empty());
        assert!(config.resolved_feeds().is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "   \n\n\t  \n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
event_capacity = 32

[http]
timeout_secs = 5
max_retries = 0

[defaults]
interval_secs = 600
store = "db"
http_headers = { "X-Client" = "feedreader" }

[stores.db]
backend = "sqlite"
path = "/var/lib/feedreader/state.db"
table = "states"

[feeds.news]
url = "https://example.org/rss"
reader = "rss"
state_key = "news"

[feeds.blog]
url = "https://example.org/atom"
interval_secs = 0
http_method = "post"
http_headers = { "X-Client" = "override", Accept = "application/atom+xml" }
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.event_capacity, 32);
        assert_eq!(config.http.settings().timeout, Duration::from_secs(5));
        assert_eq!(config.http.max_retries, 0);
        assert_eq!(config.http.max_bytes, HttpConfig::default().max_bytes);
        assert_eq!(config.stores["db"].backend, "sqlite");
        assert_eq!(config.stores["db"].table.as_deref(), Some("states"));

        let feeds = config.resolved_feeds();
        let news = &feeds["news"];
        assert_eq!(news.reader.as_deref(), Some("rss"));
        assert_eq!(news.store.as_deref(), Some("db"));
        assert_eq!(news.interval(), Some(Duration::from_secs(600)));
        assert_eq!(news.http_headers["X-Client"], "feedreader");

        let blog = &feeds["blog"];
        assert_eq!(blog.interval(), None);
        assert_eq!(blog.http_method.as_deref(), Some("post"));
        assert_eq!(blog.http_headers["X-Client"], "override");
        assert_eq!(blog.http_headers["Accept"], "application/atom+xml");
    }

    #[test]
    fn test_defaults_shortcut_creates_single_feed() {
        let config = Config::parse(
            r#"
[defaults]
url = "https://example.org/feed"
"#,
        )
        .unwrap();
        let feeds = config.resolved_feeds();
        assert_eq!(feeds.len(), 1);
        let feed = &feeds[DEFAULT_FEED_NAME];
        assert_eq!(feed.url.as_deref(), Some("https://example.org/feed"));
        assert_eq!(feed.interval(), Some(Duration::from_secs(DEFAULT_INTERVAL_SECS)));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("feeds = [not valid").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_top_level_keys_accepted() {
        let config = Config::parse("theme = \"dark\"\nevent_capacity = 8\n").unwrap();
        assert_eq!(config.event_capacity, 8);
    }

    #[test]
    fn test_unknown_feed_key_rejected() {
        let err = Config::parse("[feeds.a]\nurl = \"https://example.org\"\nintervall = 5\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let err = Config::parse("event_capacity = \"many\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }
}
