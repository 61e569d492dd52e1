//! Polls RSS/Atom feeds on a schedule and broadcasts newly discovered
//! entries and metadata changes. Seen entry ids survive restarts through a
//! pluggable [`storage::StateStore`].

pub mod config;
pub mod feed;
pub mod runtime;
pub mod storage;

pub use config::{Config, ConfigError, FeedConfig};
pub use runtime::{FeedRuntime, RuntimeError};
