//! Feed polling: parsing, fetching, diffing and notification.
//!
//! - [`parser`] and its implementations turn a document into metadata and entries
//! - [`fetcher`] retrieves documents over HTTP
//! - [`FeedSession`] runs the fetch, parse, diff, notify and persist cycle
//! - [`FeedEvents`] broadcasts what each cycle found
//!
//! # Example
//!
//! ```ignore
//! let fetcher = Arc::new(ReqwestFetcher::new(HttpSettings::default())?);
//! let options = FeedOptions::new("https://example.org/feed.xml")
//!     .with_interval(Duration::from_secs(300));
//! let session = create_feed(options, None, &ParserRegistry::with_defaults(), fetcher).await?;
//! let mut entries = session.events().subscribe_entries();
//! session.start().await?;
//! while let Ok(event) = entries.recv().await {
//!     println!("{}", event.entry.title.as_deref().unwrap_or("(untitled)"));
//! }
//! ```

mod atom;
mod events;
mod factory;
mod fetcher;
mod generic;
mod parser;
mod rss;
mod scheduler;
mod session;
mod snapshot;
mod types;
mod xml;

pub use atom::{AtomParser, ATOM_NAMESPACE};
pub use events::{EntryEvent, FeedEvent, FeedEvents, MetadataEvent, DEFAULT_EVENT_CAPACITY};
pub use factory::create_feed;
pub use fetcher::{
    DocumentFetcher, FetchError, FetchRequest, FetchedDocument, HttpSettings, ReqwestFetcher,
    DEFAULT_CONTENT_TYPE,
};
pub use generic::GenericParser;
pub use parser::{
    check_content_type, mime_essence, FeedParser, ParseError, ParsedDocument, ParserRegistry,
};
pub use rss::RssParser;
pub use session::{CycleError, CycleReport, FeedOptions, FeedSession, SessionError, SessionState};
pub use snapshot::{FeedMetadata, FeedSnapshot, MetadataChanges, StateError, STATE_VERSION};
pub use types::{
    parse_timestamp, AtomExtension, EntryExtension, FeedEntry, MetadataField, MetadataValue,
    Person, RssExtension,
};
pub use xml::{parse_document as parse_xml, XmlElement, XmlError};
