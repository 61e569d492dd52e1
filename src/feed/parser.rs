use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::atom::AtomParser;
use super::generic::GenericParser;
use super::rss::RssParser;
use super::types::{FeedEntry, MetadataValue};
use super::xml::XmlError;

/// Errors raised when a document cannot be turned into metadata and entries.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed XML
    #[error("XML parse error: {0}")]
    Xml(#[from] XmlError),
    /// Well-formed, but not the structure this parser expects
    #[error("unexpected document structure: {0}")]
    Structure(String),
    /// Rejected by the feed-rs backed parser
    #[error("feed parse error: {0}")]
    Feed(String),
}

/// What a parser extracted from one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    /// Feed-level values keyed by attribute name. Keys without a
    /// [`MetadataField`](super::MetadataField) counterpart are ignored when diffing.
    pub metadata: BTreeMap<String, MetadataValue>,
    /// Entries in document order
    pub entries: Vec<FeedEntry>,
}

/// A document format that can be turned into a [`ParsedDocument`].
///
/// Implementations are pure: no I/O, no state carried between calls.
pub trait FeedParser: Send + Sync + fmt::Debug {
    /// Registry name (`rss`, `atom`, ...)
    fn name(&self) -> &str;

    /// `Accept` header sent when the feed does not configure one.
    fn accept(&self) -> Option<&str> {
        None
    }

    /// Check whether this parser can handle the document.
    ///
    /// Returns `Err(reason)` describing why not. Only used for autodetection.
    fn can_parse(&self, document: &str, content_type: &str) -> Result<(), String>;

    fn parse_document(&self, document: &str) -> Result<ParsedDocument, ParseError>;
}

/// Strip parameters from a content type and lowercase it
/// (`Text/XML; charset=utf-8` -> `text/xml`).
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// Reject `content_type` unless its essence is one of `allowed`.
pub fn check_content_type(content_type: &str, allowed: &[&str]) -> Result<(), String> {
    let essence = mime_essence(content_type);
    if allowed.iter().any(|a| *a == essence) {
        return Ok(());
    }

    let expected = allowed
        .iter()
        .map(|a| format!("'{a}'"))
        .collect::<Vec<_>>()
        .join(", ");
    Err(format!(
        "Incompatible content type (got '{essence}', needs to be one of {expected})"
    ))
}

// ============================================================================
// Registry
// ============================================================================

type ParserFactory = Box<dyn Fn() -> Arc<dyn FeedParser> + Send + Sync>;

/// Maps reader names to parser constructors.
///
/// Registration order is the order tried by [`ParserRegistry::detect`].
pub struct ParserRegistry {
    factories: Vec<(String, ParserFactory)>,
}

impl ParserRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Registry with the built-in parsers: `rss`, `atom`, then `generic`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("rss", || Arc::new(RssParser));
        registry.register("atom", || Arc::new(AtomParser));
        registry.register("generic", || Arc::new(GenericParser));
        registry
    }

    /// Register a parser constructor under `name`, replacing an earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn FeedParser> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: ParserFactory = Box::new(factory);
        match self.factories.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = factory,
            None => self.factories.push((name, factory)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|(name, _)| name.as_str())
    }

    /// Construct the parser registered under `name`.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn FeedParser>> {
        self.factories
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory())
    }

    /// Probe every registered parser in order; the first to accept wins.
    ///
    /// On failure, returns each parser's rejection reason.
    pub fn detect(
        &self,
        document: &str,
        content_type: &str,
    ) -> Result<Arc<dyn FeedParser>, Vec<(String, String)>> {
        let mut reasons = Vec::new();
        for (name, factory) in &self.factories {
            let parser = factory();
            match parser.can_parse(document, content_type) {
                Ok(()) => return Ok(parser),
                Err(reason) => {
                    tracing::debug!(parser = %name, reason = %reason, "Parser rejected document");
                    reasons.push((name.clone(), reason));
                }
            }
        }
        Err(reasons)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<rss version="2.0"><channel></channel></rss>"#;
    const ATOM: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#;

    #[test]
    fn test_mime_essence() {
        assert_eq!(mime_essence("Text/XML; charset=UTF-8"), "text/xml");
        assert_eq!(mime_essence("application/rss+xml"), "application/rss+xml");
    }

    #[test]
    fn test_resolve_by_name() {
        let registry = ParserRegistry::with_defaults();
        assert_eq!(registry.resolve("rss").unwrap().name(), "rss");
        assert_eq!(registry.resolve("atom").unwrap().name(), "atom");
        assert!(registry.resolve("nope").is_none());
    }

    #[test]
    fn test_detect_rss_and_atom() {
        let registry = ParserRegistry::with_defaults();
        let rss = registry.detect(RSS, "application/rss+xml").unwrap();
        assert_eq!(rss.name(), "rss");
        let atom = registry.detect(ATOM, "application/atom+xml").unwrap();
        assert_eq!(atom.name(), "atom");
    }

    #[test]
    fn test_detect_collects_reasons() {
        let registry = ParserRegistry::with_defaults();
        let reasons = registry.detect("<html></html>", "text/html").unwrap_err();
        let names: Vec<&str> = reasons.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["rss", "atom", "generic"]);
        assert!(reasons[0].1.contains("Incompatible content type"));
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = ParserRegistry::with_defaults();
        registry.register("rss", || Arc::new(AtomParser));
        assert_eq!(registry.resolve("rss").unwrap().name(), "atom");
        assert_eq!(registry.names().count(), 3);
    }
}
