use feed_rs::model::{Entry, Feed};
use feed_rs::parser;

use super::parser::{check_content_type, FeedParser, ParseError, ParsedDocument};
use super::types::{FeedEntry, MetadataValue};

const CONTENT_TYPES: &[&str] = &[
    "application/rss+xml",
    "application/atom+xml",
    "application/rdf+xml",
    "application/xml",
    "text/xml",
    "application/json",
    "application/feed+json",
];

/// Any syndication format `feed-rs` understands (RSS 0.9x/1.0/2.0, Atom, JSON Feed).
///
/// Lossier than the dedicated parsers: no format specific extension data.
/// Only identifiers present in the document are used. Items without one
/// (every RSS 1.0 item, guid-less RSS 0.9x items) are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericParser;

impl FeedParser for GenericParser {
    fn name(&self) -> &str {
        "generic"
    }

    fn can_parse(&self, document: &str, content_type: &str) -> Result<(), String> {
        check_content_type(content_type, CONTENT_TYPES)?;
        feed_parser()
            .parse(document.as_bytes())
            .map(|_| ())
            .map_err(|e| format!("Error parsing the document as a feed: {e}"))
    }

    fn parse_document(&self, document: &str) -> Result<ParsedDocument, ParseError> {
        let feed = feed_parser()
            .parse(document.as_bytes())
            .map_err(|e| ParseError::Feed(e.to_string()))?;
        Ok(convert(feed))
    }
}

/// feed-rs parser that leaves missing ids empty instead of hashing link and title.
fn feed_parser() -> parser::Parser {
    parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
}

fn convert(feed: Feed) -> ParsedDocument {
    let mut parsed = ParsedDocument::default();

    if !feed.id.is_empty() {
        parsed.metadata.insert("id".to_string(), feed.id.clone().into());
    }
    if let Some(title) = feed.title {
        parsed.metadata.insert("title".to_string(), title.content.into());
    }
    if let Some(description) = feed.description {
        parsed
            .metadata
            .insert("description".to_string(), description.content.into());
    }
    if let Some(link) = feed.links.first() {
        parsed
            .metadata
            .insert("link".to_string(), link.href.clone().into());
    }
    if let Some(icon) = feed.icon.or(feed.logo) {
        parsed.metadata.insert("icon".to_string(), icon.uri.into());
    }
    if let Some(generator) = feed.generator {
        parsed
            .metadata
            .insert("generator".to_string(), generator.content.into());
    }
    if let Some(rights) = feed.rights {
        parsed
            .metadata
            .insert("copyright".to_string(), rights.content.into());
    }
    if !feed.categories.is_empty() {
        let categories: Vec<String> = feed.categories.into_iter().map(|c| c.term).collect();
        parsed
            .metadata
            .insert("categories".to_string(), MetadataValue::List(categories));
    }
    if let Some(updated) = feed.updated {
        parsed.metadata.insert(
            "updated".to_string(),
            MetadataValue::Timestamp(updated.fixed_offset()),
        );
    }

    for entry in feed.entries {
        match convert_entry(entry) {
            Some(converted) => parsed.entries.push(converted),
            None => tracing::warn!("Encountered entry without an identifier"),
        }
    }

    parsed
}

fn convert_entry(entry: Entry) -> Option<FeedEntry> {
    let id = entry.id.trim();
    if id.is_empty() {
        return None;
    }

    let mut converted = FeedEntry::new(id);
    converted.title = entry.title.map(|t| t.content);
    converted.summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body));
    converted.link = entry.links.first().map(|l| l.href.clone());
    converted.categories = entry.categories.into_iter().map(|c| c.term).collect();
    converted.published = entry.published.or(entry.updated).map(|dt| dt.fixed_offset());

    if let Some(content) = entry.media.into_iter().flat_map(|m| m.content).next() {
        converted.enclosure_url = content.url.map(|u| u.to_string());
        converted.enclosure_length = content.size;
        converted.enclosure_type = content.content_type.map(|m| m.to_string());
    }

    Some(converted)
}
