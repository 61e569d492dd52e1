use super::parser::{check_content_type, FeedParser, ParseError, ParsedDocument};
use super::types::{parse_timestamp, EntryExtension, FeedEntry, MetadataValue, RssExtension};
use super::xml::{self, XmlElement};

const CONTENT_TYPES: &[&str] = &["application/rss+xml", "text/xml", "application/xml"];

/// RSS 2.0 (Really Simple Syndication) documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct RssParser;

impl RssParser {
    fn check_root(root: &XmlElement) -> Result<(), String> {
        if root.name != "rss" || root.namespace.is_some() {
            return Err(format!(
                "Incompatible root tag (got <{}>, needs to be <rss>)",
                root.name
            ));
        }
        match root.attr("version") {
            None => Err("No \"version\" attribute present in the <rss> element".to_string()),
            Some("2.0") => Ok(()),
            Some(other) => Err(format!(
                "Incompatible RSS version (got '{other}', needs to be '2.0')"
            )),
        }
    }
}

impl FeedParser for RssParser {
    fn name(&self) -> &str {
        "rss"
    }

    fn accept(&self) -> Option<&str> {
        Some("application/rss+xml, text/xml")
    }

    fn can_parse(&self, document: &str, content_type: &str) -> Result<(), String> {
        check_content_type(content_type, CONTENT_TYPES)?;
        let root = xml::parse_document(document)
            .map_err(|e| format!("Error parsing the document as XML: {e}"))?;
        Self::check_root(&root)
    }

    fn parse_document(&self, document: &str) -> Result<ParsedDocument, ParseError> {
        let root = xml::parse_document(document)?;
        Self::check_root(&root).map_err(ParseError::Structure)?;
        let channel = root
            .child("channel")
            .ok_or_else(|| ParseError::Structure("missing <channel> element".to_string()))?;

        let mut parsed = ParsedDocument::default();
        for tag in &channel.children {
            match tag.name.as_str() {
                "title" | "link" | "description" => {
                    if let Some(text) = tag.trimmed_text() {
                        parsed.metadata.insert(tag.name.clone(), text.into());
                    }
                }
                "lastBuildDate" => {
                    if let Some(updated) = timestamp(tag) {
                        parsed
                            .metadata
                            .insert("updated".to_string(), MetadataValue::Timestamp(updated));
                    }
                }
                _ => {}
            }
        }

        for item in channel.children_named("item") {
            match parse_item(item) {
                Some(entry) => parsed.entries.push(entry),
                None => tracing::warn!("Encountered item without a \"guid\" element"),
            }
        }

        Ok(parsed)
    }
}

fn parse_item(item: &XmlElement) -> Option<FeedEntry> {
    let mut id = None;
    let mut entry = FeedEntry::new(String::new());
    let mut extension = RssExtension::default();

    for tag in &item.children {
        match tag.name.as_str() {
            "guid" => id = tag.trimmed_text(),
            "title" => entry.title = tag.trimmed_text(),
            "link" => entry.link = tag.trimmed_text(),
            "description" => entry.summary = tag.trimmed_text(),
            "author" => extension.author = tag.trimmed_text(),
            "comments" => extension.comments = tag.trimmed_text(),
            "pubDate" => entry.published = timestamp(tag),
            "category" => {
                if let Some(category) = tag.trimmed_text() {
                    entry.categories.push(category);
                }
            }
            "enclosure" => {
                entry.enclosure_url = tag.attr("url").map(str::to_string);
                entry.enclosure_length = tag.attr("length").and_then(|l| l.trim().parse().ok());
                entry.enclosure_type = tag.attr("type").map(str::to_string);
            }
            _ => {}
        }
    }

    entry.id = id?;
    entry.extension = EntryExtension::Rss(extension);
    Some(entry)
}

fn timestamp(tag: &XmlElement) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let text = tag.trimmed_text()?;
    let parsed = parse_timestamp(&text);
    if parsed.is_none() {
        tracing::warn!(element = %tag.name, value = %text, "Ignoring unparseable timestamp");
    }
    parsed
}
