use chrono::{DateTime, FixedOffset};

use super::parser::{check_content_type, FeedParser, ParseError, ParsedDocument};
use super::types::{
    parse_timestamp, AtomExtension, EntryExtension, FeedEntry, MetadataValue, Person,
};
use super::xml::{self, XmlElement};

pub const ATOM_NAMESPACE: &str = "http://www.w3.org/2005/Atom";

const CONTENT_TYPES: &[&str] = &["application/atom+xml", "text/xml", "application/xml"];

/// Atom (RFC 4287) documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomParser;

impl AtomParser {
    fn check_root(root: &XmlElement) -> Result<(), String> {
        if root.name == "feed" && root.in_namespace(Some(ATOM_NAMESPACE)) {
            Ok(())
        } else {
            Err(format!(
                "Incompatible root tag (got <{}>, needs to be <feed> in the {ATOM_NAMESPACE} namespace)",
                root.name
            ))
        }
    }
}

impl FeedParser for AtomParser {
    fn name(&self) -> &str {
        "atom"
    }

    fn accept(&self) -> Option<&str> {
        Some("application/atom+xml, text/xml")
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

        let mut parsed = ParsedDocument::default();
        for tag in atom_children(&root) {
            let name = tag.name.as_str();
            match name {
                "id" | "title" | "icon" | "generator" => {
                    if let Some(text) = tag.trimmed_text() {
                        parsed.metadata.insert(name.to_string(), text.into());
                    }
                }
                "updated" => {
                    if let Some(updated) = timestamp(tag) {
                        parsed
                            .metadata
                            .insert(name.to_string(), MetadataValue::Timestamp(updated));
                    }
                }
                "subtitle" => {
                    if let Some(text) = tag.trimmed_text() {
                        parsed.metadata.insert("description".to_string(), text.into());
                    }
                }
                "rights" => {
                    if let Some(text) = tag.trimmed_text() {
                        parsed.metadata.insert("copyright".to_string(), text.into());
                    }
                }
                "link" if tag.attr("rel") == Some("alternate") => {
                    if let Some(href) = tag.attr("href") {
                        parsed.metadata.insert("link".to_string(), href.into());
                    }
                }
                _ => {}
            }
        }

        for entry in atom_children(&root).filter(|tag| tag.name == "entry") {
            match parse_entry(entry) {
                Some(parsed_entry) => parsed.entries.push(parsed_entry),
                None => tracing::warn!("Encountered entry without an \"id\" element"),
            }
        }

        Ok(parsed)
    }
}

fn atom_children(element: &XmlElement) -> impl Iterator<Item = &XmlElement> {
    element
        .children
        .iter()
        .filter(|child| child.in_namespace(Some(ATOM_NAMESPACE)))
}

fn parse_entry(element: &XmlElement) -> Option<FeedEntry> {
    let mut id = None;
    let mut entry = FeedEntry::new(String::new());
    let mut extension = AtomExtension::default();

    for tag in atom_children(element) {
        match tag.name.as_str() {
            "id" => id = tag.trimmed_text(),
            "title" => entry.title = tag.trimmed_text(),
            "summary" => entry.summary = tag.trimmed_text(),
            "published" => entry.published = timestamp(tag),
            "updated" => extension.updated = timestamp(tag),
            "content" => {
                let content_type = tag.attr("type").unwrap_or("text");
                extension.content = if content_type == "xhtml" {
                    tag.deep_text()
                } else {
                    tag.trimmed_text()
                };
                extension.content_type = Some(content_type.to_string());
            }
            "category" => {
                // Atom carries the category name in `term`; fall back to text content
                if let Some(term) = tag
                    .attr("term")
                    .map(str::to_string)
                    .or_else(|| tag.trimmed_text())
                {
                    entry.categories.push(term);
                }
            }
            "link" => match tag.attr("rel") {
                Some("enclosure") => {
                    entry.enclosure_url = tag.attr("href").map(str::to_string);
                    entry.enclosure_length =
                        tag.attr("length").and_then(|l| l.trim().parse().ok());
                    entry.enclosure_type = tag.attr("type").map(str::to_string);
                }
                Some("alternate") => entry.link = tag.attr("href").map(str::to_string),
                _ => {}
            },
            "author" => extension.authors.extend(parse_person(tag)),
            "contributor" => extension.contributors.extend(parse_person(tag)),
            _ => {}
        }
    }

    entry.id = id?;
    entry.extension = EntryExtension::Atom(extension);
    Some(entry)
}

fn parse_person(element: &XmlElement) -> Option<Person> {
    let mut person = Person::default();
    let mut has_name = false;
    for tag in atom_children(element) {
        match tag.name.as_str() {
            "name" => {
                if let Some(name) = tag.trimmed_text() {
                    person.name = name;
                    has_name = true;
                }
            }
            "email" => person.email = tag.trimmed_text(),
            "uri" => person.uri = tag.trimmed_text(),
            _ => {}
        }
    }

    if !has_name {
        tracing::warn!(element = %element.name, "Ignoring person without a name");
        return None;
    }
    Some(person)
}

fn timestamp(tag: &XmlElement) -> Option<DateTime<FixedOffset>> {
    let text = tag.trimmed_text()?;
    let parsed = parse_timestamp(&text);
    if parsed.is_none() {
        tracing::warn!(element = %tag.name, value = %text, "Ignoring unparseable timestamp");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
 <title type="text">dive into mark</title>
 <subtitle type="html">
   A &lt;em&gt;lot&lt;/em&gt; of effort
   went into making this effortless
 </subtitle>
 <updated>2005-07-31T12:29:29Z</updated>
 <id>tag:example.org,2003:3</id>
 <link rel="alternate" type="text/html"
  hreflang="en" href="http://example.org/"/>
 <link rel="self" type="application/atom+xml"
  href="http://example.org/feed.atom"/>
 <rights>Copyright (c) 2003, Mark Pilgrim</rights>
 <generator uri="http://www.example.com/" version="1.0">
   Example Toolkit
 </generator>
 <entry>
   <title>Dummy Entry Title</title>
   <link rel="alternate" type="text/html"
    href="http://example.org/2005/04/02/atom"/>
   <link rel="enclosure" type="audio/mpeg" length="1337"
    href="http://example.org/audio/ph34r_my_podcast.mp3"/>
   <id>tag:example.org,2003:3.2397</id>
   <updated>2005-07-31T12:29:29Z</updated>
   <published>2003-12-13T08:29:29-04:00</published>
   <author>
     <name>Mark Pilgrim</name>
     <uri>http://example.org/</uri>
     <email>f8dy@example.com</email>
   </author>
   <contributor>
     <name>Sam Ruby</name>
   </contributor>
   <contributor>
     <name>Joe Gregorio</name>
   </contributor>
   <content type="xhtml" xml:lang="en"
    xml:base="http://diveintomark.org/">
     <div xmlns="http://www.w3.org/1999/xhtml">
       <p><i>[Update: The Atom draft is finished.]</i></p>
     </div>
   </content>
 </entry>
</feed>
"#;

    #[test]
    fn test_parse_document_metadata() {
        let parsed = AtomParser.parse_document(DOCUMENT).unwrap();
        let text = |s: &str| MetadataValue::from(s);

        assert_eq!(parsed.metadata.get("title"), Some(&text("dive into mark")));
        assert_eq!(
            parsed.metadata.get("description"),
            Some(&text(
                "A <em>lot</em> of effort\n   went into making this effortless"
            ))
        );
        assert_eq!(
            parsed.metadata.get("updated"),
            Some(&MetadataValue::Timestamp(
                Utc.with_ymd_and_hms(2005, 7, 31, 12, 29, 29)
                    .unwrap()
                    .fixed_offset()
            ))
        );
        assert_eq!(
            parsed.metadata.get("id"),
            Some(&text("tag:example.org,2003:3"))
        );
        assert_eq!(parsed.metadata.get("link"), Some(&text("http://example.org/")));
        assert_eq!(
            parsed.metadata.get("copyright"),
            Some(&text("Copyright (c) 2003, Mark Pilgrim"))
        );
        assert_eq!(parsed.metadata.get("generator"), Some(&text("Example Toolkit")));
        assert_eq!(parsed.metadata.len(), 7);
    }

    #[test]
    fn test_parse_document_entry() {
        let parsed = AtomParser.parse_document(DOCUMENT).unwrap();
        assert_eq!(parsed.entries.len(), 1);

        let entry = &parsed.entries[0];
        assert_eq!(entry.id, "tag:example.org,2003:3.2397");
        assert_eq!(entry.title.as_deref(), Some("Dummy Entry Title"));
        assert_eq!(
            entry.link.as_deref(),
            Some("http://example.org/2005/04/02/atom")
        );
        let published = entry.published.unwrap();
        assert_eq!(published.offset().local_minus_utc(), -4 * 3600);
        assert_eq!(
            published,
            Utc.with_ymd_and_hms(2003, 12, 13, 12, 29, 29).unwrap()
        );
        assert_eq!(
            entry.enclosure_url.as_deref(),
            Some("http://example.org/audio/ph34r_my_podcast.mp3")
        );
        assert_eq!(entry.enclosure_length, Some(1337));
        assert_eq!(entry.enclosure_type.as_deref(), Some("audio/mpeg"));

        let EntryExtension::Atom(ext) = &entry.extension else {
            panic!("expected Atom extension, got {:?}", entry.extension);
        };
        assert_eq!(
            ext.updated.unwrap(),
            Utc.with_ymd_and_hms(2005, 7, 31, 12, 29, 29).unwrap()
        );
        assert_eq!(
            ext.authors,
            vec![Person {
                name: "Mark Pilgrim".to_string(),
                email: Some("f8dy@example.com".to_string()),
                uri: Some("http://example.org/".to_string()),
            }]
        );
        assert_eq!(
            ext.contributors,
            vec![Person::named("Sam Ruby"), Person::named("Joe Gregorio")]
        );
        assert_eq!(ext.content_type.as_deref(), Some("xhtml"));
        assert_eq!(
            ext.content.as_deref(),
            Some("[Update: The Atom draft is finished.]")
        );
    }

    #[test]
    fn test_entry_without_id_dropped() {
        let doc = r#"<feed xmlns="http://www.w3.org/2005/Atom">
            <entry><id>1</id></entry>
            <entry><title>anonymous</title></entry>
        </feed>"#;
        let parsed = AtomParser.parse_document(doc).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].id, "1");
    }

    #[test]
    fn test_category_term() {
        let doc = r#"<feed xmlns="http://www.w3.org/2005/Atom">
            <entry><id>1</id><category term="rust"/><category term="xml"/></entry>
        </feed>"#;
        let parsed = AtomParser.parse_document(doc).unwrap();
        assert_eq!(parsed.entries[0].categories, vec!["rust", "xml"]);
    }

    #[test]
    fn test_can_parse_reasons() {
        assert_eq!(
            AtomParser.can_parse("<feed></feed>", "text/html").unwrap_err(),
            "Incompatible content type (got 'text/html', needs to be one of \
             'application/atom+xml', 'text/xml', 'application/xml')"
        );
        assert!(AtomParser
            .can_parse("brdytgrdt", "text/xml")
            .unwrap_err()
            .starts_with("Error parsing the document as XML"));
        assert_eq!(
            AtomParser.can_parse("<foo></foo>", "text/xml").unwrap_err(),
            "Incompatible root tag (got <foo>, needs to be <feed> in the \
             http://www.w3.org/2005/Atom namespace)"
        );
        assert_eq!(
            AtomParser.can_parse(
                r#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#,
                "application/atom+xml"
            ),
            Ok(())
        );
    }

    #[test]
    fn test_unqualified_feed_rejected() {
        let err = AtomParser.parse_document("<feed></feed>").unwrap_err();
        assert!(matches!(err, ParseError::Structure(_)));
    }
}
