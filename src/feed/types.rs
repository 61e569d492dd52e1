use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Entries
// ============================================================================

/// One published item from a feed.
///
/// `id` is the only field the diff algorithm looks at. Everything else is
/// carried through to subscribers untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    /// Identifier unique within the feed (RSS `guid`, Atom `id`)
    pub id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub link: Option<String>,
    /// Category names in document order (not deduplicated)
    pub categories: Vec<String>,
    pub published: Option<DateTime<FixedOffset>>,
    /// URL of an attached media object
    pub enclosure_url: Option<String>,
    /// Size of the attached media object in bytes
    pub enclosure_length: Option<u64>,
    /// MIME type of the attached media object
    pub enclosure_type: Option<String>,
    /// Format specific fields
    pub extension: EntryExtension,
}

impl FeedEntry {
    /// Create an entry with only its identifier set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            summary: None,
            link: None,
            categories: Vec::new(),
            published: None,
            enclosure_url: None,
            enclosure_length: None,
            enclosure_type: None,
            extension: EntryExtension::None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// Format specific data attached to an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum EntryExtension {
    #[default]
    None,
    Rss(RssExtension),
    Atom(AtomExtension),
    /// Arbitrary fields produced by a custom parser
    Custom(serde_json::Map<String, serde_json::Value>),
}

/// Extra RSS 2.0 item fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RssExtension {
    /// Email address of the author
    pub author: Option<String>,
    /// URL of a page with comments on the item
    pub comments: Option<String>,
}

/// Extra Atom entry fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AtomExtension {
    pub content: Option<String>,
    /// Value of the `type` attribute on `<content>` (`text` when absent)
    pub content_type: Option<String>,
    pub updated: Option<DateTime<FixedOffset>>,
    pub authors: Vec<Person>,
    pub contributors: Vec<Person>,
}

/// An author or contributor of an Atom entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Person {
    pub name: String,
    pub email: Option<String>,
    pub uri: Option<String>,
}

impl Person {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Metadata values
// ============================================================================

/// Metadata attributes tracked by [`FeedMetadata`](super::FeedMetadata).
///
/// Parsers may report other keys (`id`, `description`, ...); those have no
/// counterpart here and are ignored by the diff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataField {
    Title,
    Link,
    Icon,
    Generator,
    Copyright,
    Categories,
    Updated,
}

impl MetadataField {
    pub const ALL: [MetadataField; 7] = [
        MetadataField::Title,
        MetadataField::Link,
        MetadataField::Icon,
        MetadataField::Generator,
        MetadataField::Copyright,
        MetadataField::Categories,
        MetadataField::Updated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetadataField::Title => "title",
            MetadataField::Link => "link",
            MetadataField::Icon => "icon",
            MetadataField::Generator => "generator",
            MetadataField::Copyright => "copyright",
            MetadataField::Categories => "categories",
            MetadataField::Updated => "updated",
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataField {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetadataField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or(())
    }
}

/// A metadata value as reported by a parser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    List(Vec<String>),
    Timestamp(DateTime<FixedOffset>),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<DateTime<FixedOffset>> for MetadataValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        MetadataValue::Timestamp(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(value: Vec<String>) -> Self {
        MetadataValue::List(value)
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Parse a feed timestamp.
///
/// Accepts RFC 3339 (Atom, persisted state), RFC 2822 (RSS `pubDate`, with or
/// without weekday) and a bare `YYYY-MM-DDTHH:MM:SS`, which is taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
                .ok()
                .map(|naive| naive.and_utc().fixed_offset())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_rfc3339_keeps_offset() {
        let parsed = parse_timestamp("2003-12-13T08:29:29-04:00").unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), -4 * 3600);
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2003, 12, 13, 12, 29, 29).unwrap()
        );
    }

    #[test]
    fn test_parse_rfc2822_without_weekday() {
        let parsed = parse_timestamp("02 Apr 2017 08:29:30 GMT").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2017, 4, 2, 8, 29, 30).unwrap());
    }

    #[test]
    fn test_parse_rfc2822_with_weekday() {
        let parsed = parse_timestamp("Sun, 02 Apr 2017 08:29:30 +0000").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2017, 4, 2, 8, 29, 30).unwrap());
    }

    #[test]
    fn test_parse_naive_as_utc() {
        let parsed = parse_timestamp("2020-01-02T03:04:05").unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_timestamp("yesterday-ish").is_none());
        assert!(parse_timestamp("   ").is_none());
    }

    #[test]
    fn test_metadata_field_names_round_trip() {
        for field in MetadataField::ALL {
            assert_eq!(field.as_str().parse::<MetadataField>(), Ok(field));
        }
        assert!("description".parse::<MetadataField>().is_err());
    }
}
