//! Minimal namespace-aware element tree built on `quick-xml`.
//!
//! The RSS and Atom parsers only need to walk a document a couple of levels
//! deep, so the whole document is read into a small owned tree first.
//!
//! SEC-002: quick-xml (0.37) never parses `<!ENTITY>` declarations from a
//! DOCTYPE. Only the five predefined XML entities are resolved; custom
//! entities surface as an unescape error. Do not switch to a resolver-taking
//! unescape variant.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use thiserror::Error;

/// SEC-003: Maximum element nesting depth accepted in a feed document.
const MAX_XML_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("syntax error at byte {position}: {message}")]
    Syntax { position: u64, message: String },

    #[error("nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("document has no root element")]
    NoRoot,

    #[error("unexpected end of document")]
    UnexpectedEof,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    /// Local name without prefix
    pub name: String,
    /// Resolved namespace URI, if the element is bound to one
    pub namespace: Option<String>,
    /// Attributes keyed by their qualified name (`href`, `xml:lang`)
    pub attributes: Vec<(String, String)>,
    /// Direct character data, concatenated
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Direct text with surrounding whitespace removed; `None` when empty.
    pub fn trimmed_text(&self) -> Option<String> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Text of this element and all descendants, trimmed.
    pub fn deep_text(&self) -> Option<String> {
        let mut out = String::new();
        self.collect_text(&mut out);
        let trimmed = out.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.text);
        for child in &self.children {
            child.collect_text(out);
        }
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Whether this element is in `namespace` (or unqualified when `None`).
    pub fn in_namespace(&self, namespace: Option<&str>) -> bool {
        self.namespace.as_deref() == namespace
    }
}

/// Parse a complete document into its root element.
pub fn parse_document(document: &str) -> Result<XmlElement, XmlError> {
    let mut reader = NsReader::from_str(document);
    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let position = reader.buffer_position();
        let (namespace, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(|e| XmlError::Syntax {
                position,
                message: e.to_string(),
            })?;

        match event {
            Event::Start(start) => {
                if stack.len() >= MAX_XML_DEPTH {
                    return Err(XmlError::MaxDepthExceeded(MAX_XML_DEPTH));
                }
                stack.push(open_element(&start, resolve(namespace), position)?);
            }
            Event::Empty(start) => {
                let element = open_element(&start, resolve(namespace), position)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or(XmlError::UnexpectedEof)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let unescaped = text.unescape().map_err(|e| XmlError::Syntax {
                        position,
                        message: e.to_string(),
                    })?;
                    current.text.push_str(&unescaped);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(XmlError::UnexpectedEof);
    }
    root.ok_or(XmlError::NoRoot)
}

fn resolve(namespace: ResolveResult<'_>) -> Option<String> {
    match namespace {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    }
}

fn open_element(
    start: &BytesStart<'_>,
    namespace: Option<String>,
    position: u64,
) -> Result<XmlElement, XmlError> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Syntax {
            position,
            message: e.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = attr.unescape_value().map_err(|e| XmlError::Syntax {
            position,
            message: e.to_string(),
        })?;
        attributes.push((key, value.into_owned()));
    }

    Ok(XmlElement {
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        namespace,
        attributes,
        text: String::new(),
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_some() {
                return Err(XmlError::Syntax {
                    position: 0,
                    message: "multiple root elements".to_string(),
                });
            }
            *root = Some(element);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_elements_with_namespace() {
        let root = parse_document(
            r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom"><title type="text">Hi &amp; bye</title><link href="x"/></feed>"#,
        )
        .unwrap();

        assert_eq!(root.name, "feed");
        assert!(root.in_namespace(Some("http://www.w3.org/2005/Atom")));
        let title = root.child("title").unwrap();
        assert_eq!(title.trimmed_text().as_deref(), Some("Hi & bye"));
        assert_eq!(title.attr("type"), Some("text"));
        assert_eq!(root.child("link").unwrap().attr("href"), Some("x"));
    }

    #[test]
    fn test_cdata_is_text() {
        let root = parse_document("<a><![CDATA[<b>bold</b>]]></a>").unwrap();
        assert_eq!(root.text, "<b>bold</b>");
    }

    #[test]
    fn test_deep_text_collects_descendants() {
        let root = parse_document("<a> one <b>two</b></a>").unwrap();
        assert_eq!(root.deep_text().as_deref(), Some("one two"));
    }

    #[test]
    fn test_plain_text_has_no_root() {
        assert!(matches!(parse_document("brdytgrdt"), Err(XmlError::NoRoot)));
    }

    #[test]
    fn test_unclosed_element_is_error() {
        assert!(parse_document("<rss><channel>").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let doc = format!("{}{}", "<a>".repeat(100), "</a>".repeat(100));
        assert!(matches!(
            parse_document(&doc),
            Err(XmlError::MaxDepthExceeded(MAX_XML_DEPTH))
        ));
    }

    #[test]
    fn test_custom_entity_rejected() {
        let doc = r#"<!DOCTYPE a [<!ENTITY xxe SYSTEM "file:///etc/passwd">]><a>&xxe;</a>"#;
        assert!(parse_document(doc).is_err());
    }
}
