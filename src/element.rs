//! Minimal ordered XML tree.
//!
//! The transport only needs to frame whole elements in and out of HTTP
//! bodies; everything smarter (streams, stanza semantics) lives upstream.
//! Parsing leans on [`quick_xml`] for tokenizing and entity handling, the
//! tree itself is a plain recursive value type that preserves attribute and
//! child order.

use core::fmt;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::XmlError;

/// A single XML element: name, attributes, and ordered children.
///
/// Names are kept in their prefixed wire form (`stream:features`), which is
/// all the BOSH layer ever inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified tag name as it appeared on the wire.
    pub name: String,

    /// Attributes in document order, keys in their prefixed form.
    pub attrs: Vec<(String, String)>,

    /// Child nodes in document order.
    pub children: Vec<Node>,
}

/// A child node of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A nested element.
    Element(Element),

    /// Character data, unescaped.
    Text(String),
}

impl Element {
    /// Create an empty element with the given tag name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Append an attribute, builder style.
    #[must_use]
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    /// Append a child element, builder style.
    #[must_use]
    pub fn child(mut self, el: Element) -> Self {
        self.children.push(Node::Element(el));
        self
    }

    /// Append a text node, builder style.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Look up an attribute value by its qualified key.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The namespace prefix of the tag name, if any.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    /// Iterate over the element children, skipping text nodes.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// Parse a single element from raw bytes.
    ///
    /// Content after the root element's close tag is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`XmlError`] if the input is not well-formed or contains no
    /// root element.
    pub fn parse(bytes: &[u8]) -> Result<Self, XmlError> {
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref start) => {
                    stack.push(Self::from_start(start)?);
                }
                Event::Empty(ref start) => {
                    let el = Self::from_start(start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(el)),
                        None => return Ok(el),
                    }
                }
                Event::End(_) => {
                    let el = stack.pop().ok_or(XmlError::NoRoot)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(el)),
                        None => return Ok(el),
                    }
                }
                Event::Text(ref text) => {
                    let text = text.unescape()?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(text.into_owned()));
                    }
                }
                Event::CData(ref data) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = String::from_utf8_lossy(data).into_owned();
                        parent.children.push(Node::Text(text));
                    }
                }
                Event::Eof => {
                    return Err(if stack.is_empty() {
                        XmlError::NoRoot
                    } else {
                        XmlError::UnexpectedEof
                    });
                }
                // Declarations, comments and processing instructions carry
                // nothing the transport cares about.
                _ => {}
            }
            buf.clear();
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut el = Self::new(name);
        for attr in start.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            el.attrs.push((key, value));
        }
        Ok(el)
    }

    /// Render the element to its wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (key, value) in &self.attrs {
            write!(f, " {}=\"{}\"", key, escape(value.as_str()))?;
        }
        if self.children.is_empty() {
            return write!(f, "/>");
        }
        write!(f, ">")?;
        for child in &self.children {
            match child {
                Node::Element(el) => write!(f, "{el}")?,
                Node::Text(text) => write!(f, "{}", escape(text.as_str()))?,
            }
        }
        write!(f, "</{}>", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_root() {
        let el = Element::parse(b"<body/>").expect("parse");
        assert_eq!(el, Element::new("body"));
    }

    #[test]
    fn parses_attributes_in_order() {
        let el = Element::parse(br#"<body rid="42" sid="bo12sh"/>"#).expect("parse");
        assert_eq!(el.attribute("rid"), Some("42"));
        assert_eq!(el.attribute("sid"), Some("bo12sh"));
        assert_eq!(el.attrs[0].0, "rid");
        assert_eq!(el.attrs[1].0, "sid");
    }

    #[test]
    fn parses_nested_children_and_text() {
        let el = Element::parse(b"<body><message><body>hi there</body></message></body>")
            .expect("parse");
        let message = el.child_elements().next().expect("message child");
        assert_eq!(message.name, "message");
        let inner = message.child_elements().next().expect("inner body");
        assert_eq!(inner.children, vec![Node::Text("hi there".into())]);
    }

    #[test]
    fn keeps_prefixed_names() {
        let el = Element::parse(b"<body><stream:features/></body>").expect("parse");
        let features = el.child_elements().next().expect("features");
        assert_eq!(features.name, "stream:features");
        assert_eq!(features.prefix(), Some("stream"));
    }

    #[test]
    fn round_trips_through_render() {
        let input = br#"<body rid="1"><message to="a@b">hello</message></body>"#;
        let el = Element::parse(input).expect("parse");
        let rendered = el.to_bytes();
        assert_eq!(Element::parse(&rendered).expect("reparse"), el);
    }

    #[test]
    fn escapes_attribute_values_and_text() {
        let el = Element::new("message")
            .attr("to", "a&b")
            .text("1 < 2");
        let rendered = el.to_string();
        assert_eq!(rendered, r#"<message to="a&amp;b">1 &lt; 2</message>"#);
        assert_eq!(Element::parse(rendered.as_bytes()).expect("reparse"), el);
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(Element::parse(b""), Err(XmlError::NoRoot)));
        assert!(matches!(Element::parse(b"   "), Err(XmlError::NoRoot)));
    }

    #[test]
    fn rejects_unclosed_root() {
        assert!(matches!(
            Element::parse(b"<body><message/>"),
            Err(XmlError::UnexpectedEof)
        ));
    }

    #[test]
    fn rejects_mismatched_tags() {
        assert!(Element::parse(b"<body></message>").is_err());
    }
}
