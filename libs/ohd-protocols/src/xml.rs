//! Restricted XML Tree Parser
//!
//! Parses the small, attribute-free XML documents exchanged with the CVM into
//! a tagged tree. This is not a general-purpose XML parser:
//!
//! - comments (`<!-- ... -->`) and declarations (`<?xml ... ?>`) are skipped
//! - attributes are scanned past and discarded
//! - entities are not decoded; text is kept as it appears on the wire
//! - an element holds either trimmed text (`Leaf`) or child elements (`Node`)
//! - end-tag names are matched case-insensitively; a mismatch is logged and
//!   parsing continues
//!
//! Any structural failure (truncation, unterminated tag/comment/declaration)
//! fails the whole parse. Callers never see a partial tree.

use tracing::warn;

use crate::error::XmlError;

/// Parser recursion limit
pub const MAX_DEPTH: usize = 256;

type Result<T> = std::result::Result<T, XmlError>;

/// Content of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// Whitespace-trimmed character data
    Leaf(String),
    /// Child elements in document order
    Node(Vec<XmlElement>),
}

/// A tag together with its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub tag: String,
    pub content: XmlNode,
}

impl XmlElement {
    /// Parse a single document into its root element
    pub fn parse(text: &str) -> Result<Self> {
        Parser::new(text).document()
    }

    /// Case-insensitive tag comparison
    pub fn tag_is(&self, name: &str) -> bool {
        self.tag.eq_ignore_ascii_case(name)
    }

    /// Leaf text of the first direct child named `tag`
    pub fn value(&self, tag: &str) -> Option<&str> {
        self.content.value(tag)
    }

    /// First direct child named `tag`
    pub fn child(&self, tag: &str) -> Option<&XmlElement> {
        self.children().iter().find(|child| child.tag_is(tag))
    }

    /// Child elements; empty for a leaf
    pub fn children(&self) -> &[XmlElement] {
        match &self.content {
            XmlNode::Node(children) => children,
            XmlNode::Leaf(_) => &[],
        }
    }

    /// Leaf text, if this element is a leaf
    pub fn text(&self) -> Option<&str> {
        self.content.as_leaf()
    }
}

impl XmlNode {
    /// Lookup primitive: leaf text of the first direct child whose tag
    /// matches case-insensitively. A matching child that is itself a node
    /// yields `None`; later siblings are not consulted.
    pub fn value(&self, tag: &str) -> Option<&str> {
        match self {
            XmlNode::Node(children) => children
                .iter()
                .find(|child| child.tag_is(tag))
                .and_then(|child| child.content.as_leaf()),
            XmlNode::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            XmlNode::Leaf(text) => Some(text),
            XmlNode::Node(_) => None,
        }
    }
}

/// Characters allowed in a tag name
fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b':')
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn document(mut self) -> Result<XmlElement> {
        self.skip_misc()?;
        if self.at_end() {
            return Err(XmlError::Truncated { offset: self.pos });
        }
        if self.peek() != Some(b'<') {
            return Err(XmlError::UnexpectedText { offset: self.pos });
        }
        // Anything after the root element is ignored
        self.element(0)
    }

    fn element(&mut self, depth: usize) -> Result<XmlElement> {
        if depth >= MAX_DEPTH {
            return Err(XmlError::TooDeep { limit: MAX_DEPTH });
        }

        let open = self.pos;
        self.pos += 1; // '<'
        let tag = self.tag_name();
        if tag.is_empty() {
            return Err(XmlError::EmptyTagName { offset: self.pos });
        }
        let tag = tag.to_string();

        if self.finish_tag(open)? {
            return Ok(XmlElement {
                tag,
                content: XmlNode::Leaf(String::new()),
            });
        }

        self.skip_misc()?;
        self.expect_more()?;

        let content = if self.peek() != Some(b'<') {
            let text = self.text().trim().to_string();
            self.skip_misc()?;
            self.expect_more()?;
            if !self.starts_with("</") {
                return Err(XmlError::MixedContent {
                    tag,
                    offset: self.pos,
                });
            }
            XmlNode::Leaf(text)
        } else if self.starts_with("</") {
            XmlNode::Leaf(String::new())
        } else {
            let mut children = Vec::new();
            loop {
                children.push(self.element(depth + 1)?);
                self.skip_misc()?;
                self.expect_more()?;
                if self.starts_with("</") {
                    break;
                }
                if self.peek() != Some(b'<') {
                    return Err(XmlError::MixedContent {
                        tag,
                        offset: self.pos,
                    });
                }
            }
            XmlNode::Node(children)
        };

        self.end_tag(&tag)?;
        Ok(XmlElement { tag, content })
    }

    /// Consume `</name ...>`; a name mismatch is logged, not fatal
    fn end_tag(&mut self, expected: &str) -> Result<()> {
        let open = self.pos;
        self.pos += 2; // "</"
        let found = self.tag_name();
        if !found.eq_ignore_ascii_case(expected) {
            warn!(
                expected = expected,
                found = found,
                offset = open,
                "XML end tag mismatch"
            );
        }
        self.finish_tag(open)?;
        Ok(())
    }

    fn tag_name(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_tag_char) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    /// Skip attributes up to and including `>`. Returns true for `/>`.
    fn finish_tag(&mut self, open: usize) -> Result<bool> {
        let mut quote: Option<u8> = None;
        let mut last_significant = None;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match (quote, b) {
                (Some(q), _) if b == q => quote = None,
                (Some(_), _) => {},
                (None, b'"' | b'\'') => quote = Some(b),
                (None, b'>') => return Ok(last_significant == Some(b'/')),
                (None, _) if b.is_ascii_whitespace() => {},
                (None, _) => last_significant = Some(b),
            }
        }
        Err(XmlError::UnterminatedTag { offset: open })
    }

    /// Character data up to the next `<`
    fn text(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|b| b != b'<') {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    /// Skip whitespace, comments and declarations
    fn skip_misc(&mut self) -> Result<()> {
        loop {
            self.skip_whitespace();
            if self.starts_with("<!--") {
                let start = self.pos;
                self.pos = self
                    .find_from(start + 4, "-->")
                    .map(|end| end + 3)
                    .ok_or(XmlError::UnterminatedComment { offset: start })?;
            } else if self.starts_with("<?") {
                let start = self.pos;
                self.pos = self
                    .find_from(start + 2, "?>")
                    .map(|end| end + 2)
                    .ok_or(XmlError::UnterminatedDeclaration { offset: start })?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn find_from(&self, from: usize, needle: &str) -> Option<usize> {
        self.src
            .get(from..)
            .and_then(|rest| rest.find(needle))
            .map(|idx| from + idx)
    }

    fn expect_more(&self) -> Result<()> {
        if self.at_end() {
            Err(XmlError::Truncated { offset: self.pos })
        } else {
            Ok(())
        }
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.bytes
            .get(self.pos..)
            .is_some_and(|rest| rest.starts_with(prefix.as_bytes()))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tracing_test::traced_test;

    const REQUEST: &str = "<retrieveDataReq><refId>5</refId><icdVersion>1.0</icdVersion>\
                           <overheightData>TRUE</overheightData></retrieveDataReq>";

    #[test]
    fn test_parse_request_shape() {
        let root = XmlElement::parse(REQUEST).unwrap();
        assert!(root.tag_is("RETRIEVEDATAREQ"));
        assert_eq!(root.value("refId"), Some("5"));
        assert_eq!(root.value("ICDVERSION"), Some("1.0"));
        assert_eq!(root.value("overheightdata"), Some("TRUE"));
        assert_eq!(root.value("missing"), None);
    }

    #[test]
    fn test_children_in_document_order() {
        let root = XmlElement::parse("<r><a>1</a><b>2</b><c>3</c><a>4</a></r>").unwrap();
        let tags: Vec<&str> = root.children().iter().map(|c| c.tag.as_str()).collect();
        assert_eq!(tags, vec!["a", "b", "c", "a"]);
        // First match wins
        assert_eq!(root.value("a"), Some("1"));
    }

    #[test]
    fn test_leaf_text_is_trimmed() {
        let root = XmlElement::parse("<r>\n  <refId>  aaa \t</refId>\n</r>\n").unwrap();
        assert_eq!(root.value("refId"), Some("aaa"));
    }

    #[test]
    fn test_comments_and_declarations_are_skipped() {
        let doc = "<?xml version=\"1.0\"?>\n<!-- leading -->\n<r><!-- a --><x>1</x>\
                   <!-- trailing --></r>";
        let root = XmlElement::parse(doc).unwrap();
        assert_eq!(root.tag, "r");
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.value("x"), Some("1"));
    }

    #[test]
    fn test_attributes_are_discarded() {
        let doc = "<retrieveDataResp xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\
                   <id providerName=\"p>q\" centerId='c'>ID7</id></retrieveDataResp>";
        let root = XmlElement::parse(doc).unwrap();
        assert_eq!(root.tag, "retrieveDataResp");
        assert_eq!(root.value("id"), Some("ID7"));
    }

    #[test]
    fn test_empty_and_self_closing_elements_are_empty_leaves() {
        let root = XmlElement::parse("<r><a/><b></b><c attr=\"x\" /></r>").unwrap();
        assert_eq!(root.value("a"), Some(""));
        assert_eq!(root.value("b"), Some(""));
        assert_eq!(root.value("c"), Some(""));
    }

    #[test]
    fn test_value_of_interior_node_is_none() {
        let root = XmlElement::parse("<r><a><b>1</b></a><a>2</a></r>").unwrap();
        assert_eq!(root.value("a"), None);
        assert_eq!(root.child("a").and_then(|a| a.value("b")), Some("1"));
    }

    #[test]
    #[traced_test]
    fn test_end_tag_mismatch_is_lenient() {
        let root = XmlElement::parse("<r><a>1</b></r>").unwrap();
        assert_eq!(root.value("a"), Some("1"));
        assert!(logs_contain("XML end tag mismatch"));
    }

    #[test]
    fn test_end_tag_case_insensitive() {
        let root = XmlElement::parse("<Request><Ref>1</REF></request>").unwrap();
        assert_eq!(root.value("ref"), Some("1"));
    }

    #[test]
    fn test_nesting_preserved_at_any_depth() {
        for depth in 1..=64 {
            let mut doc = String::new();
            for level in 0..depth {
                doc.push_str(&format!("<t{level}>"));
            }
            doc.push_str(" leaf ");
            for level in (0..depth).rev() {
                doc.push_str(&format!("</t{level}>"));
            }

            let mut node = XmlElement::parse(&doc).unwrap();
            for level in 0..depth - 1 {
                assert_eq!(node.tag, format!("t{level}"));
                assert_eq!(node.children().len(), 1);
                node = node.children()[0].clone();
            }
            assert_eq!(node.tag, format!("t{}", depth - 1));
            assert_eq!(node.text(), Some("leaf"));
        }
    }

    #[test]
    fn test_truncated_documents_fail() {
        for doc in [
            "",
            "   ",
            "<r>",
            "<r><a>1</a>",
            "<r><a>1",
            "<r>text",
            "<r><a>1</a></r",
        ] {
            assert!(XmlElement::parse(doc).is_err(), "should fail: {doc:?}");
        }
    }

    #[test]
    fn test_unterminated_constructs() {
        assert!(matches!(
            XmlElement::parse("<!-- never closed <r></r>"),
            Err(XmlError::UnterminatedComment { offset: 0 })
        ));
        assert!(matches!(
            XmlElement::parse("<?xml version=\"1.0\" <r></r>"),
            Err(XmlError::UnterminatedDeclaration { offset: 0 })
        ));
        assert!(matches!(
            XmlElement::parse("<r attr=\"1\""),
            Err(XmlError::UnterminatedTag { offset: 0 })
        ));
    }

    #[test]
    fn test_rejects_text_and_mixed_content() {
        assert!(matches!(
            XmlElement::parse("hello <r></r>"),
            Err(XmlError::UnexpectedText { offset: 0 })
        ));
        assert!(matches!(
            XmlElement::parse("<r>text<a>1</a></r>"),
            Err(XmlError::MixedContent { .. })
        ));
        assert!(matches!(
            XmlElement::parse("<r><a>1</a>text</r>"),
            Err(XmlError::MixedContent { .. })
        ));
        assert!(matches!(
            XmlElement::parse("< r></r>"),
            Err(XmlError::EmptyTagName { .. })
        ));
    }

    #[test]
    fn test_depth_limit() {
        let doc = "<a>".repeat(MAX_DEPTH + 1);
        assert_eq!(
            XmlElement::parse(&doc),
            Err(XmlError::TooDeep { limit: MAX_DEPTH })
        );
    }

    #[test]
    fn test_trailing_content_ignored() {
        let root = XmlElement::parse("<r><a>1</a></r>\n<!-- done -->garbage").unwrap();
        assert_eq!(root.value("a"), Some("1"));
    }
}
