//! Render DOM – the strict XHTML produced by the normalizer, parsed with
//! `roxmltree` into a simple element tree plus the document's stylesheets.
//!
//! Elements keep their local name (for type selectors) and a semantic
//! [`Tag`] that drives default styling and layout:
//! - Structural: div (and other block containers), p, h1-h6, ul, ol, li,
//!   table, tr, td, th, img, br, hr
//! - Inline: span, strong/b, em/i, u, a
//! - Styling via `class`, `id` and `style` attributes

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::normalize::NormalizedMarkup;

// ---------------------------------------------------------------------------
// DOM types
// ---------------------------------------------------------------------------

/// The semantic category of an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Div,
    P,
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
    Ul,
    Ol,
    Li,
    Table,
    Tr,
    Td,
    Th,
    Span,
    Strong,
    Em,
    U,
    A,
    Br,
    Hr,
    Img,
    Body,
    Html,
    Head,
    /// Catch-all for unknown tags – they are kept but not displayed.
    Unknown(String),
}

impl Tag {
    pub fn from_name(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "div" | "section" | "article" | "header" | "footer" | "main" | "nav" | "aside"
            | "address" | "blockquote" | "figure" | "figcaption" | "form" | "fieldset"
            | "center" | "pre" | "dl" | "dt" | "dd" | "caption" => Tag::Div,
            "p" => Tag::P,
            "h1" => Tag::H1,
            "h2" => Tag::H2,
            "h3" => Tag::H3,
            "h4" => Tag::H4,
            "h5" => Tag::H5,
            "h6" => Tag::H6,
            "ul" => Tag::Ul,
            "ol" => Tag::Ol,
            "li" => Tag::Li,
            "table" => Tag::Table,
            "tr" => Tag::Tr,
            "td" => Tag::Td,
            "th" => Tag::Th,
            "span" | "small" | "code" | "sub" | "sup" | "label" | "abbr" | "cite" | "q"
            | "time" | "mark" => Tag::Span,
            "strong" | "b" => Tag::Strong,
            "em" | "i" | "var" => Tag::Em,
            "u" | "ins" => Tag::U,
            "a" => Tag::A,
            "br" => Tag::Br,
            "hr" => Tag::Hr,
            "img" => Tag::Img,
            "body" => Tag::Body,
            "html" => Tag::Html,
            "head" => Tag::Head,
            _ => Tag::Unknown(s.to_string()),
        }
    }
}

/// A node in our DOM tree.
#[derive(Debug, Clone)]
pub enum DomNode {
    Element(ElementNode),
    Text(String),
}

/// An element node carrying tag, attributes, and children.
#[derive(Debug, Clone)]
pub struct ElementNode {
    /// Lowercase local name as written in the markup.
    pub name: String,
    pub tag: Tag,
    pub attributes: HashMap<String, String>,
    pub children: Vec<DomNode>,
}

impl ElementNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            tag: Tag::from_name(name),
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn classes(&self) -> Vec<&str> {
        self.attributes
            .get("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn id(&self) -> Option<&str> {
        self.attributes.get("id").map(|s| s.as_str())
    }

    pub fn inline_style(&self) -> Option<&str> {
        self.attributes.get("style").map(|s| s.as_str())
    }

    pub fn src(&self) -> Option<&str> {
        self.attributes.get("src").map(|s| s.as_str())
    }
}

/// Where a stylesheet comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSource {
    /// Text of a `<style>` element.
    Inline(String),
    /// `href` of a `<link rel="stylesheet">`.
    Linked(String),
}

/// A parsed document: title, stylesheets in document order and the body.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub title: Option<String>,
    pub styles: Vec<StyleSource>,
    pub body: Vec<DomNode>,
}

impl Document {
    /// Every distinct `<img src>` in the body, in document order.
    pub fn image_sources(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_image_sources(&self.body, &mut out);
        out
    }
}

fn collect_image_sources(nodes: &[DomNode], out: &mut Vec<String>) {
    for node in nodes {
        if let DomNode::Element(e) = node {
            if e.tag == Tag::Img {
                if let Some(src) = e.src() {
                    if !out.iter().any(|s| s == src) {
                        out.push(src.to_string());
                    }
                }
            }
            collect_image_sources(&e.children, out);
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse normalized markup into a [`Document`].
///
/// The input must be well-formed XML; anything else means it did not come
/// from the normalizer and is reported as a normalization failure.
pub fn parse_document(markup: &NormalizedMarkup) -> Result<Document> {
    parse_xhtml(markup.as_str())
}

pub(crate) fn parse_xhtml(text: &str) -> Result<Document> {
    let xml = strip_xml_declaration(text);
    let xml_doc = roxmltree::Document::parse(xml)
        .map_err(|e| Error::normalization(format!("markup is not well-formed XML: {e}")))?;

    let mut doc = Document::default();
    for child in xml_doc.root_element().children() {
        if !child.is_element() {
            continue;
        }
        match child.tag_name().name() {
            "head" => collect_head(child, &mut doc),
            "body" => doc.body = convert_children(child, &mut doc.styles),
            other => log::debug!("ignoring <{other}> outside head/body"),
        }
    }
    log::debug!(
        "parsed document: {} stylesheet(s), {} top-level body node(s)",
        doc.styles.len(),
        doc.body.len()
    );
    Ok(doc)
}

fn strip_xml_declaration(text: &str) -> &str {
    let trimmed = text.trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return &trimmed[end + 2..];
        }
    }
    trimmed
}

fn collect_head(head: roxmltree::Node<'_, '_>, doc: &mut Document) {
    for child in head.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "title" => {
                doc.title = Some(element_text(child).trim().to_string());
            }
            "style" => doc.styles.push(StyleSource::Inline(element_text(child))),
            "link" => {
                if let Some(href) = stylesheet_href(child) {
                    doc.styles.push(StyleSource::Linked(href));
                }
            }
            _ => {}
        }
    }
}

fn stylesheet_href(link: roxmltree::Node<'_, '_>) -> Option<String> {
    let is_sheet = link
        .attribute("rel")
        .map(|rel| {
            rel.split_whitespace()
                .any(|r| r.eq_ignore_ascii_case("stylesheet"))
        })
        .unwrap_or(false);
    if !is_sheet {
        return None;
    }
    link.attribute("href").map(str::to_string)
}

fn element_text(node: roxmltree::Node<'_, '_>) -> String {
    node.children()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

fn convert_children(parent: roxmltree::Node<'_, '_>, styles: &mut Vec<StyleSource>) -> Vec<DomNode> {
    let mut nodes = Vec::new();
    for child in parent.children() {
        if child.is_text() {
            if let Some(text) = child.text() {
                match nodes.last_mut() {
                    Some(DomNode::Text(prev)) => prev.push_str(text),
                    _ => nodes.push(DomNode::Text(text.to_string())),
                }
            }
            continue;
        }
        if !child.is_element() {
            continue;
        }
        let name = child.tag_name().name();
        match name {
            "style" => {
                styles.push(StyleSource::Inline(element_text(child)));
                continue;
            }
            "link" => {
                if let Some(href) = stylesheet_href(child) {
                    styles.push(StyleSource::Linked(href));
                }
                continue;
            }
            "script" | "title" | "meta" | "base" => continue,
            // Row groups are transparent: their rows belong to the table.
            "thead" | "tbody" | "tfoot" => {
                nodes.extend(convert_children(child, styles));
                continue;
            }
            _ => {}
        }
        let mut elem = ElementNode::new(name);
        for attr in child.attributes() {
            if attr.namespace().is_none() {
                elem.attributes
                    .insert(attr.name().to_ascii_lowercase(), attr.value().to_string());
            }
        }
        elem.children = convert_children(child, styles);
        nodes.push(DomNode::Element(elem));
    }
    nodes
}

// ---------------------------------------------------------------------------
// Convenience helpers
// ---------------------------------------------------------------------------

/// Parse an XHTML fragment such as `<p>Hi</p>` (wrapped in a body) into DOM
/// nodes. Used by tests and layout tooling.
pub fn parse_fragment(xhtml: &str) -> Result<Vec<DomNode>> {
    let wrapped = format!(
        "<html xmlns=\"{}\"><head></head><body>{xhtml}</body></html>",
        crate::normalize::XHTML_NS
    );
    Ok(parse_xhtml(&wrapped)?.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::RawMarkup;
    use crate::normalize::{normalize, Encoding};

    fn parse(html: &str) -> Document {
        let markup = normalize(&RawMarkup::from(html), Encoding::Utf8).unwrap();
        parse_document(&markup).unwrap()
    }

    #[test]
    fn parse_simple_div() {
        let doc = parse(r#"<div class="flex p-4" id="main"><p>Hello</p></div>"#);
        assert_eq!(doc.body.len(), 1);
        if let DomNode::Element(e) = &doc.body[0] {
            assert_eq!(e.tag, Tag::Div);
            assert_eq!(e.classes(), vec!["flex", "p-4"]);
            assert_eq!(e.id(), Some("main"));
            assert_eq!(e.children.len(), 1);
        } else {
            panic!("Expected element");
        }
    }

    #[test]
    fn parse_img_and_block_aliases() {
        let doc = parse(r#"<section><img src="logo.png"></section>"#);
        let DomNode::Element(section) = &doc.body[0] else {
            panic!("Expected element");
        };
        assert_eq!(section.name, "section");
        assert_eq!(section.tag, Tag::Div);
        let DomNode::Element(img) = &section.children[0] else {
            panic!("Expected img element");
        };
        assert_eq!(img.tag, Tag::Img);
        assert_eq!(img.src(), Some("logo.png"));
        assert_eq!(doc.image_sources(), vec!["logo.png"]);
    }

    #[test]
    fn collects_stylesheets_in_order() {
        let doc = parse(
            r#"<title>Letter</title><link rel="stylesheet" href="style.css"><style>p{color:red}</style><p>x</p><style>h1{}</style>"#,
        );
        assert_eq!(doc.title.as_deref(), Some("Letter"));
        assert_eq!(
            doc.styles,
            vec![
                StyleSource::Linked("style.css".into()),
                StyleSource::Inline("p{color:red}".into()),
                StyleSource::Inline("h1{}".into()),
            ]
        );
    }

    #[test]
    fn title_text_is_taken_once() {
        let doc = parse("<head><title> Order confirmation </title></head><p>x</p>");
        assert_eq!(doc.title.as_deref(), Some("Order confirmation"));
    }

    #[test]
    fn table_row_groups_are_transparent() {
        let nodes = parse_fragment(
            "<table><thead><tr><th>Name</th></tr></thead><tbody><tr><td>Alice</td></tr></tbody></table>",
        )
        .unwrap();
        let DomNode::Element(table) = &nodes[0] else {
            panic!("Expected table");
        };
        assert_eq!(table.children.len(), 2);
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(parse_xhtml("<html><body><p></body></html>").is_err());
    }
}
