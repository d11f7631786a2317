//! Markup normalizer – repairs loosely written HTML into strict XHTML.
//!
//! Works in two phases:
//! 1. a tolerant tokenizer and tree builder that never fails on structure
//!    (unclosed tags, stray end tags, bare `&` and `<`), producing a tree of
//!    [`MarkupNode`]s;
//! 2. a strict serializer writing one `html` root with one `head` and one
//!    `body`, every element explicitly closed, every attribute quoted.
//!
//! Serializing the result again yields the same text.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::binder::RawMarkup;
use crate::error::{Error, Result};

pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

// ---------------------------------------------------------------------------
// Encodings
// ---------------------------------------------------------------------------

/// Character encoding declared in (and used to encode) normalized markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8", alias = "UTF-8")]
    Utf8,
    #[serde(rename = "iso-8859-1", alias = "latin1", alias = "ISO-8859-1")]
    Latin1,
    #[serde(rename = "us-ascii", alias = "ascii", alias = "US-ASCII")]
    Ascii,
}

impl Encoding {
    /// Label written into the XML declaration.
    pub fn label(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Ascii => "US-ASCII",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Encoding::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Some(Encoding::Latin1),
            "us-ascii" | "ascii" => Some(Encoding::Ascii),
            _ => None,
        }
    }

    pub fn can_encode(self, c: char) -> bool {
        match self {
            Encoding::Utf8 => true,
            Encoding::Latin1 => (c as u32) <= 0xFF,
            Encoding::Ascii => c.is_ascii(),
        }
    }

    /// Decode input bytes. Any byte sequence the encoding does not define is
    /// unrecoverable.
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => {
                let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                std::str::from_utf8(bytes).map(str::to_string).map_err(|e| {
                    Error::normalization(format!(
                        "input is not valid UTF-8 (byte {})",
                        e.valid_up_to()
                    ))
                })
            }
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            Encoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(pos) => Err(Error::normalization(format!(
                    "input is not valid US-ASCII (byte {pos} is 0x{:02X})",
                    bytes[pos]
                ))),
                None => Ok(bytes.iter().map(|&b| b as char).collect()),
            },
        }
    }

    fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            // Serialized text only holds encodable characters.
            Encoding::Latin1 | Encoding::Ascii => text.chars().map(|c| c as u32 as u8).collect(),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Strict, well-formed XHTML together with the encoding it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMarkup {
    text: String,
    encoding: Encoding,
}

impl NormalizedMarkup {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The markup encoded in its declared encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encoding.encode(&self.text)
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for NormalizedMarkup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ---------------------------------------------------------------------------
// Markup tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum MarkupNode {
    Element(MarkupElement),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkupElement {
    pub name: String,
    /// Attributes in source order; names are unique.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<MarkupNode>,
}

impl MarkupElement {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    fn merge_attributes(&mut self, attributes: Vec<(String, String)>) {
        for (k, v) in attributes {
            if !self.attributes.iter().any(|(n, _)| *n == k) {
                self.attributes.push((k, v));
            }
        }
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["style", "script"];

const HEAD_ELEMENTS: &[&str] = &["title", "style", "meta", "link", "base", "script"];

/// Elements whose start closes an open `p`.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "figure", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "main", "nav", "ol", "p", "pre",
    "section", "table", "ul",
];

const P_SCOPE_BOUNDARY: &[&str] = &["html", "body", "table", "td", "th", "caption", "button"];
const LI_SCOPE_BOUNDARY: &[&str] = &["ul", "ol", "table", "td", "th", "body", "html"];
const CELL_SCOPE_BOUNDARY: &[&str] = &["tr", "table"];
const ROW_SCOPE_BOUNDARY: &[&str] = &["table", "tbody", "thead", "tfoot"];

fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Normalize bound markup into strict XHTML declared as `encoding`.
pub fn normalize(raw: &RawMarkup, encoding: Encoding) -> Result<NormalizedMarkup> {
    normalize_str(raw.as_str(), encoding)
}

/// Decode `bytes` as `input`, then normalize into `output`.
pub fn normalize_bytes(bytes: &[u8], input: Encoding, output: Encoding) -> Result<NormalizedMarkup> {
    let text = input.decode(bytes)?;
    normalize_str(&text, output)
}

fn normalize_str(input: &str, encoding: Encoding) -> Result<NormalizedMarkup> {
    if let Some((idx, c)) = input.char_indices().find(|&(_, c)| !is_xml_char(c)) {
        return Err(Error::normalization(format!(
            "character U+{:04X} at byte {idx} is not allowed in XML",
            c as u32
        )));
    }
    let input = input.replace("\r\n", "\n").replace('\r', "\n");

    let forest = TreeBuilder::new(&input).build();
    let document = Document::from_forest(forest);

    let mut out = String::with_capacity(input.len() + 128);
    out.push_str(&format!(
        "<?xml version=\"1.0\" encoding=\"{}\"?>",
        encoding.label()
    ));
    let serializer = Serializer { encoding };
    serializer.element(&document.into_html(), &mut out);

    log::debug!(
        "normalized {} bytes of markup into {} bytes of {} XHTML",
        input.len(),
        out.len(),
        encoding
    );
    Ok(NormalizedMarkup {
        text: out,
        encoding,
    })
}

fn is_xml_char(c: char) -> bool {
    match c {
        '\t' | '\n' | '\r' => true,
        '\u{0}'..='\u{1F}' => false,
        '\u{FFFE}' | '\u{FFFF}' => false,
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Phase 1: tolerant tokenizer + tree builder
// ---------------------------------------------------------------------------

struct TreeBuilder<'a> {
    input: &'a str,
    pos: usize,
    /// Open elements; index 0 is a synthetic container for the forest.
    stack: Vec<MarkupElement>,
}

impl<'a> TreeBuilder<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            stack: vec![MarkupElement::new("#root")],
        }
    }

    fn build(mut self) -> Vec<MarkupNode> {
        while !self.eof() {
            if self.starts_with("<!--") {
                self.comment();
            } else if self.starts_with("<!") || self.starts_with("<?") {
                self.skip_past('>');
            } else if self.starts_with("</") && self.next_is_letter(2) {
                self.end_tag();
            } else if self.starts_with("<") && self.next_is_letter(1) {
                self.start_tag();
            } else {
                self.text();
            }
        }
        while self.stack.len() > 1 {
            self.pop();
        }
        self.stack
            .pop()
            .map(|root| root.children)
            .unwrap_or_default()
    }

    // -- tree operations --------------------------------------------------

    fn append(&mut self, node: MarkupNode) {
        if let Some(top) = self.stack.last_mut() {
            match (&node, top.children.last_mut()) {
                (MarkupNode::Text(t), Some(MarkupNode::Text(prev))) => prev.push_str(t),
                _ => top.children.push(node),
            }
        }
    }

    fn pop(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        if let Some(el) = self.stack.pop() {
            self.append(MarkupNode::Element(el));
        }
    }

    /// Close the element at `index` and everything opened after it.
    fn close_from(&mut self, index: usize) {
        while self.stack.len() > index {
            self.pop();
        }
    }

    /// Find the nearest open element named one of `names`, searching down the
    /// stack but not past any element in `boundary`.
    fn find_open(&self, names: &[&str], boundary: &[&str]) -> Option<usize> {
        for (i, el) in self.stack.iter().enumerate().skip(1).rev() {
            if names.contains(&el.name.as_str()) {
                return Some(i);
            }
            if boundary.contains(&el.name.as_str()) {
                return None;
            }
        }
        None
    }

    fn apply_implied_closes(&mut self, name: &str) {
        let implied = match name {
            "li" => self.find_open(&["li"], LI_SCOPE_BOUNDARY),
            "td" | "th" => self.find_open(&["td", "th"], CELL_SCOPE_BOUNDARY),
            "tr" => self.find_open(&["tr"], ROW_SCOPE_BOUNDARY),
            _ => None,
        };
        if let Some(i) = implied {
            self.close_from(i);
        }
        if BLOCK_ELEMENTS.contains(&name) || name == "li" {
            if let Some(i) = self.find_open(&["p"], P_SCOPE_BOUNDARY) {
                self.close_from(i);
            }
        }
    }

    // -- tokens -----------------------------------------------------------

    fn start_tag(&mut self) {
        self.advance(1); // '<'
        let name = self.tag_name();
        let mut element = MarkupElement::new(name.clone());

        loop {
            self.skip_whitespace();
            if self.eof() || self.starts_with(">") || self.starts_with("/>") {
                break;
            }
            if self.starts_with("/") {
                self.advance(1);
                continue;
            }
            let Some((key, value)) = self.attribute() else {
                continue;
            };
            if key == "xmlns" {
                continue;
            }
            if !is_valid_attribute_name(&key) {
                log::warn!("dropping attribute '{key}' on <{name}>");
                continue;
            }
            element.merge_attributes(vec![(key, value)]);
        }
        let self_closing = self.starts_with("/>");
        if self_closing {
            self.advance(2);
        } else if self.starts_with(">") {
            self.advance(1);
        }

        self.apply_implied_closes(&name);

        if is_void(&name) {
            self.append(MarkupNode::Element(element));
            return;
        }
        if self_closing {
            self.append(MarkupNode::Element(element));
            return;
        }
        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            let text = self.raw_text(&name);
            if !text.is_empty() {
                element.children.push(MarkupNode::Text(text));
            }
            self.append(MarkupNode::Element(element));
            return;
        }
        self.stack.push(element);
    }

    fn end_tag(&mut self) {
        self.advance(2); // '</'
        let name = self.tag_name();
        self.skip_past('>');
        if is_void(&name) {
            return;
        }
        match self
            .stack
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .find(|(_, el)| el.name == name)
        {
            Some((i, _)) => self.close_from(i),
            None => log::debug!("dropping stray </{name}>"),
        }
    }

    fn text(&mut self) {
        let start = self.pos;
        // A '<' here is stray (not followed by a tag), so take it as text.
        if self.starts_with("<") {
            self.advance(1);
        }
        while !self.eof() && !self.starts_with("<") {
            self.advance(1);
        }
        let text = decode_entities(&self.input[start..self.pos]);
        self.append(MarkupNode::Text(text));
    }

    fn comment(&mut self) {
        self.advance(4); // '<!--'
        let rest = &self.input[self.pos..];
        let (body, consumed) = match rest.find("-->") {
            Some(end) => (&rest[..end], end + 3),
            None => (rest, rest.len()),
        };
        let body = body.to_string();
        self.pos += consumed;
        self.append(MarkupNode::Comment(body));
    }

    /// Content of a `style`/`script` element up to its close tag.
    fn raw_text(&mut self, name: &str) -> String {
        let rest = &self.input[self.pos..];
        let lower = rest.to_ascii_lowercase();
        let close = format!("</{name}");
        let end = lower.find(&close).unwrap_or(rest.len());
        let text = decode_entities(&rest[..end]);
        self.pos += end;
        if !self.eof() {
            self.advance(2);
            self.tag_name();
            self.skip_past('>');
        }
        text
    }

    fn tag_name(&mut self) -> String {
        let start = self.pos;
        while !self.eof() {
            let c = self.current_char();
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                self.advance(1);
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_ascii_lowercase()
    }

    fn attribute(&mut self) -> Option<(String, String)> {
        let start = self.pos;
        while !self.eof() {
            let c = self.current_char();
            if c.is_whitespace() || matches!(c, '=' | '>' | '/' | '<') {
                break;
            }
            self.advance(1);
        }
        let key = self.input[start..self.pos].to_ascii_lowercase();
        if key.is_empty() {
            // Not an attribute start ('=' or '<' where a name belongs).
            self.advance(1);
            return None;
        }
        self.skip_whitespace();
        if !self.starts_with("=") {
            return Some((key.clone(), key));
        }
        self.advance(1);
        self.skip_whitespace();
        Some((key, self.attr_value()))
    }

    fn attr_value(&mut self) -> String {
        for quote in ['"', '\''] {
            if self.current_char() == quote {
                self.advance(1);
                let start = self.pos;
                while !self.eof() && self.current_char() != quote {
                    self.advance(1);
                }
                let val = decode_entities(&self.input[start..self.pos]);
                if !self.eof() {
                    self.advance(1);
                }
                return val;
            }
        }
        let start = self.pos;
        while !self.eof() {
            let c = self.current_char();
            if c.is_whitespace() || c == '>' {
                break;
            }
            if c == '/' && self.input[self.pos..].starts_with("/>") {
                break;
            }
            self.advance(1);
        }
        decode_entities(&self.input[start..self.pos])
    }

    // -- cursor -----------------------------------------------------------

    fn skip_whitespace(&mut self) {
        while !self.eof() && self.current_char().is_whitespace() {
            self.advance(1);
        }
    }

    fn skip_past(&mut self, c: char) {
        match self.input[self.pos..].find(c) {
            Some(i) => self.pos += i + c.len_utf8(),
            None => self.pos = self.input.len(),
        }
    }

    fn next_is_letter(&self, offset: usize) -> bool {
        self.input[self.pos..]
            .chars()
            .nth(offset)
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current_char(&self) -> char {
        self.input[self.pos..].chars().next().unwrap_or('\0')
    }

    fn advance(&mut self, n: usize) {
        for _ in 0..n {
            if let Some(c) = self.input[self.pos..].chars().next() {
                self.pos += c.len_utf8();
            }
        }
    }
}

fn is_valid_attribute_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')) {
        return false;
    }
    // Namespace declarations are owned by the serializer and other prefixes
    // would be undeclared.
    match name.split_once(':') {
        Some((prefix, _)) => prefix == "xml",
        None => name != "xmlns",
    }
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match decode_one_entity(rest) {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode an entity at the start of `s` (which begins with `&`), returning
/// the character and the number of bytes consumed.
fn decode_one_entity(s: &str) -> Option<(char, usize)> {
    let semi = s
        .char_indices()
        .take(12)
        .find(|&(_, c)| c == ';')
        .map(|(i, _)| i)?;
    let body = &s[1..semi];
    let c = if let Some(num) = body.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        char::from_u32(code).filter(|&c| is_xml_char(c))?
    } else {
        named_entity(body)?
    };
    Some((c, semi + 1))
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{A0}',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "euro" => '€',
        "pound" => '£',
        "yen" => '¥',
        "cent" => '¢',
        "sect" => '§',
        "para" => '¶',
        "deg" => '°',
        "plusmn" => '±',
        "times" => '×',
        "divide" => '÷',
        "middot" => '·',
        "bull" => '•',
        "hellip" => '…',
        "ndash" => '–',
        "mdash" => '—',
        "lsquo" => '‘',
        "rsquo" => '’',
        "sbquo" => '‚',
        "ldquo" => '“',
        "rdquo" => '”',
        "bdquo" => '„',
        "laquo" => '«',
        "raquo" => '»',
        "auml" => 'ä',
        "ouml" => 'ö',
        "uuml" => 'ü',
        "Auml" => 'Ä',
        "Ouml" => 'Ö',
        "Uuml" => 'Ü',
        "szlig" => 'ß',
        "eacute" => 'é',
        "egrave" => 'è',
        "ecirc" => 'ê',
        "Eacute" => 'É',
        "aacute" => 'á',
        "agrave" => 'à',
        "acirc" => 'â',
        "iacute" => 'í',
        "oacute" => 'ó',
        "uacute" => 'ú',
        "ccedil" => 'ç',
        "ntilde" => 'ñ',
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Document structure
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Placement {
    TopLevel,
    Html,
    Head,
}

/// The single-root document: `html` attributes, `head` and `body`.
struct Document {
    html: MarkupElement,
    head: MarkupElement,
    body: MarkupElement,
    body_started: bool,
}

impl Document {
    fn from_forest(forest: Vec<MarkupNode>) -> Self {
        let mut doc = Self {
            html: MarkupElement::new("html"),
            head: MarkupElement::new("head"),
            body: MarkupElement::new("body"),
            body_started: false,
        };
        for node in forest {
            doc.place(node, Placement::TopLevel);
        }
        doc
    }

    fn place(&mut self, node: MarkupNode, at: Placement) {
        match node {
            MarkupNode::Text(t) if t.trim().is_empty() => {}
            MarkupNode::Text(t) => self.push_body(MarkupNode::Text(t)),
            MarkupNode::Comment(c) => {
                if at == Placement::Head || !self.body_started {
                    self.head.children.push(MarkupNode::Comment(c));
                } else {
                    self.push_body(MarkupNode::Comment(c));
                }
            }
            MarkupNode::Element(el) => match el.name.as_str() {
                "html" if at != Placement::Head => {
                    self.html.merge_attributes(el.attributes);
                    for child in el.children {
                        self.place(child, Placement::Html);
                    }
                }
                "head" => {
                    self.head.merge_attributes(el.attributes);
                    for child in el.children {
                        self.place(child, Placement::Head);
                    }
                }
                "body" => {
                    self.body.merge_attributes(el.attributes);
                    self.body_started = true;
                    for child in el.children {
                        self.push_body(child);
                    }
                }
                name if HEAD_ELEMENTS.contains(&name)
                    && (at == Placement::Head || !self.body_started) =>
                {
                    self.head.children.push(MarkupNode::Element(el));
                }
                _ => self.push_body(MarkupNode::Element(el)),
            },
        }
    }

    fn push_body(&mut self, node: MarkupNode) {
        self.body_started = true;
        self.body.children.push(node);
    }

    fn into_html(self) -> MarkupElement {
        let mut html = self.html;
        html.attributes.retain(|(k, _)| k != "xmlns");
        html.attributes.insert(0, ("xmlns".to_string(), XHTML_NS.to_string()));
        html.children = vec![
            MarkupNode::Element(self.head),
            MarkupNode::Element(self.body),
        ];
        html
    }
}

// ---------------------------------------------------------------------------
// Phase 2: strict serializer
// ---------------------------------------------------------------------------

struct Serializer {
    encoding: Encoding,
}

impl Serializer {
    fn element(&self, el: &MarkupElement, out: &mut String) {
        out.push('<');
        out.push_str(&el.name);
        for (k, v) in &el.attributes {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            self.escape(v, EscapeMode::Attribute, out);
            out.push('"');
        }
        if is_void(&el.name) {
            out.push_str("/>");
            return;
        }
        out.push('>');
        let raw = RAW_TEXT_ELEMENTS.contains(&el.name.as_str());
        for child in &el.children {
            match child {
                MarkupNode::Element(e) => self.element(e, out),
                MarkupNode::Text(t) if raw => self.escape(t, EscapeMode::RawText, out),
                MarkupNode::Text(t) => self.escape(t, EscapeMode::Text, out),
                MarkupNode::Comment(c) => self.comment(c, out),
            }
        }
        out.push_str("</");
        out.push_str(&el.name);
        out.push('>');
    }

    fn escape(&self, s: &str, mode: EscapeMode, out: &mut String) {
        for c in s.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' if mode == EscapeMode::Text => out.push_str("&gt;"),
                '"' if mode == EscapeMode::Attribute => out.push_str("&quot;"),
                // A literal CR would be folded into LF on the next pass.
                '\r' => out.push_str("&#xD;"),
                c if !self.encoding.can_encode(c) => {
                    out.push_str(&format!("&#x{:X};", c as u32));
                }
                c => out.push(c),
            }
        }
    }

    fn comment(&self, c: &str, out: &mut String) {
        let mut body: String = c
            .chars()
            .map(|ch| {
                if self.encoding.can_encode(ch) {
                    ch.to_string()
                } else {
                    format!("&#x{:X};", ch as u32)
                }
            })
            .collect();
        while body.contains("--") {
            body = body.replace("--", "- -");
        }
        if body.ends_with('-') {
            body.push(' ');
        }
        out.push_str("<!--");
        out.push_str(&body);
        out.push_str("-->");
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EscapeMode {
    Text,
    RawText,
    Attribute,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn norm(s: &str) -> String {
        normalize(&RawMarkup::from(s), Encoding::Utf8)
            .unwrap()
            .into_string()
    }

    fn body(s: &str) -> String {
        let out = norm(s);
        let start = out.find("<body>").expect("body start") + "<body>".len();
        let end = out.rfind("</body>").expect("body end");
        out[start..end].to_string()
    }

    #[test]
    fn wraps_fragment_in_document() {
        assert_eq!(
            norm("<p>Hi</p>"),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <html xmlns=\"http://www.w3.org/1999/xhtml\"><head></head><body><p>Hi</p></body></html>"
        );
    }

    #[test]
    fn closes_unclosed_and_drops_stray() {
        assert_eq!(body("<div><p>one<p>two</div></span>"), "<div><p>one</p><p>two</p></div>");
    }

    #[test]
    fn implied_list_and_table_closes() {
        assert_eq!(body("<ul><li>a<li>b</ul>"), "<ul><li>a</li><li>b</li></ul>");
        assert_eq!(
            body("<table><tr><td>1<td>2<tr><td>3</table>"),
            "<table><tr><td>1</td><td>2</td></tr><tr><td>3</td></tr></table>"
        );
        assert_eq!(
            body("<ul><li>a<ul><li>b</ul></ul>"),
            "<ul><li>a<ul><li>b</li></ul></li></ul>"
        );
    }

    #[test]
    fn void_elements_and_attributes() {
        assert_eq!(
            body("<IMG SRC=logo.png alt='a \"b\"' checked><br>x<BR/>"),
            "<img src=\"logo.png\" alt=\"a &quot;b&quot;\" checked=\"checked\"/><br/>x<br/>"
        );
        assert_eq!(
            body("<p class=\"a\" class=\"b\" xlink:href=\"x\">t</p>"),
            "<p class=\"a\">t</p>"
        );
    }

    #[test]
    fn escapes_stray_characters_and_decodes_entities() {
        assert_eq!(body("<p>Tom & Jerry < 3 &gt; 2 &copy; &bogus;</p>"),
            "<p>Tom &amp; Jerry &lt; 3 &gt; 2 © &amp;bogus;</p>");
    }

    #[test]
    fn head_elements_are_hoisted() {
        let out = norm("<title>T</title><style>p > b { color: red }</style><p>x</p>");
        assert!(out.contains("<head><title>T</title><style>p > b { color: red }</style></head>"));
        assert!(out.contains("<body><p>x</p></body>"));
    }

    #[test]
    fn comments_stay_well_formed() {
        assert_eq!(body("<p>a<!-- x -- y -->b</p>"), "<p>a<!-- x - - y -->b</p>");
    }

    #[test]
    fn idempotent() {
        let inputs = [
            "<html><head><title>x</title></head><body><p>a<b>b</p>c</body></html>",
            "<!DOCTYPE html><ul><li>a &amp; b<li>c</ul><table><tr><td>1</table>",
            "text only & more <3",
            "<style>a{}</style><div><p>x<div>y</div></p></div><!-- c-- -->",
            "<p title='&quot;q&quot;'>caf\u{e9} \u{20ac}</p>",
            "<p title=\"x&#13;y\">a&#13;b\r\nc</p>",
        ];
        for input in inputs {
            for enc in [Encoding::Utf8, Encoding::Latin1, Encoding::Ascii] {
                let once = normalize(&RawMarkup::from(input), enc).unwrap();
                let twice = normalize(&RawMarkup::from(once.as_str()), enc).unwrap();
                assert_eq!(once, twice, "input {input:?} in {enc}");
            }
        }
    }

    #[test]
    fn carriage_return_references_survive() {
        assert_eq!(body("<p>a&#13;b\r\nc\rd</p>"), "<p>a&#xD;b\nc\nd</p>");
    }

    #[test]
    fn unencodable_characters_become_references() {
        let out = normalize(&RawMarkup::from("<p>\u{e9}\u{20ac}</p>"), Encoding::Latin1).unwrap();
        assert!(out.as_str().starts_with("<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>"));
        assert!(out.as_str().contains("<p>\u{e9}&#x20AC;</p>"));
        let bytes = out.to_bytes();
        assert!(bytes.contains(&0xE9));
        assert!(bytes.iter().all(|&b| b != 0xC3));

        let ascii = normalize(&RawMarkup::from("<p>\u{e9}</p>"), Encoding::Ascii).unwrap();
        assert!(ascii.as_str().contains("<p>&#xE9;</p>"));
    }

    #[test]
    fn output_parses_as_xml() {
        let out = norm("<div class=x><p>one<br>two<img src=a.png></div><p>&nbsp;");
        let xml = out.split_once("?>").map(|(_, rest)| rest).unwrap();
        let doc = roxmltree::Document::parse(xml).unwrap();
        assert_eq!(doc.root_element().tag_name().name(), "html");
        assert_eq!(doc.root_element().tag_name().namespace(), Some(XHTML_NS));
    }

    #[test]
    fn rejects_binary_garbage() {
        let err = normalize(&RawMarkup::from("<p>\u{0}\u{1}</p>"), Encoding::Utf8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MarkupNormalization);

        let err = normalize_bytes(&[0x3C, 0x70, 0x3E, 0xFF, 0xFE], Encoding::Utf8, Encoding::Utf8)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MarkupNormalization);

        let err = normalize_bytes(b"<p>\xE9</p>", Encoding::Ascii, Encoding::Utf8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MarkupNormalization);
    }

    #[test]
    fn latin1_input_decodes() {
        let out = normalize_bytes(b"<p>caf\xE9</p>", Encoding::Latin1, Encoding::Utf8).unwrap();
        assert!(out.as_str().contains("<p>caf\u{e9}</p>"));
    }

    #[test]
    fn encoding_labels() {
        assert_eq!(Encoding::from_label("ISO-8859-1"), Some(Encoding::Latin1));
        let e: Encoding = serde_json::from_str("\"us-ascii\"").unwrap();
        assert_eq!(e, Encoding::Ascii);
    }
}
