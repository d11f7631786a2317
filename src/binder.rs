//! Template binder – merges a named template and a [`TemplateContext`] into
//! raw markup.
//!
//! # Syntax
//!
//! | tag                                  | meaning                                  |
//! |--------------------------------------|------------------------------------------|
//! | `{{ data.city }}`                    | required value, HTML-escaped             |
//! | `{{ data.street? }}`                 | optional value, empty when missing       |
//! | `{{& data.note }}`                   | raw value, not escaped                   |
//! | `{{#each prods as p}}…{{/each}}`     | repeat body per list item, in order      |
//! | `{{#if p.inStock}}…{{else}}…{{/if}}` | conditional on truthiness                |
//! | `{{#unless x}}…{{/unless}}`          | negated conditional                      |
//! | `{{> fragments/header }}`            | include another template                 |
//! | `{{! note }}`                        | comment                                  |
//!
//! Includes form a graph that is loaded up front with an explicit work stack,
//! so a self-referential chain is reported as [`Error::TemplateCycle`] instead
//! of recursing forever.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::config::TemplateRoot;
use crate::context::{Scope, TemplateContext, Value};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Raw markup
// ---------------------------------------------------------------------------

/// Markup text produced by the binder and consumed by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMarkup(String);

impl RawMarkup {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for RawMarkup {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RawMarkup {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RawMarkup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Template sources
// ---------------------------------------------------------------------------

/// Read-only access to template text by name.
pub trait TemplateSource {
    /// Load the template called `name`, or `Ok(None)` if it does not exist.
    fn load(&self, name: &str) -> Result<Option<String>>;

    /// Human-readable location used in "not found" errors.
    fn location(&self) -> String;
}

/// Loads `<dir>/<name><suffix>` from disk.
#[derive(Debug, Clone)]
pub struct FileSystemSource {
    root: TemplateRoot,
}

impl FileSystemSource {
    pub fn new(root: TemplateRoot) -> Self {
        Self { root }
    }

    /// Map a template name onto a file path, refusing names that would
    /// escape the root.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if !is_relative_name(name) {
            return None;
        }
        Some(self.root.dir.join(format!("{name}{}", self.root.suffix)))
    }
}

impl TemplateSource for FileSystemSource {
    fn load(&self, name: &str) -> Result<Option<String>> {
        let Some(path) = self.resolve(name) else {
            return Ok(None);
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn location(&self) -> String {
        format!("{}/*{}", self.root.dir.display(), self.root.suffix)
    }
}

/// Templates held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    templates: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, text: impl Into<String>) -> &mut Self {
        self.templates.insert(name.into(), text.into());
        self
    }

    pub fn with_templates(
        templates: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        let mut source = Self::new();
        for (name, text) in templates {
            source.add(name, text);
        }
        source
    }
}

impl TemplateSource for MemorySource {
    fn load(&self, name: &str) -> Result<Option<String>> {
        Ok(self.templates.get(name).cloned())
    }

    fn location(&self) -> String {
        format!("memory ({} templates)", self.templates.len())
    }
}

fn is_relative_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

// ---------------------------------------------------------------------------
// Template AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Value {
        path: String,
        escape: bool,
        optional: bool,
    },
    Each {
        path: String,
        binding: String,
        body: Vec<Node>,
    },
    If {
        path: String,
        negate: bool,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Include(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Each,
    If,
    Unless,
}

impl BlockKind {
    fn keyword(self) -> &'static str {
        match self {
            BlockKind::Each => "each",
            BlockKind::If => "if",
            BlockKind::Unless => "unless",
        }
    }
}

struct Frame {
    kind: BlockKind,
    path: String,
    binding: String,
    offset: usize,
    nodes: Vec<Node>,
    else_nodes: Option<Vec<Node>>,
}

impl Frame {
    fn push(&mut self, node: Node) {
        match &mut self.else_nodes {
            Some(nodes) => nodes.push(node),
            None => self.nodes.push(node),
        }
    }

    fn close(self) -> Node {
        match self.kind {
            BlockKind::Each => Node::Each {
                path: self.path,
                binding: self.binding,
                body: self.nodes,
            },
            BlockKind::If | BlockKind::Unless => Node::If {
                path: self.path,
                negate: self.kind == BlockKind::Unless,
                then: self.nodes,
                otherwise: self.else_nodes.unwrap_or_default(),
            },
        }
    }
}

/// Parse template text into nodes.
fn parse(template: &str, text: &str) -> Result<Vec<Node>> {
    let syntax = |offset: usize, message: String| Error::TemplateSyntax {
        template: template.to_string(),
        offset,
        message,
    };

    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut pos = 0usize;

    fn emit(root: &mut Vec<Node>, stack: &mut [Frame], node: Node) {
        match stack.last_mut() {
            Some(frame) => frame.push(node),
            None => root.push(node),
        }
    }

    while pos < text.len() {
        let Some(rel) = text[pos..].find("{{") else {
            emit(&mut root, &mut stack, Node::Text(text[pos..].to_string()));
            break;
        };
        let open = pos + rel;
        if open > pos {
            emit(&mut root, &mut stack, Node::Text(text[pos..open].to_string()));
        }
        let inner_start = open + 2;
        let Some(close_rel) = text[inner_start..].find("}}") else {
            return Err(syntax(open, "unclosed '{{' tag".into()));
        };
        let close = inner_start + close_rel;
        let tag = text[inner_start..close].trim();
        pos = close + 2;

        if tag.starts_with('!') {
            continue;
        }
        if let Some(name) = tag.strip_prefix('>') {
            let name = name.trim();
            if !is_relative_name(name) {
                return Err(syntax(open, format!("invalid include name '{name}'")));
            }
            emit(&mut root, &mut stack, Node::Include(name.to_string()));
            continue;
        }
        if let Some(rest) = tag.strip_prefix('#') {
            let mut words = rest.split_whitespace();
            let keyword = words.next().unwrap_or("");
            let kind = match keyword {
                "each" => BlockKind::Each,
                "if" => BlockKind::If,
                "unless" => BlockKind::Unless,
                other => return Err(syntax(open, format!("unknown block '#{other}'"))),
            };
            let path = words
                .next()
                .ok_or_else(|| syntax(open, format!("'#{keyword}' needs a path")))?;
            check_path(path).map_err(|m| syntax(open, m))?;
            let binding = match (kind, words.next(), words.next()) {
                (BlockKind::Each, None, None) => "item".to_string(),
                (BlockKind::Each, Some("as"), Some(name)) => {
                    check_identifier(name).map_err(|m| syntax(open, m))?;
                    name.to_string()
                }
                (_, None, _) => String::new(),
                _ => return Err(syntax(open, format!("malformed '#{keyword}' tag '{tag}'"))),
            };
            if words.next().is_some() {
                return Err(syntax(open, format!("trailing words in '{tag}'")));
            }
            stack.push(Frame {
                kind,
                path: path.to_string(),
                binding,
                offset: open,
                nodes: Vec::new(),
                else_nodes: None,
            });
            continue;
        }
        if let Some(rest) = tag.strip_prefix('/') {
            let keyword = rest.trim();
            let Some(frame) = stack.pop() else {
                return Err(syntax(open, format!("'/{keyword}' without an open block")));
            };
            if frame.kind.keyword() != keyword {
                return Err(syntax(
                    open,
                    format!(
                        "'/{keyword}' closes '#{}' opened at byte {}",
                        frame.kind.keyword(),
                        frame.offset
                    ),
                ));
            }
            let node = frame.close();
            emit(&mut root, &mut stack, node);
            continue;
        }
        if tag == "else" {
            match stack.last_mut() {
                Some(frame) if frame.kind != BlockKind::Each && frame.else_nodes.is_none() => {
                    frame.else_nodes = Some(Vec::new());
                }
                _ => return Err(syntax(open, "'else' outside an if/unless block".into())),
            }
            continue;
        }

        let (escape, body) = match tag.strip_prefix('&') {
            Some(rest) => (false, rest.trim()),
            None => (true, tag),
        };
        let (optional, path) = match body.strip_suffix('?') {
            Some(path) => (true, path.trim()),
            None => (false, body),
        };
        check_path(path).map_err(|m| syntax(open, m))?;
        emit(
            &mut root,
            &mut stack,
            Node::Value {
                path: path.to_string(),
                escape,
                optional,
            },
        );
    }

    if let Some(frame) = stack.pop() {
        return Err(syntax(
            frame.offset,
            format!("'#{}' block is never closed", frame.kind.keyword()),
        ));
    }
    Ok(root)
}

fn check_identifier(s: &str) -> std::result::Result<(), String> {
    let mut chars = s.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(format!("invalid identifier '{s}'"))
    }
}

fn check_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Err("empty placeholder".into());
    }
    path.split('.')
        .try_for_each(check_identifier)
        .map_err(|_| format!("invalid placeholder path '{path}'"))
}

fn collect_includes(nodes: &[Node], out: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Include(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Node::Each { body, .. } => collect_includes(body, out),
            Node::If {
                then, otherwise, ..
            } => {
                collect_includes(then, out);
                collect_includes(otherwise, out);
            }
            Node::Text(_) | Node::Value { .. } => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Inclusion graph
// ---------------------------------------------------------------------------

/// Traversal tag for a template while the graph is being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Every template reachable from an entry template, parsed once.
///
/// Construction fails on the first include cycle, so evaluation over a
/// loaded graph always terminates.
#[derive(Debug)]
pub struct TemplateGraph {
    entry: String,
    templates: HashMap<String, Vec<Node>>,
}

impl TemplateGraph {
    pub fn load(source: &dyn TemplateSource, entry: &str) -> Result<Self> {
        let not_found = |name: &str| Error::TemplateNotFound {
            name: name.to_string(),
            location: source.location(),
        };
        let load_one = |name: &str| -> Result<(Vec<Node>, Vec<String>)> {
            let text = source.load(name)?.ok_or_else(|| not_found(name))?;
            let nodes = parse(name, &text)?;
            let mut includes = Vec::new();
            collect_includes(&nodes, &mut includes);
            Ok((nodes, includes))
        };

        let mut marks: HashMap<String, Mark> = HashMap::new();
        let mut templates: HashMap<String, Vec<Node>> = HashMap::new();
        // (template name, its includes, index of the next include to visit)
        let mut stack: Vec<(String, Vec<String>, usize)> = Vec::new();

        let (nodes, includes) = load_one(entry)?;
        templates.insert(entry.to_string(), nodes);
        marks.insert(entry.to_string(), Mark::Visiting);
        stack.push((entry.to_string(), includes, 0));

        while let Some((_, includes, next)) = stack.last_mut() {
            if *next >= includes.len() {
                if let Some((name, _, _)) = stack.pop() {
                    marks.insert(name, Mark::Done);
                }
                continue;
            }
            let child = includes[*next].clone();
            *next += 1;
            match marks.get(&child) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => {
                    let start = stack
                        .iter()
                        .position(|(name, _, _)| *name == child)
                        .unwrap_or(0);
                    let mut chain: Vec<String> =
                        stack[start..].iter().map(|(n, _, _)| n.clone()).collect();
                    chain.push(child);
                    return Err(Error::TemplateCycle { chain });
                }
                None => {
                    let (nodes, includes) = load_one(&child)?;
                    templates.insert(child.clone(), nodes);
                    marks.insert(child.clone(), Mark::Visiting);
                    stack.push((child, includes, 0));
                }
            }
        }

        Ok(Self {
            entry: entry.to_string(),
            templates,
        })
    }

    /// Number of distinct templates in the graph.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Evaluate the entry template against `context`.
    pub fn evaluate(&self, context: &TemplateContext) -> Result<String> {
        let mut out = String::new();
        let scope = Scope::root(context);
        self.eval_template(&self.entry, &scope, &mut out)?;
        Ok(out)
    }

    fn eval_template(&self, name: &str, scope: &Scope<'_>, out: &mut String) -> Result<()> {
        let nodes = self.templates.get(name).ok_or_else(|| Error::TemplateNotFound {
            name: name.to_string(),
            location: "template graph".into(),
        })?;
        self.eval_nodes(name, nodes, scope, out)
    }

    fn eval_nodes(
        &self,
        template: &str,
        nodes: &[Node],
        scope: &Scope<'_>,
        out: &mut String,
    ) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Value {
                    path,
                    escape,
                    optional,
                } => match scope.lookup(path) {
                    None if *optional => {}
                    None => {
                        return Err(Error::UnresolvedPlaceholder {
                            template: template.to_string(),
                            path: path.clone(),
                        })
                    }
                    Some(value) => {
                        let text = value.as_text().ok_or_else(|| Error::TemplateSyntax {
                            template: template.to_string(),
                            offset: 0,
                            message: format!(
                                "'{path}' is a {} and cannot be interpolated",
                                value.type_name()
                            ),
                        })?;
                        if *escape {
                            escape_html_into(&text, out);
                        } else {
                            out.push_str(&text);
                        }
                    }
                },
                Node::Each {
                    path,
                    binding,
                    body,
                } => {
                    let items = match scope.lookup(path) {
                        None => {
                            return Err(Error::UnresolvedPlaceholder {
                                template: template.to_string(),
                                path: path.clone(),
                            })
                        }
                        Some(Value::Null) => continue,
                        Some(Value::List(items)) => items,
                        Some(other) => {
                            return Err(Error::TemplateSyntax {
                                template: template.to_string(),
                                offset: 0,
                                message: format!(
                                    "'{path}' is a {}, '#each' needs a list",
                                    other.type_name()
                                ),
                            })
                        }
                    };
                    for (index, item) in items.iter().enumerate() {
                        let mut child = scope.child();
                        child.bind(binding, item.clone());
                        child.bind(&format!("{binding}_index"), Value::Number(index.to_string()));
                        self.eval_nodes(template, body, &child, out)?;
                    }
                }
                Node::If {
                    path,
                    negate,
                    then,
                    otherwise,
                } => {
                    let truthy = scope.lookup(path).map(Value::is_truthy).unwrap_or(false);
                    let branch = if truthy != *negate { then } else { otherwise };
                    self.eval_nodes(template, branch, scope, out)?;
                }
                Node::Include(name) => self.eval_template(name, scope, out)?,
            }
        }
        Ok(())
    }
}

fn escape_html_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

// ---------------------------------------------------------------------------
// Binder
// ---------------------------------------------------------------------------

/// Binds named templates from a [`TemplateSource`].
pub struct TemplateBinder {
    source: Box<dyn TemplateSource>,
}

impl TemplateBinder {
    pub fn new(source: impl TemplateSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Binder over `<root.dir>/<name><root.suffix>` files.
    pub fn from_root(root: TemplateRoot) -> Self {
        Self::new(FileSystemSource::new(root))
    }

    /// Merge template `name` with `context` into raw markup.
    pub fn bind(&self, name: &str, context: &TemplateContext) -> Result<RawMarkup> {
        let graph = TemplateGraph::load(self.source.as_ref(), name)?;
        let text = graph.evaluate(context)?;
        log::debug!(
            "bound template '{}' ({} template(s) in include graph, {} bytes)",
            name,
            graph.len(),
            text.len()
        );
        Ok(RawMarkup(text))
    }
}

impl fmt::Debug for TemplateBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateBinder")
            .field("source", &self.source.location())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Record;
    use crate::error::ErrorKind;

    fn binder(templates: &[(&str, &str)]) -> TemplateBinder {
        TemplateBinder::new(MemorySource::with_templates(templates.iter().copied()))
    }

    fn product(name: &str, in_stock: bool) -> Value {
        let mut r = Record::new();
        r.insert("name".into(), name.into());
        r.insert("inStock".into(), in_stock.into());
        Value::Record(r)
    }

    #[test]
    fn interpolates_and_escapes() {
        let b = binder(&[("t", "<p>{{ name }} &amp; {{& raw }}</p>")]);
        let ctx = TemplateContext::new()
            .with("name", "Tom & <Jerry>")
            .with("raw", "<b>x</b>");
        let out = b.bind("t", &ctx).unwrap();
        assert_eq!(
            out.as_str(),
            "<p>Tom &amp; &lt;Jerry&gt; &amp; <b>x</b></p>"
        );
    }

    #[test]
    fn comments_produce_nothing() {
        let b = binder(&[("t", "<p>a{{! greeting goes here }}b</p>")]);
        assert_eq!(b.bind("t", &TemplateContext::new()).unwrap().as_str(), "<p>ab</p>");
    }

    #[test]
    fn each_preserves_order() {
        let b = binder(&[(
            "t",
            "{{#each prods as p}}[{{p_index}}:{{p.name}}]{{/each}}",
        )]);
        let ctx = TemplateContext::new().with(
            "prods",
            vec![product("p1", true), product("p2", false)],
        );
        assert_eq!(b.bind("t", &ctx).unwrap().as_str(), "[0:p1][1:p2]");
    }

    #[test]
    fn conditionals() {
        let b = binder(&[(
            "t",
            "{{#each prods as p}}{{#if p.inStock}}yes{{else}}no{{/if}}{{#unless p.inStock}}!{{/unless}} {{/each}}",
        )]);
        let ctx = TemplateContext::new().with(
            "prods",
            vec![product("p1", true), product("p2", false)],
        );
        assert_eq!(b.bind("t", &ctx).unwrap().as_str(), "yes no! ");
    }

    #[test]
    fn missing_required_placeholder_fails() {
        let b = binder(&[("t", "Hello {{ data.firstname }}")]);
        let err = b.bind("t", &TemplateContext::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedPlaceholder);
    }

    #[test]
    fn missing_optional_placeholder_is_empty() {
        let b = binder(&[("t", "[{{ data.street? }}]")]);
        assert_eq!(b.bind("t", &TemplateContext::new()).unwrap().as_str(), "[]");
    }

    #[test]
    fn includes_compose() {
        let b = binder(&[
            ("letter", "{{> fragments/header}}body{{> fragments/footer}}"),
            ("fragments/header", "<h1>{{title}}</h1>"),
            ("fragments/footer", "<p>end</p>"),
        ]);
        let ctx = TemplateContext::new().with("title", "Hi");
        assert_eq!(
            b.bind("letter", &ctx).unwrap().as_str(),
            "<h1>Hi</h1>body<p>end</p>"
        );
    }

    #[test]
    fn shared_include_is_not_a_cycle() {
        let b = binder(&[
            ("a", "{{> b}}{{> c}}"),
            ("b", "{{> d}}"),
            ("c", "{{> d}}"),
            ("d", "x"),
        ]);
        assert_eq!(b.bind("a", &TemplateContext::new()).unwrap().as_str(), "xx");
    }

    #[test]
    fn self_include_is_a_cycle() {
        let b = binder(&[("a", "{{> a}}")]);
        let err = b.bind("a", &TemplateContext::new()).unwrap_err();
        match err {
            Error::TemplateCycle { chain } => assert_eq!(chain, vec!["a", "a"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mutual_include_is_a_cycle() {
        let b = binder(&[("a", "{{> b}}"), ("b", "{{#if x}}{{> c}}{{/if}}"), ("c", "{{> a}}")]);
        let err = b.bind("a", &TemplateContext::new()).unwrap_err();
        match err {
            Error::TemplateCycle { chain } => assert_eq!(chain, vec!["a", "b", "c", "a"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_template_and_include() {
        let b = binder(&[("a", "{{> nowhere}}")]);
        assert_eq!(
            b.bind("zzz", &TemplateContext::new()).unwrap_err().kind(),
            ErrorKind::TemplateNotFound
        );
        assert_eq!(
            b.bind("a", &TemplateContext::new()).unwrap_err().kind(),
            ErrorKind::TemplateNotFound
        );
    }

    #[test]
    fn syntax_errors() {
        for text in ["{{ oops", "{{#if x}}never closed", "{{/each}}", "{{#each xs as}}{{/each}}", "{{ a..b }}"] {
            let b = binder(&[("t", text)]);
            let err = b.bind("t", &TemplateContext::new().with("x", true)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TemplateSyntax, "template {text:?}");
        }
    }

    #[test]
    fn records_cannot_be_interpolated() {
        let b = binder(&[("t", "{{ data }}")]);
        let ctx = TemplateContext::new().with("data", Record::new());
        assert_eq!(b.bind("t", &ctx).unwrap_err().kind(), ErrorKind::TemplateSyntax);
    }

    #[test]
    fn filesystem_source_rejects_escaping_names() {
        let src = FileSystemSource::new(TemplateRoot::new("/srv/t", ".html"));
        assert_eq!(src.resolve("letter"), Some(PathBuf::from("/srv/t/letter.html")));
        assert!(src.resolve("../etc/passwd").is_none());
        assert!(src.resolve("/abs").is_none());
    }
}
