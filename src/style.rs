//! Style resolver – maps document stylesheets and inline `style` attributes
//! to a flat [`ComputedStyle`] per element. Class names only matter through
//! selectors.
//!
//! Cascade order for one element, later wins:
//! 1. inherited text properties of the parent,
//! 2. tag defaults,
//! 3. stylesheet rules, by specificity then source order,
//! 4. the inline `style` attribute.

use std::collections::HashMap;

use crate::config::PageOrientation;
use crate::dom::{DomNode, ElementNode, Tag};

/// Fully resolved style for a single element.
#[derive(Debug, Clone)]
pub struct ComputedStyle {
    // Display / layout
    pub display: Display,
    pub flex_direction: FlexDirection,
    pub flex_wrap: FlexWrap,
    pub flex_grow: f32,
    pub flex_shrink: f32,
    pub justify_content: JustifyContent,
    pub align_items: AlignItems,
    pub gap: f32,

    // Grid
    pub grid_template_columns: Vec<GridTrack>,

    // Sizing
    pub width: Dimension,
    pub height: Dimension,
    pub min_width: Dimension,
    pub max_width: Dimension,

    // Spacing (pt)
    pub margin_top: f32,
    pub margin_right: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
    pub padding_top: f32,
    pub padding_right: f32,
    pub padding_bottom: f32,
    pub padding_left: f32,

    // Border
    pub border_width: f32,
    pub border_color: Color,

    // Typography
    pub font_size: f32,
    pub font_weight: FontWeight,
    pub font_family: String,
    pub color: Color,
    pub text_align: TextAlign,
    pub line_height: f32,
    pub text_decoration: TextDecoration,
    pub font_style: FontStyle,

    // Background
    pub background_color: Color,

    // Page break
    pub page_break_before: bool,
    pub page_break_after: bool,
    pub page_break_inside_avoid: bool,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: Display::Block,
            flex_direction: FlexDirection::Row,
            flex_wrap: FlexWrap::NoWrap,
            flex_grow: 0.0,
            flex_shrink: 1.0,
            justify_content: JustifyContent::Start,
            align_items: AlignItems::Stretch,
            gap: 0.0,
            grid_template_columns: Vec::new(),
            width: Dimension::Auto,
            height: Dimension::Auto,
            min_width: Dimension::Auto,
            max_width: Dimension::Auto,
            margin_top: 0.0,
            margin_right: 0.0,
            margin_bottom: 0.0,
            margin_left: 0.0,
            padding_top: 0.0,
            padding_right: 0.0,
            padding_bottom: 0.0,
            padding_left: 0.0,
            border_width: 0.0,
            border_color: Color::BLACK,
            font_size: 12.0,
            font_weight: FontWeight::Normal,
            font_family: "Helvetica".to_string(),
            color: Color::BLACK,
            text_align: TextAlign::Left,
            line_height: 1.4,
            text_decoration: TextDecoration::None,
            font_style: FontStyle::Normal,
            background_color: Color::TRANSPARENT,
            page_break_before: false,
            page_break_after: false,
            page_break_inside_avoid: false,
        }
    }
}

impl ComputedStyle {
    /// A fresh style carrying only the inherited text properties of `parent`.
    fn inherit_from(parent: &ComputedStyle) -> Self {
        Self {
            font_size: parent.font_size,
            font_weight: parent.font_weight,
            font_family: parent.font_family.clone(),
            color: parent.color,
            text_align: parent.text_align,
            line_height: parent.line_height,
            font_style: parent.font_style,
            text_decoration: parent.text_decoration,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Supporting enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Block,
    Flex,
    Grid,
    Inline,
    InlineBlock,
    ListItem,
    TableRow,
    TableCell,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlexDirection {
    Row,
    Column,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlexWrap {
    NoWrap,
    Wrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JustifyContent {
    Start,
    End,
    Center,
    SpaceBetween,
    SpaceAround,
    SpaceEvenly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignItems {
    Start,
    End,
    Center,
    Stretch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Normal,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextDecoration {
    None,
    Underline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Normal,
    Italic,
}

/// A length in points, a percentage of the parent, or auto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dimension {
    Auto,
    Px(f32),
    Percent(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GridTrack {
    Px(f32),
    Fr(f32),
    Auto,
}

/// RGBA colour (0.0 – 1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);
    pub const TRANSPARENT: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn is_transparent(&self) -> bool {
        self.a < 0.001
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok().map(|v| v as f32 / 255.0);
        match hex.len() {
            6 => Some(Self::rgb(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            3 => Some(Self::rgb(
                channel(&hex[0..1].repeat(2))?,
                channel(&hex[1..2].repeat(2))?,
                channel(&hex[2..3].repeat(2))?,
            )),
            _ => None,
        }
    }

    /// Parse `#rgb`, `#rrggbb`, `rgb()`/`rgba()` or a colour name.
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().to_ascii_lowercase();
        if v.starts_with('#') {
            return Self::from_hex(&v);
        }
        if let Some(args) = v
            .strip_prefix("rgba(")
            .or_else(|| v.strip_prefix("rgb("))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let parts: Vec<&str> = args
                .split(|c: char| c == ',' || c == '/' || c.is_whitespace())
                .filter(|p| !p.is_empty())
                .collect();
            if parts.len() < 3 {
                return None;
            }
            let channel = |p: &str| -> Option<f32> {
                match p.strip_suffix('%') {
                    Some(pct) => pct.parse::<f32>().ok().map(|x| x / 100.0),
                    None => p.parse::<f32>().ok().map(|x| x / 255.0),
                }
                .map(|x| x.clamp(0.0, 1.0))
            };
            let alpha = match parts.get(3) {
                Some(a) => match a.strip_suffix('%') {
                    Some(pct) => pct.parse::<f32>().ok()? / 100.0,
                    None => a.parse::<f32>().ok()?,
                },
                None => 1.0,
            };
            return Some(Self {
                r: channel(parts[0])?,
                g: channel(parts[1])?,
                b: channel(parts[2])?,
                a: alpha.clamp(0.0, 1.0),
            });
        }
        if v == "transparent" {
            return Some(Self::TRANSPARENT);
        }
        NAMED_COLORS
            .iter()
            .find(|(name, _)| *name == v)
            .and_then(|(_, hex)| Self::from_hex(hex))
    }
}

const NAMED_COLORS: &[(&str, &str)] = &[
    ("black", "000000"),
    ("white", "ffffff"),
    ("red", "ff0000"),
    ("green", "008000"),
    ("blue", "0000ff"),
    ("yellow", "ffff00"),
    ("orange", "ffa500"),
    ("purple", "800080"),
    ("gray", "808080"),
    ("grey", "808080"),
    ("silver", "c0c0c0"),
    ("lightgray", "d3d3d3"),
    ("lightgrey", "d3d3d3"),
    ("darkgray", "a9a9a9"),
    ("darkgrey", "a9a9a9"),
    ("maroon", "800000"),
    ("navy", "000080"),
    ("teal", "008080"),
    ("olive", "808000"),
    ("lime", "00ff00"),
    ("aqua", "00ffff"),
    ("fuchsia", "ff00ff"),
    ("darkblue", "00008b"),
    ("darkred", "8b0000"),
    ("darkgreen", "006400"),
];

// ---------------------------------------------------------------------------
// Lengths
// ---------------------------------------------------------------------------

/// Points per millimetre.
pub const PT_PER_MM: f32 = 72.0 / 25.4;

/// Parse a CSS length into points. `px` and bare numbers count as points;
/// `em` is relative to `font_size`.
pub fn parse_length(value: &str, font_size: f32) -> Option<f32> {
    let v = value.trim().to_ascii_lowercase();
    let split = v
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(v.len());
    let (num, unit) = v.split_at(split);
    let n: f32 = num.parse().ok()?;
    let factor = match unit.trim() {
        "" | "px" | "pt" => 1.0,
        "mm" => PT_PER_MM,
        "cm" => PT_PER_MM * 10.0,
        "in" => 72.0,
        "pc" => 12.0,
        "em" => font_size,
        "rem" => 12.0,
        _ => return None,
    };
    Some(n * factor)
}

fn parse_dimension(s: &str, font_size: f32) -> Dimension {
    let s = s.trim();
    if s == "auto" || s == "none" {
        Dimension::Auto
    } else if let Some(pct) = s.strip_suffix('%') {
        pct.trim()
            .parse::<f32>()
            .map(Dimension::Percent)
            .unwrap_or(Dimension::Auto)
    } else {
        parse_length(s, font_size)
            .map(Dimension::Px)
            .unwrap_or(Dimension::Auto)
    }
}

// ---------------------------------------------------------------------------
// Stylesheets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

/// One compound selector: `div.note#intro`, `*`, `.x.y`.
#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    name: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl Compound {
    fn parse(s: &str) -> Option<Self> {
        let ident_end = |from: usize| {
            s[from..]
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'))
                .map_or(s.len(), |i| from + i)
        };
        let mut c = Compound::default();
        let mut pos = 0;
        if s.starts_with('*') {
            pos = 1;
        } else if s.starts_with(|ch: char| ch.is_ascii_alphabetic()) {
            pos = ident_end(0);
            c.name = Some(s[..pos].to_ascii_lowercase());
        }
        while let Some(ch) = s[pos..].chars().next() {
            let start = pos + ch.len_utf8();
            let end = ident_end(start);
            if end == start {
                return None;
            }
            match ch {
                '.' => c.classes.push(s[start..end].to_string()),
                '#' => c.id = Some(s[start..end].to_string()),
                // Attribute selectors, pseudo-classes and the like are not supported.
                _ => return None,
            }
            pos = end;
        }
        Some(c)
    }

    fn matches(&self, el: &ElementNode) -> bool {
        if let Some(name) = &self.name {
            if *name != el.name {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if el.id() != Some(id.as_str()) {
                return false;
            }
        }
        let classes = el.classes();
        self.classes.iter().all(|c| classes.contains(&c.as_str()))
    }
}

/// A complex selector: compounds joined by descendant or child combinators.
#[derive(Debug, Clone, PartialEq)]
struct Selector {
    /// Left to right; each combinator links a compound to the one before it.
    parts: Vec<(Combinator, Compound)>,
}

impl Selector {
    fn parse(s: &str) -> Option<Self> {
        let spaced = s.replace('>', " > ");
        let mut parts = Vec::new();
        let mut combinator = Combinator::Descendant;
        for token in spaced.split_whitespace() {
            if token == ">" {
                if parts.is_empty() {
                    return None;
                }
                combinator = Combinator::Child;
                continue;
            }
            parts.push((combinator, Compound::parse(token)?));
            combinator = Combinator::Descendant;
        }
        if parts.is_empty() || combinator == Combinator::Child {
            return None;
        }
        Some(Self { parts })
    }

    fn specificity(&self) -> (u32, u32, u32) {
        self.parts.iter().fold((0, 0, 0), |(a, b, c), (_, p)| {
            (
                a + p.id.is_some() as u32,
                b + p.classes.len() as u32,
                c + p.name.is_some() as u32,
            )
        })
    }

    fn matches(&self, el: &ElementNode, ancestors: &[&ElementNode]) -> bool {
        match_parts(&self.parts, el, ancestors)
    }
}

fn match_parts(
    parts: &[(Combinator, Compound)],
    el: &ElementNode,
    ancestors: &[&ElementNode],
) -> bool {
    let Some(((combinator, last), rest)) = parts.split_last() else {
        return true;
    };
    if !last.matches(el) {
        return false;
    }
    if rest.is_empty() {
        return true;
    }
    match combinator {
        Combinator::Child => match ancestors.split_last() {
            Some((parent, up)) => match_parts(rest, parent, up),
            None => false,
        },
        Combinator::Descendant => (0..ancestors.len())
            .rev()
            .any(|i| match_parts(rest, ancestors[i], &ancestors[..i])),
    }
}

#[derive(Debug, Clone)]
struct Rule {
    selector: Selector,
    specificity: (u32, u32, u32),
    order: usize,
    declarations: Vec<(String, String)>,
}

/// Page geometry requested by an `@page` rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRule {
    /// Width and height in points.
    pub size: Option<(f32, f32)>,
    pub orientation: Option<PageOrientation>,
    /// Top, right, bottom, left margins in points.
    pub margin: Option<[f32; 4]>,
}

impl PageRule {
    fn apply(&mut self, prop: &str, val: &str) {
        match prop {
            "size" => {
                let mut lengths = Vec::new();
                for tok in val.split_whitespace() {
                    match tok.to_ascii_lowercase().as_str() {
                        "landscape" => self.orientation = Some(PageOrientation::Landscape),
                        "portrait" => self.orientation = Some(PageOrientation::Portrait),
                        "a3" => self.size = Some((841.89, 1190.55)),
                        "a4" => self.size = Some((595.28, 841.89)),
                        "a5" => self.size = Some((419.53, 595.28)),
                        "letter" => self.size = Some((612.0, 792.0)),
                        "legal" => self.size = Some((612.0, 1008.0)),
                        other => {
                            if let Some(l) = parse_length(other, 12.0) {
                                lengths.push(l);
                            }
                        }
                    }
                }
                match lengths.as_slice() {
                    [side] => self.size = Some((*side, *side)),
                    [w, h] => self.size = Some((*w, *h)),
                    _ => {}
                }
            }
            "margin" => {
                if let Some(m) = shorthand_box(val, 12.0) {
                    self.margin = Some(m);
                }
            }
            "margin-top" | "margin-right" | "margin-bottom" | "margin-left" => {
                if let Some(v) = parse_length(val, 12.0) {
                    let m = self.margin.get_or_insert([0.0; 4]);
                    let idx = match prop {
                        "margin-top" => 0,
                        "margin-right" => 1,
                        "margin-bottom" => 2,
                        _ => 3,
                    };
                    m[idx] = v;
                }
            }
            _ => log::debug!("ignoring @page property '{prop}'"),
        }
    }

    /// Page width and height after applying the orientation keyword.
    pub fn dimensions(&self, default: (f32, f32)) -> (f32, f32) {
        let (w, h) = self.size.unwrap_or(default);
        match self.orientation {
            Some(PageOrientation::Landscape) => (w.max(h), w.min(h)),
            Some(PageOrientation::Portrait) => (w.min(h), w.max(h)),
            None => (w, h),
        }
    }

    fn merge(&mut self, other: PageRule) {
        if other.size.is_some() {
            self.size = other.size;
        }
        if other.orientation.is_some() {
            self.orientation = other.orientation;
        }
        if other.margin.is_some() {
            self.margin = other.margin;
        }
    }
}

/// All style rules of a document, in source order.
#[derive(Debug, Clone, Default)]
pub struct Stylesheet {
    rules: Vec<Rule>,
    page: PageRule,
}

impl Stylesheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse CSS text. Unsupported selectors and at-rules are skipped.
    pub fn parse(css: &str) -> Self {
        let mut sheet = Self::new();
        sheet.add_css(css);
        sheet
    }

    /// Append the rules of another stylesheet; they follow existing rules in
    /// source order.
    pub fn add_css(&mut self, css: &str) {
        let css = strip_comments(css);
        let mut rest = css.as_str();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            if let Some(at) = rest.strip_prefix('@') {
                let name_end = at
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                    .unwrap_or(at.len());
                let name = at[..name_end].to_ascii_lowercase();
                let brace = at.find('{');
                let semi = at.find(';');
                match (brace, semi) {
                    // Statement at-rule such as @import or @charset.
                    (b, Some(s)) if b.map_or(true, |b| s < b) => {
                        log::debug!("ignoring @{name} statement");
                        rest = &at[s + 1..];
                    }
                    (Some(b), _) => {
                        let (body, after) = split_block(&at[b + 1..]);
                        if name == "page" {
                            let mut page = PageRule::default();
                            for (prop, val) in parse_declarations(body) {
                                page.apply(&prop, &val);
                            }
                            self.page.merge(page);
                        } else {
                            log::debug!("ignoring @{name} block");
                        }
                        rest = after;
                    }
                    _ => break,
                }
                continue;
            }
            let Some(brace) = rest.find('{') else {
                break;
            };
            let selectors = &rest[..brace];
            let (body, after) = split_block(&rest[brace + 1..]);
            let declarations = parse_declarations(body);
            for sel in selectors.split(',') {
                match Selector::parse(sel) {
                    Some(selector) => {
                        let order = self.rules.len();
                        self.rules.push(Rule {
                            specificity: selector.specificity(),
                            selector,
                            order,
                            declarations: declarations.clone(),
                        });
                    }
                    None => log::debug!("skipping unsupported selector '{}'", sel.trim()),
                }
            }
            rest = after;
        }
    }

    pub fn page(&self) -> &PageRule {
        &self.page
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Declarations of matching rules, lowest precedence first.
    fn matching_declarations(
        &self,
        el: &ElementNode,
        ancestors: &[&ElementNode],
    ) -> Vec<&(String, String)> {
        let mut matched: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|r| r.selector.matches(el, ancestors))
            .collect();
        matched.sort_by_key(|r| (r.specificity, r.order));
        matched.iter().flat_map(|r| r.declarations.iter()).collect()
    }
}

fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => rest = "",
        }
    }
    out.push_str(rest);
    out
}

/// Split `body } rest` at the brace closing the current block.
fn split_block(s: &str) -> (&str, &str) {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return (&s[..i], &s[i + 1..]),
            '}' => depth -= 1,
            _ => {}
        }
    }
    (s, "")
}

fn parse_declarations(body: &str) -> Vec<(String, String)> {
    body.split(';')
        .filter_map(|decl| {
            let (prop, val) = decl.split_once(':')?;
            let prop = prop.trim().to_ascii_lowercase();
            let val = val.trim().trim_end_matches("!important").trim();
            if prop.is_empty() || val.is_empty() {
                None
            } else {
                Some((prop, val.to_string()))
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Style resolution
// ---------------------------------------------------------------------------

/// Resolve the style for an element given its ancestors (outermost first).
pub fn resolve_style(
    element: &ElementNode,
    ancestors: &[&ElementNode],
    parent: Option<&ComputedStyle>,
    sheet: &Stylesheet,
) -> ComputedStyle {
    let mut style = match parent {
        Some(p) => ComputedStyle::inherit_from(p),
        None => ComputedStyle::default(),
    };
    apply_tag_defaults(&mut style, &element.tag);

    for (prop, val) in sheet.matching_declarations(element, ancestors) {
        apply_css_property(&mut style, prop, val);
    }

    if let Some(inline) = element.inline_style() {
        apply_inline_style(&mut style, inline);
    }

    style
}

/// Default styles based on tag semantics.
fn apply_tag_defaults(s: &mut ComputedStyle, tag: &Tag) {
    let heading = |s: &mut ComputedStyle, size: f32, before: f32, after: f32| {
        s.font_size = size;
        s.font_weight = FontWeight::Bold;
        s.margin_top = before;
        s.margin_bottom = after;
    };
    match tag {
        Tag::H1 => heading(s, 24.0, 12.0, 9.0),
        Tag::H2 => heading(s, 18.0, 10.0, 7.0),
        Tag::H3 => heading(s, 15.0, 9.0, 6.0),
        Tag::H4 => heading(s, 13.0, 8.0, 5.0),
        Tag::H5 | Tag::H6 => heading(s, 12.0, 6.0, 4.0),
        Tag::P => {
            s.margin_bottom = 8.0;
        }
        Tag::Ul | Tag::Ol => {
            s.margin_bottom = 8.0;
            s.padding_left = 20.0;
        }
        Tag::Li => {
            s.display = Display::ListItem;
            s.margin_bottom = 3.0;
        }
        Tag::Table => {
            s.display = Display::Grid;
            s.border_width = 1.0;
        }
        Tag::Tr => {
            s.display = Display::TableRow;
        }
        Tag::Td | Tag::Th => {
            s.display = Display::TableCell;
            s.padding_top = 3.0;
            s.padding_right = 6.0;
            s.padding_bottom = 3.0;
            s.padding_left = 6.0;
            s.border_width = 1.0;
            if *tag == Tag::Th {
                s.font_weight = FontWeight::Bold;
                s.background_color = Color::rgb(0.93, 0.93, 0.93);
            }
        }
        Tag::Span | Tag::Br => s.display = Display::Inline,
        Tag::Strong => {
            s.display = Display::Inline;
            s.font_weight = FontWeight::Bold;
        }
        Tag::Em => {
            s.display = Display::Inline;
            s.font_style = FontStyle::Italic;
        }
        Tag::U | Tag::A => {
            s.display = Display::Inline;
            s.text_decoration = TextDecoration::Underline;
        }
        Tag::Hr => {
            s.height = Dimension::Px(0.75);
            s.margin_top = 6.0;
            s.margin_bottom = 6.0;
            s.background_color = Color::rgb(0.6, 0.6, 0.6);
        }
        Tag::Img => {
            s.display = Display::InlineBlock;
        }
        Tag::Div | Tag::Body | Tag::Html | Tag::Head => {}
        Tag::Unknown(_) => {
            s.display = Display::None;
        }
    }
}
// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

fn apply_inline_style(s: &mut ComputedStyle, style_str: &str) {
    for (prop, val) in parse_declarations(style_str) {
        apply_css_property(s, &prop, &val);
    }
}

fn is_break(val: &str) -> bool {
    matches!(val, "always" | "page" | "left" | "right")
}

fn apply_css_property(s: &mut ComputedStyle, prop: &str, val: &str) {
    let fs = s.font_size;
    let len = |v: &str| parse_length(v, fs);
    match prop {
        "display" => {
            s.display = match val {
                "flex" => Display::Flex,
                "grid" => Display::Grid,
                "block" => Display::Block,
                "inline" => Display::Inline,
                "inline-block" => Display::InlineBlock,
                "list-item" => Display::ListItem,
                "none" => Display::None,
                _ => s.display,
            }
        }
        "flex-direction" => {
            s.flex_direction = match val {
                "row" => FlexDirection::Row,
                "column" => FlexDirection::Column,
                _ => s.flex_direction,
            }
        }
        "flex-wrap" => {
            s.flex_wrap = match val {
                "wrap" => FlexWrap::Wrap,
                _ => FlexWrap::NoWrap,
            }
        }
        "flex-grow" => s.flex_grow = val.parse().unwrap_or(s.flex_grow),
        "grid-template-columns" => {
            s.grid_template_columns = val
                .split_whitespace()
                .filter_map(|t| match t {
                    "auto" => Some(GridTrack::Auto),
                    _ => match t.strip_suffix("fr") {
                        Some(fr) => fr.parse().ok().map(GridTrack::Fr),
                        None => len(t).map(GridTrack::Px),
                    },
                })
                .collect();
        }
        "flex-shrink" => s.flex_shrink = val.parse().unwrap_or(s.flex_shrink),
        "justify-content" => {
            s.justify_content = match val {
                "flex-start" | "start" => JustifyContent::Start,
                "flex-end" | "end" => JustifyContent::End,
                "center" => JustifyContent::Center,
                "space-between" => JustifyContent::SpaceBetween,
                "space-around" => JustifyContent::SpaceAround,
                "space-evenly" => JustifyContent::SpaceEvenly,
                _ => s.justify_content,
            }
        }
        "align-items" => {
            s.align_items = match val {
                "flex-start" | "start" => AlignItems::Start,
                "flex-end" | "end" => AlignItems::End,
                "center" => AlignItems::Center,
                "stretch" => AlignItems::Stretch,
                _ => s.align_items,
            }
        }
        "font-size" => {
            if let Some(pct) = val.strip_suffix('%').and_then(|p| p.trim().parse::<f32>().ok()) {
                s.font_size = fs * pct / 100.0;
            } else if let Some(v) = len(val) {
                s.font_size = v;
            }
        }
        "font-weight" => {
            s.font_weight = match val {
                "bold" | "bolder" | "600" | "700" | "800" | "900" => FontWeight::Bold,
                _ => FontWeight::Normal,
            }
        }
        "font-style" => {
            s.font_style = match val {
                "italic" | "oblique" => FontStyle::Italic,
                _ => FontStyle::Normal,
            }
        }
        "font-family" => {
            if let Some(family) = first_family(val) {
                s.font_family = family;
            }
        }
        "color" => {
            if let Some(c) = Color::parse(val) {
                s.color = c;
            }
        }
        "background-color" | "background" => {
            if let Some(c) = val.split_whitespace().find_map(Color::parse) {
                s.background_color = c;
            }
        }
        "text-align" => {
            s.text_align = match val {
                "center" => TextAlign::Center,
                "right" | "end" => TextAlign::Right,
                _ => TextAlign::Left,
            }
        }
        "text-decoration" | "text-decoration-line" => {
            s.text_decoration = if val.split_whitespace().any(|t| t == "underline") {
                TextDecoration::Underline
            } else {
                TextDecoration::None
            }
        }
        "width" => s.width = parse_dimension(val, fs),
        "height" => s.height = parse_dimension(val, fs),
        "min-width" => s.min_width = parse_dimension(val, fs),
        "max-width" => s.max_width = parse_dimension(val, fs),
        "margin" => {
            if let Some(v) = shorthand_box(val, fs) {
                set_box(&mut s.margin_top, &mut s.margin_right, &mut s.margin_bottom, &mut s.margin_left, v);
            }
        }
        "margin-top" => s.margin_top = len(val).unwrap_or(s.margin_top),
        "margin-right" => s.margin_right = len(val).unwrap_or(s.margin_right),
        "margin-bottom" => s.margin_bottom = len(val).unwrap_or(s.margin_bottom),
        "margin-left" => s.margin_left = len(val).unwrap_or(s.margin_left),
        "padding" => {
            if let Some(v) = shorthand_box(val, fs) {
                set_box(&mut s.padding_top, &mut s.padding_right, &mut s.padding_bottom, &mut s.padding_left, v);
            }
        }
        "padding-top" => s.padding_top = len(val).unwrap_or(s.padding_top),
        "padding-right" => s.padding_right = len(val).unwrap_or(s.padding_right),
        "padding-bottom" => s.padding_bottom = len(val).unwrap_or(s.padding_bottom),
        "padding-left" => s.padding_left = len(val).unwrap_or(s.padding_left),
        "border" => {
            for tok in val.split_whitespace() {
                if tok == "none" || tok == "hidden" {
                    s.border_width = 0.0;
                } else if let Some(w) = len(tok) {
                    s.border_width = w;
                } else if let Some(c) = Color::parse(tok) {
                    s.border_color = c;
                } else if tok == "thin" {
                    s.border_width = 0.75;
                }
            }
        }
        "border-width" => s.border_width = len(val).unwrap_or(s.border_width),
        "border-color" => {
            if let Some(c) = Color::parse(val) {
                s.border_color = c;
            }
        }
        "line-height" => {
            if let Ok(v) = val.parse::<f32>() {
                s.line_height = v;
            } else if let Some(v) = len(val) {
                if fs > 0.0 {
                    s.line_height = v / fs;
                }
            }
        }
        "gap" => s.gap = len(val).unwrap_or(s.gap),
        "break-before" | "page-break-before" => s.page_break_before = is_break(val),
        "break-after" | "page-break-after" => s.page_break_after = is_break(val),
        "break-inside" | "page-break-inside" => s.page_break_inside_avoid = val.starts_with("avoid"),
        _ => {}
    }
}

/// First entry of a `font-family` list, quotes stripped.
fn first_family(val: &str) -> Option<String> {
    let first = val.split(',').next()?.trim();
    let unquoted = first.trim_matches(|c| c == '"' || c == '\'').trim();
    (!unquoted.is_empty()).then(|| unquoted.to_string())
}

/// Expand a 1-4 value box shorthand into top, right, bottom, left.
fn shorthand_box(val: &str, font_size: f32) -> Option<[f32; 4]> {
    let parts: Vec<f32> = val
        .split_whitespace()
        .map(|p| if p == "auto" { Some(0.0) } else { parse_length(p, font_size) })
        .collect::<Option<Vec<f32>>>()?;
    match parts.as_slice() {
        [a] => Some([*a; 4]),
        [v, h] => Some([*v, *h, *v, *h]),
        [t, h, b] => Some([*t, *h, *b, *h]),
        [t, r, b, l] => Some([*t, *r, *b, *l]),
        _ => None,
    }
}

fn set_box(top: &mut f32, right: &mut f32, bottom: &mut f32, left: &mut f32, v: [f32; 4]) {
    *top = v[0];
    *right = v[1];
    *bottom = v[2];
    *left = v[3];
}

// ---------------------------------------------------------------------------
// Styled DOM tree
// ---------------------------------------------------------------------------

/// Copy of `style` for a run of text: the typography stays, box-model
/// properties belong to the enclosing element.
pub fn text_style(style: &ComputedStyle) -> ComputedStyle {
    let mut s = style.clone();
    s.display = Display::Inline;
    s.border_width = 0.0;
    s.background_color = Color::TRANSPARENT;
    set_box(&mut s.margin_top, &mut s.margin_right, &mut s.margin_bottom, &mut s.margin_left, [0.0; 4]);
    set_box(&mut s.padding_top, &mut s.padding_right, &mut s.padding_bottom, &mut s.padding_left, [0.0; 4]);
    s.width = Dimension::Auto;
    s.height = Dimension::Auto;
    s.min_width = Dimension::Auto;
    s.max_width = Dimension::Auto;
    s.flex_grow = 0.0;
    s.page_break_before = false;
    s.page_break_after = false;
    s.page_break_inside_avoid = false;
    s
}

/// A DOM node annotated with its computed style.
#[derive(Debug, Clone)]
pub enum StyledNode {
    Element {
        tag: Tag,
        style: ComputedStyle,
        children: Vec<StyledNode>,
        /// Original attributes (for images src, etc.)
        attrs: HashMap<String, String>,
    },
    Text {
        text: String,
        style: ComputedStyle,
    },
}

/// Style a document body. The body's own style (from `body`/`html` rules) is
/// the root of inheritance.
pub fn style_body(body: &[DomNode], sheet: &Stylesheet) -> Vec<StyledNode> {
    let html = ElementNode::new("html");
    let body_el = ElementNode::new("body");
    let html_style = resolve_style(&html, &[], None, sheet);
    let body_style = resolve_style(&body_el, &[&html], Some(&html_style), sheet);
    let mut ancestors = vec![&html, &body_el];
    build_styled(body, Some(&body_style), sheet, &mut ancestors)
}

/// Build a styled tree from a DOM tree, resolving styles top-down.
pub fn build_styled_tree(
    nodes: &[DomNode],
    parent_style: Option<&ComputedStyle>,
    sheet: &Stylesheet,
) -> Vec<StyledNode> {
    build_styled(nodes, parent_style, sheet, &mut Vec::new())
}

fn build_styled<'a>(
    nodes: &'a [DomNode],
    parent_style: Option<&ComputedStyle>,
    sheet: &Stylesheet,
    ancestors: &mut Vec<&'a ElementNode>,
) -> Vec<StyledNode> {
    let mut result = Vec::new();
    for node in nodes {
        match node {
            DomNode::Element(e) => {
                let style = resolve_style(e, ancestors, parent_style, sheet);
                ancestors.push(e);
                let children = build_styled(&e.children, Some(&style), sheet, ancestors);
                ancestors.pop();
                result.push(StyledNode::Element {
                    tag: e.tag.clone(),
                    style,
                    children,
                    attrs: e.attributes.clone(),
                });
            }
            DomNode::Text(text) => {
                // Whitespace-only runs are kept; they separate inline siblings.
                if !text.is_empty() {
                    let style = text_style(&parent_style.cloned().unwrap_or_default());
                    result.push(StyledNode::Text {
                        text: text.clone(),
                        style,
                    });
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_fragment;

    fn first_element(nodes: &[StyledNode]) -> &StyledNode {
        nodes
            .iter()
            .find(|n| matches!(n, StyledNode::Element { .. }))
            .expect("element")
    }

    fn style_of(node: &StyledNode) -> &ComputedStyle {
        match node {
            StyledNode::Element { style, .. } | StyledNode::Text { style, .. } => style,
        }
    }

    #[test]
    fn class_names_alone_do_not_style() {
        let nodes = parse_fragment(r#"<div class="hidden p-4 text-red w-1/2">x</div>"#).unwrap();
        let styled = style_body(&nodes, &Stylesheet::new());
        let div = style_of(first_element(&styled));
        assert_eq!(div.display, Display::Block);
        assert_eq!(div.padding_top, 0.0);
        assert_eq!(div.color, Color::BLACK);
        assert_eq!(div.width, Dimension::Auto);
    }

    #[test]
    fn inline_style_font_size() {
        let mut s = ComputedStyle::default();
        apply_inline_style(&mut s, "font-size: 24px; color: #ff0000");
        assert_eq!(s.font_size, 24.0);
        assert!((s.color.r - 1.0).abs() < 0.01);
    }

    #[test]
    fn colors() {
        let c = Color::from_hex("#ff8800").unwrap();
        assert!((c.g - 0.533).abs() < 0.01);
        assert_eq!(Color::parse("navy"), Color::from_hex("000080"));
        let c = Color::parse("rgb(255, 0, 51)").unwrap();
        assert!((c.b - 0.2).abs() < 0.01);
        assert!(Color::parse("rgba(0,0,0,0)").unwrap().is_transparent());
        assert!(Color::parse("not-a-colour").is_none());
    }

    #[test]
    fn lengths() {
        assert_eq!(parse_length("12pt", 10.0), Some(12.0));
        assert_eq!(parse_length("1.5em", 10.0), Some(15.0));
        assert!((parse_length("25.4mm", 10.0).unwrap() - 72.0).abs() < 0.01);
        assert_eq!(parse_length("12quux", 10.0), None);
    }

    #[test]
    fn selector_specificity_and_order() {
        let sheet = Stylesheet::parse(
            "/* c */ p { color: red } .note { color: blue } div p.note { color: green } p { font-size: 20pt }",
        );
        let nodes = parse_fragment(r#"<div><p class="note">x</p><p>y</p></div>"#).unwrap();
        let styled = build_styled_tree(&nodes, None, &sheet);
        let StyledNode::Element { children, .. } = first_element(&styled) else {
            unreachable!()
        };
        let note = style_of(&children[0]);
        assert_eq!(note.color, Color::parse("green").unwrap());
        assert_eq!(note.font_size, 20.0);
        let plain = style_of(&children[1]);
        assert_eq!(plain.color, Color::parse("red").unwrap());
    }

    #[test]
    fn child_combinator_and_ids() {
        let sheet = Stylesheet::parse("section > p { color: red } #lead { font-weight: bold }");
        let nodes =
            parse_fragment(r#"<section><div><p>deep</p></div><p id="lead">near</p></section>"#)
                .unwrap();
        let styled = build_styled_tree(&nodes, None, &sheet);
        let StyledNode::Element { children, .. } = first_element(&styled) else {
            unreachable!()
        };
        let StyledNode::Element { children: inner, .. } = &children[0] else {
            unreachable!()
        };
        assert_eq!(style_of(&inner[0]).color, Color::BLACK);
        assert_eq!(style_of(&children[1]).color, Color::parse("red").unwrap());
        assert_eq!(style_of(&children[1]).font_weight, FontWeight::Bold);
    }

    #[test]
    fn inline_style_beats_sheet_and_family_is_inherited() {
        let sheet = Stylesheet::parse("body { font-family: 'DejaVu Sans', sans-serif } p { color: red }");
        let nodes = parse_fragment(r#"<p style="color: blue">x</p>"#).unwrap();
        let styled = style_body(&nodes, &sheet);
        let p = style_of(first_element(&styled));
        assert_eq!(p.color, Color::parse("blue").unwrap());
        assert_eq!(p.font_family, "DejaVu Sans");
    }

    #[test]
    fn unsupported_selectors_are_skipped() {
        let sheet = Stylesheet::parse("a:hover { color: red } input[type=text] { x: y } p { color: blue }");
        assert_eq!(sheet.rule_count(), 1);
    }

    #[test]
    fn page_rule() {
        let sheet = Stylesheet::parse(
            "@import url(x.css); @media print { p { color: red } } @page { size: A4 landscape; margin: 20mm 10mm }",
        );
        assert_eq!(sheet.rule_count(), 0);
        let page = sheet.page();
        let (w, h) = page.dimensions((1.0, 1.0));
        assert!(w > h);
        let m = page.margin.unwrap();
        assert!((m[0] - 20.0 * PT_PER_MM).abs() < 0.01);
        assert!((m[1] - 10.0 * PT_PER_MM).abs() < 0.01);
    }

    #[test]
    fn grid_columns_from_css() {
        let mut s = ComputedStyle::default();
        apply_inline_style(&mut s, "display: grid; grid-template-columns: 1fr 2fr 50pt auto");
        assert_eq!(s.display, Display::Grid);
        assert_eq!(
            s.grid_template_columns,
            vec![GridTrack::Fr(1.0), GridTrack::Fr(2.0), GridTrack::Px(50.0), GridTrack::Auto]
        );
    }

    #[test]
    fn page_break_properties() {
        let mut s = ComputedStyle::default();
        apply_inline_style(&mut s, "page-break-before: always; break-after: page");
        assert!(s.page_break_before && s.page_break_after);
    }
}
