//! Layout engine – uses Taffy to compute flexbox / grid layout from a styled
//! DOM tree, then converts the result into a tree of positioned boxes in
//! document coordinates (one endless page of content width).

use std::collections::HashMap;
use taffy::prelude::*;

use crate::dom::Tag;
use crate::error::{Error, Result};
use crate::fonts::{wrap_text, FontManager};
use crate::layout_config::PageGeometry;
use crate::style::{self, ComputedStyle, FontStyle as CssFontStyle, FontWeight, StyledNode};

/// Intrinsic pixel size of every image, keyed by its `src` reference.
pub type ImageSizes = HashMap<String, (u32, u32)>;

// ---------------------------------------------------------------------------
// Intermediate layout tree (pre-pagination)
// ---------------------------------------------------------------------------

/// A positioned box in document coordinates (before page splitting).
#[derive(Debug, Clone)]
pub struct PositionedBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Element the box was built from; `None` for text runs and the root.
    pub tag: Option<Tag>,
    pub style: ComputedStyle,
    pub content: BoxContent,
    pub children: Vec<PositionedBox>,
    pub page_break_before: bool,
    pub page_break_after: bool,
    pub page_break_inside_avoid: bool,
}

impl PositionedBox {
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// `true` if this box or any descendant forces a page break.
    pub fn has_forced_break(&self) -> bool {
        self.page_break_before
            || self.page_break_after
            || self.children.iter().any(PositionedBox::has_forced_break)
    }
}

#[derive(Debug, Clone)]
pub enum BoxContent {
    None,
    Text {
        text: String,
        lines: Vec<String>,
    },
    Image {
        src: String,
    },
    /// List item marker
    ListItem {
        marker: String,
    },
}

fn layout_error(e: taffy::TaffyError) -> Error {
    Error::Layout(e.to_string())
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

/// Collapse runs of whitespace to one space and trim each line break.
fn collapse_whitespace(text: &str) -> String {
    text.split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_hidden(node: &StyledNode) -> bool {
    matches!(node, StyledNode::Element { style, .. } if style.display == style::Display::None)
}

fn same_text_style(a: &ComputedStyle, b: &ComputedStyle) -> bool {
    a.font_size == b.font_size
        && a.font_weight == b.font_weight
        && a.font_style == b.font_style
        && a.font_family == b.font_family
        && a.color == b.color
        && a.text_decoration == b.text_decoration
}

// ---------------------------------------------------------------------------
// Build Taffy tree from styled nodes
// ---------------------------------------------------------------------------

struct LayoutBuilder<'a> {
    taffy: TaffyTree<()>,
    fonts: &'a FontManager,
    images: &'a ImageSizes,
    node_styles: HashMap<NodeId, ComputedStyle>,
    node_content: HashMap<NodeId, BoxContent>,
    node_tags: HashMap<NodeId, Tag>,
    available_width: f32,
}

impl<'a> LayoutBuilder<'a> {
    fn new(fonts: &'a FontManager, images: &'a ImageSizes, available_width: f32) -> Self {
        Self {
            taffy: TaffyTree::new(),
            fonts,
            images,
            node_styles: HashMap::new(),
            node_content: HashMap::new(),
            node_tags: HashMap::new(),
            available_width,
        }
    }

    /// Collect the text of an inline subtree. Source whitespace becomes
    /// spaces; `<br>` becomes a line break.
    fn collect_inline_text(node: &StyledNode, out: &mut String) {
        match node {
            StyledNode::Text { text, .. } => {
                out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }))
            }
            StyledNode::Element { tag: Tag::Br, .. } => out.push('\n'),
            StyledNode::Element { children, .. } => {
                for c in children.iter().filter(|c| !is_hidden(c)) {
                    Self::collect_inline_text(c, out);
                }
            }
        }
    }

    /// Styles of the non-blank text runs in an inline subtree.
    fn collect_text_styles<'n>(nodes: &'n [StyledNode], out: &mut Vec<&'n ComputedStyle>) {
        for n in nodes {
            match n {
                StyledNode::Text { text, style } if !text.trim().is_empty() => out.push(style),
                StyledNode::Text { .. } => {}
                StyledNode::Element { children, .. } => {
                    if !is_hidden(n) {
                        Self::collect_text_styles(children, out)
                    }
                }
            }
        }
    }

    /// Return true when every child is a text node or an inline element
    /// (no block-level children and no images).
    fn all_inline(children: &[StyledNode]) -> bool {
        children.iter().all(|c| match c {
            StyledNode::Text { .. } => true,
            StyledNode::Element { tag: Tag::Img, .. } => false,
            StyledNode::Element {
                style,
                children: gc,
                ..
            } => {
                matches!(
                    style.display,
                    style::Display::Inline | style::Display::InlineBlock | style::Display::None
                ) && Self::all_inline(gc)
            }
        })
    }

    fn build_node(&mut self, styled: &StyledNode, parent_width: f32) -> Result<Option<NodeId>> {
        match styled {
            StyledNode::Text { text, style } => {
                let collapsed = collapse_whitespace(&text.replace('\n', " "));
                if collapsed.is_empty() {
                    return Ok(None);
                }
                self.build_text_node(&collapsed, style, parent_width).map(Some)
            }
            StyledNode::Element { style, .. } if style.display == style::Display::None => Ok(None),
            StyledNode::Element {
                tag,
                style,
                children,
                attrs,
            } => self
                .build_element_node(tag, style, children, attrs, parent_width)
                .map(Some),
        }
    }

    fn build_text_node(
        &mut self,
        text: &str,
        style: &ComputedStyle,
        parent_width: f32,
    ) -> Result<NodeId> {
        let bold = style.font_weight == FontWeight::Bold;
        let italic = style.font_style == CssFontStyle::Italic;
        let family = &style.font_family;
        let font_size = style.font_size;
        let line_height_pt = font_size * style.line_height;

        // Word-wrap the text
        let max_w = if parent_width > 0.0 {
            parent_width
        } else {
            self.available_width
        };
        let lines = wrap_text(text, font_size, bold, italic, family, max_w, self.fonts);

        let text_width = lines
            .iter()
            .map(|l| {
                self.fonts
                    .measure_text_width(l, font_size, bold, italic, family)
            })
            .fold(0.0f32, f32::max);
        let text_height = lines.len() as f32 * line_height_pt;

        // Aligned text spans the full line so the offset has room to act.
        let width = match style.text_align {
            style::TextAlign::Left => Dimension::Length(text_width),
            _ => Dimension::Length(max_w.max(text_width)),
        };
        let taffy_style = Style {
            size: Size {
                width,
                height: Dimension::Length(text_height),
            },
            flex_shrink: 0.0,
            ..Default::default()
        };

        let node = self.taffy.new_leaf(taffy_style).map_err(layout_error)?;
        self.node_styles.insert(node, style.clone());
        self.node_content.insert(
            node,
            BoxContent::Text {
                text: text.to_string(),
                lines,
            },
        );
        Ok(node)
    }

    fn build_element_node(
        &mut self,
        tag: &Tag,
        style: &ComputedStyle,
        children: &[StyledNode],
        attrs: &HashMap<String, String>,
        parent_width: f32,
    ) -> Result<NodeId> {
        // Compute the width available for children
        let my_width = match style.width {
            style::Dimension::Px(w) => w,
            style::Dimension::Percent(p) => parent_width * p / 100.0,
            style::Dimension::Auto => parent_width - style.margin_left - style.margin_right,
        };
        let inner_width =
            my_width - style.padding_left - style.padding_right - 2.0 * style.border_width;

        let mut child_nodes = Vec::new();

        // Block elements whose children are all inline get their text merged
        // into a single wrapped run so spans flow within the line.
        let merge_inline = *tag != Tag::Img
            && !matches!(style.display, style::Display::Inline)
            && !children.is_empty()
            && Self::all_inline(children);

        if merge_inline {
            let mut raw = String::new();
            for c in children {
                Self::collect_inline_text(c, &mut raw);
            }
            let combined = collapse_whitespace(&raw);
            if !combined.trim().is_empty() {
                let mut styles = Vec::new();
                Self::collect_text_styles(children, &mut styles);
                let run_style = match styles.split_first() {
                    Some((first, rest)) if rest.iter().all(|s| same_text_style(s, first)) => {
                        let mut s = style::text_style(first);
                        s.text_align = style.text_align;
                        s.line_height = style.line_height;
                        s
                    }
                    _ => style::text_style(style),
                };
                child_nodes.push(self.build_text_node(&combined, &run_style, inner_width)?);
            }
        } else {
            // Estimate per-child width for flex-row containers and table rows
            // so that text is word-wrapped to the right column width at build
            // time.
            let is_flex_row = style.display == style::Display::Flex
                && style.flex_direction == style::FlexDirection::Row;
            let is_table_row = *tag == Tag::Tr;

            let elem_child_count = children
                .iter()
                .filter(|c| matches!(c, StyledNode::Element { .. }) && !is_hidden(c))
                .count()
                .max(1);

            let child_build_width = if is_flex_row || is_table_row {
                let gap_total = style.gap * (elem_child_count.saturating_sub(1)) as f32;
                ((inner_width - gap_total) / elem_child_count as f32).max(1.0)
            } else {
                inner_width
            };

            let mut list_counter = 0u32;
            for child in children {
                // List items get their bullet / number recorded so it can be
                // rendered in the left gutter.
                let li_marker = match child {
                    StyledNode::Element { tag: Tag::Li, .. } if !is_hidden(child) => {
                        list_counter += 1;
                        Some(if *tag == Tag::Ol {
                            format!("{list_counter}. ")
                        } else {
                            "\u{2022} ".to_string()
                        })
                    }
                    _ => None,
                };

                let Some(child_id) = self.build_node(child, child_build_width)? else {
                    continue;
                };
                if let Some(marker) = li_marker {
                    self.node_content
                        .insert(child_id, BoxContent::ListItem { marker });
                }
                child_nodes.push(child_id);
            }
        }

        // Images with an auto side take it from the intrinsic size; without
        // this an empty flex container computes to 0×0.
        let style_override = if *tag == Tag::Img {
            let src = attrs.get("src").map(String::as_str).unwrap_or("");
            self.images
                .get(src)
                .and_then(|&size| resolve_img_auto_dimensions(size, style, parent_width))
        } else {
            None
        };

        let effective_style = style_override.as_ref().unwrap_or(style);
        let taffy_style = self.computed_to_taffy(effective_style, tag);
        let node = self
            .taffy
            .new_with_children(taffy_style, &child_nodes)
            .map_err(layout_error)?;
        self.node_styles.insert(node, effective_style.clone());
        self.node_tags.insert(node, tag.clone());

        if let Some(src) = attrs.get("src").filter(|s| *tag == Tag::Img && !s.is_empty()) {
            self.node_content
                .insert(node, BoxContent::Image { src: src.clone() });
        }

        Ok(node)
    }

    fn computed_to_taffy(&self, s: &ComputedStyle, tag: &Tag) -> Style {
        let margin = Rect {
            top: LengthPercentageAuto::Length(s.margin_top),
            right: LengthPercentageAuto::Length(s.margin_right),
            bottom: LengthPercentageAuto::Length(s.margin_bottom),
            left: LengthPercentageAuto::Length(s.margin_left),
        };
        let padding = Rect {
            top: LengthPercentage::Length(s.padding_top),
            right: LengthPercentage::Length(s.padding_right),
            bottom: LengthPercentage::Length(s.padding_bottom),
            left: LengthPercentage::Length(s.padding_left),
        };
        let border = Rect {
            top: LengthPercentage::Length(s.border_width),
            right: LengthPercentage::Length(s.border_width),
            bottom: LengthPercentage::Length(s.border_width),
            left: LengthPercentage::Length(s.border_width),
        };

        // HTML table model: always flex regardless of computed display.
        match tag {
            Tag::Table => {
                return Style {
                    display: taffy::Display::Flex,
                    flex_direction: taffy::FlexDirection::Column,
                    size: Size {
                        width: dim_to_taffy(s.width),
                        height: dim_to_taffy(s.height),
                    },
                    min_size: Size {
                        width: Dimension::Length(0.0),
                        height: Dimension::Auto,
                    },
                    flex_shrink: 0.0,
                    padding,
                    margin,
                    ..Default::default()
                };
            }
            Tag::Tr => {
                return Style {
                    display: taffy::Display::Flex,
                    flex_direction: taffy::FlexDirection::Row,
                    align_items: Some(taffy::AlignItems::Stretch),
                    size: Size {
                        width: Dimension::Percent(1.0),
                        height: Dimension::Auto,
                    },
                    min_size: Size {
                        width: Dimension::Length(0.0),
                        height: Dimension::Auto,
                    },
                    flex_shrink: 0.0,
                    margin,
                    ..Default::default()
                };
            }
            Tag::Td | Tag::Th => {
                return Style {
                    display: taffy::Display::Flex,
                    flex_direction: taffy::FlexDirection::Column,
                    flex_grow: 1.0,
                    flex_shrink: 1.0,
                    // equal columns
                    flex_basis: Dimension::Length(0.0),
                    min_size: Size {
                        width: Dimension::Length(0.0),
                        height: Dimension::Auto,
                    },
                    padding,
                    border,
                    ..Default::default()
                };
            }
            _ => {}
        }

        let mut ts = Style::default();
        match s.display {
            style::Display::Flex => {
                ts.display = taffy::Display::Flex;
                ts.flex_direction = match s.flex_direction {
                    style::FlexDirection::Row => taffy::FlexDirection::Row,
                    style::FlexDirection::Column => taffy::FlexDirection::Column,
                };
                ts.flex_wrap = match s.flex_wrap {
                    style::FlexWrap::NoWrap => taffy::FlexWrap::NoWrap,
                    style::FlexWrap::Wrap => taffy::FlexWrap::Wrap,
                };
                ts.justify_content = Some(match s.justify_content {
                    style::JustifyContent::Start => taffy::JustifyContent::Start,
                    style::JustifyContent::End => taffy::JustifyContent::End,
                    style::JustifyContent::Center => taffy::JustifyContent::Center,
                    style::JustifyContent::SpaceBetween => taffy::JustifyContent::SpaceBetween,
                    style::JustifyContent::SpaceAround => taffy::JustifyContent::SpaceAround,
                    style::JustifyContent::SpaceEvenly => taffy::JustifyContent::SpaceEvenly,
                });
                ts.align_items = Some(match s.align_items {
                    style::AlignItems::Start => taffy::AlignItems::Start,
                    style::AlignItems::End => taffy::AlignItems::End,
                    style::AlignItems::Center => taffy::AlignItems::Center,
                    style::AlignItems::Stretch => taffy::AlignItems::Stretch,
                });
            }
            style::Display::Grid => {
                ts.display = taffy::Display::Grid;
                let cols = s.grid_template_columns.len().max(1);
                ts.grid_template_columns = vec![taffy::TrackSizingFunction::from_flex(1.0); cols];
            }
            style::Display::Block
            | style::Display::ListItem
            | style::Display::TableRow
            | style::Display::TableCell
            | style::Display::InlineBlock => {
                // Block-level elements stack vertically.
                ts.display = taffy::Display::Flex;
                ts.flex_direction = taffy::FlexDirection::Column;
            }
            style::Display::Inline => {
                ts.display = taffy::Display::Flex;
                ts.flex_direction = taffy::FlexDirection::Row;
                ts.flex_wrap = taffy::FlexWrap::Wrap;
            }
            style::Display::None => {
                ts.display = taffy::Display::None;
            }
        }

        ts.size = Size {
            width: dim_to_taffy(s.width),
            height: dim_to_taffy(s.height),
        };
        // Allow flex items to compress below their natural content size
        ts.min_size = Size {
            width: if s.flex_grow > 0.0 {
                Dimension::Length(0.0)
            } else {
                dim_to_taffy(s.min_width)
            },
            height: Dimension::Auto,
        };
        ts.max_size = Size {
            width: dim_to_taffy(s.max_width),
            height: Dimension::Auto,
        };

        ts.flex_grow = s.flex_grow;
        // Content flows vertically without limit; only row items may shrink.
        ts.flex_shrink = if s.flex_grow > 0.0 { s.flex_shrink } else { 0.0 };
        ts.margin = margin;
        ts.padding = padding;
        ts.border = border;
        ts.gap = Size {
            width: LengthPercentage::Length(s.gap),
            height: LengthPercentage::Length(s.gap),
        };

        ts
    }

    /// Extract positioned boxes after layout computation.
    fn extract(&self, node: NodeId, offset_x: f32, offset_y: f32) -> Result<PositionedBox> {
        let layout = self.taffy.layout(node).map_err(layout_error)?;
        let style = self.node_styles.get(&node).cloned().unwrap_or_default();
        let content = self
            .node_content
            .get(&node)
            .cloned()
            .unwrap_or(BoxContent::None);

        let x = offset_x + layout.location.x;
        let y = offset_y + layout.location.y;

        let children = self
            .taffy
            .children(node)
            .map_err(layout_error)?
            .iter()
            .map(|&child| self.extract(child, x, y))
            .collect::<Result<Vec<_>>>()?;

        Ok(PositionedBox {
            x,
            y,
            width: layout.size.width,
            height: layout.size.height,
            tag: self.node_tags.get(&node).cloned(),
            page_break_before: style.page_break_before,
            page_break_after: style.page_break_after,
            page_break_inside_avoid: style.page_break_inside_avoid,
            style,
            content,
            children,
        })
    }
}

fn dim_to_taffy(d: style::Dimension) -> Dimension {
    match d {
        style::Dimension::Auto => Dimension::Auto,
        style::Dimension::Px(v) => Dimension::Length(v),
        style::Dimension::Percent(v) => Dimension::Percent(v / 100.0),
    }
}

// ---------------------------------------------------------------------------
// Image intrinsic-size helper
// ---------------------------------------------------------------------------

/// Return a copy of `style` with any `Auto` width/height replaced by values
/// derived from the image's intrinsic pixel size (1 px = 1 pt), keeping the
/// aspect ratio. `None` when both sides are already specified.
fn resolve_img_auto_dimensions(
    (px_w, px_h): (u32, u32),
    style: &ComputedStyle,
    parent_width: f32,
) -> Option<ComputedStyle> {
    if px_w == 0 || px_h == 0 {
        return None;
    }
    let (px_w, px_h) = (px_w as f32, px_h as f32);
    let aspect = px_w / px_h;

    let known_w = match style.width {
        style::Dimension::Px(v) => Some(v),
        style::Dimension::Percent(p) => Some(parent_width * p / 100.0),
        style::Dimension::Auto => None,
    };
    let known_h = match style.height {
        style::Dimension::Px(v) => Some(v),
        _ => None,
    };

    let mut s = style.clone();
    match (known_w, known_h) {
        (Some(w), None) => s.height = style::Dimension::Px((w / aspect).max(1.0)),
        (None, Some(h)) => s.width = style::Dimension::Px((h * aspect).max(1.0)),
        (None, None) => {
            // Scale oversized images down to the available width.
            let w = px_w.min(parent_width.max(1.0));
            s.width = style::Dimension::Px(w);
            s.height = style::Dimension::Px(w / aspect);
        }
        (Some(_), Some(_)) => return None,
    }
    Some(s)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Compute layout for a styled tree, returning the top-level positioned boxes
/// in document coordinates: x includes the left page margin, y starts at 0
/// at the top of the content area.
pub fn compute_layout(
    styled_nodes: &[StyledNode],
    geometry: &PageGeometry,
    fonts: &FontManager,
    images: &ImageSizes,
) -> Result<Vec<PositionedBox>> {
    let content_width = geometry.content_width();
    let mut builder = LayoutBuilder::new(fonts, images, content_width);

    let mut child_ids = Vec::new();
    for node in styled_nodes {
        if let Some(id) = builder.build_node(node, content_width)? {
            child_ids.push(id);
        }
    }

    // Wrap all nodes in a root flex-column container
    let root_style = Style {
        display: taffy::Display::Flex,
        flex_direction: taffy::FlexDirection::Column,
        size: Size {
            width: Dimension::Length(content_width),
            height: Dimension::Auto,
        },
        ..Default::default()
    };

    let root = builder
        .taffy
        .new_with_children(root_style, &child_ids)
        .map_err(layout_error)?;

    builder
        .taffy
        .compute_layout(
            root,
            Size {
                width: AvailableSpace::Definite(content_width),
                height: AvailableSpace::MaxContent,
            },
        )
        .map_err(layout_error)?;

    let root_box = builder.extract(root, geometry.margin_left, 0.0)?;
    log::debug!(
        "layout: {} top-level boxes, {:.1}pt of content",
        root_box.children.len(),
        root_box.height
    );
    Ok(root_box.children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_fragment;
    use crate::style::{build_styled_tree, Stylesheet};

    fn layout(html: &str) -> Vec<PositionedBox> {
        let dom = parse_fragment(html).unwrap();
        let styled = build_styled_tree(&dom, None, &Stylesheet::new());
        let fonts = FontManager::default();
        let geometry = PageGeometry::uniform(595.0, 842.0, 40.0);
        compute_layout(&styled, &geometry, &fonts, &ImageSizes::new()).unwrap()
    }

    fn texts(b: &PositionedBox, out: &mut Vec<String>) {
        if let BoxContent::Text { text, .. } = &b.content {
            out.push(text.clone());
        }
        for c in &b.children {
            texts(c, out);
        }
    }

    #[test]
    fn layout_simple_paragraph() {
        let boxes = layout("<p>Hello world</p>");
        assert!(!boxes.is_empty(), "Should produce at least one box");
        let first = &boxes[0];
        assert!(first.width > 0.0, "Box should have width");
        assert!(first.height > 0.0, "Box should have height");
        assert_eq!(first.x, 40.0);
        assert_eq!(first.tag, Some(Tag::P));
    }

    #[test]
    fn layout_flex_row() {
        let boxes = layout(
            r#"<div style="display: flex"><div style="flex-grow: 1">A</div><div style="flex-grow: 1">B</div></div>"#,
        );
        assert_eq!(boxes.len(), 1);
        let row = &boxes[0];
        assert_eq!(row.children.len(), 2);
        assert!(row.children[1].x > row.children[0].x);
    }

    #[test]
    fn inline_runs_merge_and_collapse() {
        let boxes = layout("<p>Dear   <strong>John</strong>\n  <em>Doe</em>,<br/>welcome</p>");
        let mut out = Vec::new();
        texts(&boxes[0], &mut out);
        assert_eq!(out, vec!["Dear John Doe,\nwelcome".to_string()]);
    }

    #[test]
    fn shared_inline_style_is_used_for_the_run() {
        let boxes = layout("<p><strong>all bold</strong></p>");
        let run = &boxes[0].children[0];
        assert_eq!(run.style.font_weight, FontWeight::Bold);
    }

    #[test]
    fn blocks_stack_vertically() {
        let boxes = layout("<div><p>one</p><p>two</p></div>");
        let div = &boxes[0];
        assert_eq!(div.children.len(), 2);
        assert!(div.children[1].y >= div.children[0].bottom());
    }

    #[test]
    fn hidden_elements_produce_no_boxes() {
        let boxes = layout(r#"<p style="display: none">secret</p><p>shown</p>"#);
        let mut out = Vec::new();
        for b in &boxes {
            texts(b, &mut out);
        }
        assert_eq!(out, vec!["shown".to_string()]);
    }

    #[test]
    fn image_size_from_intrinsic_dimensions() {
        let dom = parse_fragment(r#"<img src="logo.png" style="width: 100pt"/>"#).unwrap();
        let styled = build_styled_tree(&dom, None, &Stylesheet::new());
        let mut images = ImageSizes::new();
        images.insert("logo.png".to_string(), (200, 50));
        let geometry = PageGeometry::uniform(595.0, 842.0, 40.0);
        let boxes = compute_layout(&styled, &geometry, &FontManager::default(), &images).unwrap();
        assert_eq!(boxes[0].width, 100.0);
        assert_eq!(boxes[0].height, 25.0);
    }
}
