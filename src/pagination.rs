//! Pagination – splits the positioned box tree into pages.
//!
//! Handles:
//! - page boundaries of the configured geometry
//! - forced breaks (`page-break-before/after`, `break-before/after`), also
//!   when set on boxes nested inside containers
//! - multi-line text splitting between lines
//! - table splitting between rows

use crate::fonts::FontManager;
use crate::layout::{BoxContent, PositionedBox};
use crate::layout_config::*;
use crate::style;

/// Default page margins in points.
pub const PAGE_MARGIN_PT: f32 = 40.0;

/// One box to place, with the forced breaks inherited from flattened
/// ancestors.
struct Item<'a> {
    pbox: &'a PositionedBox,
    break_before: bool,
    break_after: bool,
}

/// Expand containers that are taller than a page or that hold a forced break
/// somewhere below them, so their children paginate individually. A
/// flattened container's own breaks move to its first and last item.
fn flatten_for_pagination<'a>(
    boxes: &'a [PositionedBox],
    content_height: f32,
    out: &mut Vec<Item<'a>>,
) {
    for pbox in boxes {
        let container = matches!(pbox.content, BoxContent::None | BoxContent::ListItem { .. })
            && !pbox.children.is_empty();
        let inner_break = pbox.children.iter().any(PositionedBox::has_forced_break);
        let oversized = pbox.height > content_height;
        if container && (inner_break || (oversized && !pbox.page_break_inside_avoid)) {
            let first = out.len();
            flatten_for_pagination(&pbox.children, content_height, out);
            if out.len() > first {
                out[first].break_before |= pbox.page_break_before;
                if let Some(last) = out.last_mut() {
                    last.break_after |= pbox.page_break_after;
                }
            }
        } else {
            out.push(Item {
                pbox,
                break_before: pbox.page_break_before,
                break_after: pbox.page_break_after,
            });
        }
    }
}

struct Paginator<'f> {
    config: LayoutConfig,
    current: Vec<LayoutBox>,
    /// Document-space y at which the current page's content area begins.
    /// `pbox.y - page_start` is a box's y on the page.
    page_start: f32,
    content_height: f32,
    margin_top: f32,
    fonts: &'f FontManager,
}

impl<'f> Paginator<'f> {
    fn new_page(&mut self, page_start: f32) {
        let boxes = std::mem::take(&mut self.current);
        let page_index = self.config.pages.len();
        self.config.pages.push(PageLayout { page_index, boxes });
        self.page_start = page_start;
    }

    fn y_on_page(&self, doc_y: f32) -> f32 {
        (doc_y - self.page_start).max(0.0)
    }

    fn place_item(&mut self, item: &Item<'_>) {
        let pbox = item.pbox;
        if item.break_before && !self.current.is_empty() {
            self.new_page(pbox.y);
        }
        self.place(pbox);
        if item.break_after {
            self.new_page(pbox.bottom());
        }
    }

    fn place(&mut self, pbox: &PositionedBox) {
        let overflows = self.y_on_page(pbox.y) + pbox.height > self.content_height;
        if overflows && !pbox.page_break_inside_avoid {
            if let BoxContent::Text { lines, .. } = &pbox.content {
                if lines.len() > 1 {
                    self.place_text_lines(pbox, lines.len());
                    return;
                }
            }
            if pbox.tag == Some(crate::dom::Tag::Table) && !pbox.children.is_empty() {
                for row in &pbox.children {
                    self.place(row);
                }
                return;
            }
        }
        if overflows && !self.current.is_empty() {
            self.new_page(pbox.y);
        }
        let y = self.margin_top + self.y_on_page(pbox.y);
        let lb = build_layout_box(pbox, pbox.x, y, self.fonts);
        self.current.push(lb);
    }

    /// Place a text run, continuing on following pages between lines.
    fn place_text_lines(&mut self, pbox: &PositionedBox, total: usize) {
        let line_height = (pbox.style.font_size * pbox.style.line_height).max(0.1);
        let mut start = 0;
        while start < total {
            let line_doc_y = pbox.y + start as f32 * line_height;
            let y_on_page = self.y_on_page(line_doc_y);
            let room = ((self.content_height - y_on_page) / line_height).floor().max(0.0) as usize;
            let mut fit = room.min(total - start);
            if fit == 0 {
                if self.current.is_empty() {
                    // A line taller than the page still has to go somewhere.
                    fit = 1;
                } else {
                    self.new_page(line_doc_y);
                    continue;
                }
            }
            let y = self.margin_top + y_on_page;
            let lb = build_layout_box(pbox, pbox.x, y, self.fonts);
            self.current.push(slice_text_box(lb, start, start + fit, line_height));
            start += fit;
            if start < total {
                self.new_page(pbox.y + start as f32 * line_height);
            }
        }
    }

    fn finish(mut self) -> LayoutConfig {
        if !self.current.is_empty() || self.config.pages.is_empty() {
            self.new_page(0.0);
        }
        self.config
    }
}

/// Keep lines `start..end` of a text layout box.
fn slice_text_box(mut lb: LayoutBox, start: usize, end: usize, line_height: f32) -> LayoutBox {
    if let Some(text) = lb.text.as_mut() {
        let kept: Vec<TextLine> = text
            .lines
            .drain(..)
            .enumerate()
            .filter(|(i, _)| (start..end).contains(i))
            .map(|(i, mut line)| {
                line.y_offset = (i - start) as f32 * line_height;
                line
            })
            .collect();
        text.lines = kept;
    }
    lb.height = (end - start) as f32 * line_height;
    lb
}

/// Convert positioned boxes into a paginated LayoutConfig.
pub fn paginate(
    boxes: &[PositionedBox],
    geometry: &PageGeometry,
    fonts: &FontManager,
    title: &str,
) -> LayoutConfig {
    let content_height = geometry.content_height();
    let mut items = Vec::new();
    flatten_for_pagination(boxes, content_height, &mut items);

    let mut paginator = Paginator {
        config: LayoutConfig::new(title, geometry),
        current: Vec::new(),
        page_start: 0.0,
        content_height,
        margin_top: geometry.margin_top,
        fonts,
    };
    for item in &items {
        paginator.place_item(item);
    }
    let config = paginator.finish();
    log::debug!(
        "paginated {} item(s) onto {} page(s)",
        items.len(),
        config.pages.len()
    );
    config
}

/// Recursively build a LayoutBox tree where every box carries *page-absolute*
/// x/y coordinates (origin = top-left of the physical page).
///
/// PositionedBox.y values are document-space absolutes, so a child's offset
/// within its parent is `child.y − parent.y`.
fn build_layout_box(pbox: &PositionedBox, abs_x: f32, abs_y: f32, fonts: &FontManager) -> LayoutBox {
    let mut lb = LayoutBox::new(abs_x, abs_y, pbox.width, pbox.height);
    let s = &pbox.style;

    if !s.background_color.is_transparent() {
        let c = &s.background_color;
        lb.background_color = Some([c.r, c.g, c.b, c.a]);
    }

    if s.border_width > 0.0 {
        let c = &s.border_color;
        lb.border = Some(BorderStyle {
            width: s.border_width,
            color: [c.r, c.g, c.b, c.a],
        });
    }

    let bold = s.font_weight == style::FontWeight::Bold;
    let italic = s.font_style == style::FontStyle::Italic;
    let line_height = s.font_size * s.line_height;
    let text_content = |lines: Vec<TextLine>, list_marker: Option<String>| TextContent {
        lines,
        font_family: s.font_family.clone(),
        font_size: s.font_size,
        bold,
        italic,
        color: [s.color.r, s.color.g, s.color.b, s.color.a],
        line_height,
        text_align: match s.text_align {
            style::TextAlign::Left => "left".to_string(),
            style::TextAlign::Center => "center".to_string(),
            style::TextAlign::Right => "right".to_string(),
        },
        underline: s.text_decoration == style::TextDecoration::Underline,
        list_marker,
    };

    match &pbox.content {
        BoxContent::Text { lines, .. } => {
            let text_lines = lines
                .iter()
                .enumerate()
                .map(|(i, line)| {
                    let free = pbox.width
                        - fonts.measure_text_width(line, s.font_size, bold, italic, &s.font_family);
                    let x_offset = match s.text_align {
                        style::TextAlign::Left => 0.0,
                        style::TextAlign::Center => (free / 2.0).max(0.0),
                        style::TextAlign::Right => free.max(0.0),
                    };
                    TextLine {
                        text: line.clone(),
                        x_offset,
                        y_offset: i as f32 * line_height,
                    }
                })
                .collect();
            lb.text = Some(text_content(text_lines, None));
        }
        BoxContent::Image { src } => {
            lb.image = Some(ImageContent {
                src: src.clone(),
                width: pbox.width,
                height: pbox.height,
            });
        }
        BoxContent::ListItem { marker } => {
            // No lines: the bullet / number is drawn left of the li box and
            // its text comes from the child boxes.
            lb.text = Some(text_content(Vec::new(), Some(marker.clone())));
        }
        BoxContent::None => {}
    }

    for child in &pbox.children {
        let child_abs_y = abs_y + (child.y - pbox.y);
        lb.children
            .push(build_layout_box(child, child.x, child_abs_y, fonts));
    }

    lb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_fragment;
    use crate::layout::{compute_layout, ImageSizes};
    use crate::style::{build_styled_tree, Stylesheet};

    fn paginate_html(html: &str, geometry: PageGeometry) -> LayoutConfig {
        let dom = parse_fragment(html).unwrap();
        let styled = build_styled_tree(&dom, None, &Stylesheet::new());
        let fonts = FontManager::default();
        let boxes = compute_layout(&styled, &geometry, &fonts, &ImageSizes::new()).unwrap();
        paginate(&boxes, &geometry, &fonts, "test")
    }

    fn a4() -> PageGeometry {
        PageGeometry::uniform(595.0, 842.0, PAGE_MARGIN_PT)
    }

    fn page_texts(config: &LayoutConfig, page: usize) -> Vec<String> {
        fn walk(b: &LayoutBox, out: &mut Vec<String>) {
            if let Some(t) = &b.text {
                out.extend(t.lines.iter().map(|l| l.text.clone()));
            }
            b.children.iter().for_each(|c| walk(c, out));
        }
        let mut out = Vec::new();
        config.pages[page].boxes.iter().for_each(|b| walk(b, &mut out));
        out
    }

    #[test]
    fn single_page() {
        let config = paginate_html("<p>Short text</p>", a4());
        assert_eq!(config.pages.len(), 1);
        assert_eq!(config.title, "test");
    }

    #[test]
    fn multiple_pages() {
        let mut html = String::new();
        for i in 0..60 {
            html.push_str(&format!("<p>Paragraph {} with some text</p>", i));
        }
        let config = paginate_html(&html, a4());
        assert!(
            config.pages.len() > 1,
            "Expected multiple pages, got {}",
            config.pages.len()
        );
        // Order is kept across pages.
        let all = config.text_lines();
        assert_eq!(all.first(), Some(&"Paragraph 0 with some text"));
        assert_eq!(all.last(), Some(&"Paragraph 59 with some text"));
    }

    #[test]
    fn forced_break_inside_container() {
        let config = paginate_html(
            r#"<div><p>first</p><div><p style="page-break-before: always">second</p></div></div>"#,
            a4(),
        );
        assert_eq!(config.pages.len(), 2);
        assert_eq!(page_texts(&config, 0), vec!["first"]);
        assert_eq!(page_texts(&config, 1), vec!["second"]);
    }

    #[test]
    fn leading_break_does_not_leave_a_blank_page() {
        let config = paginate_html(
            r#"<p style="break-before: page">only</p><p style="break-after: page">last</p>"#,
            a4(),
        );
        assert_eq!(config.pages.len(), 1);
    }

    #[test]
    fn long_text_splits_between_lines() {
        let words = "lorem ipsum dolor sit amet ".repeat(200);
        let geometry = PageGeometry::uniform(300.0, 300.0, 20.0);
        let config = paginate_html(&format!("<p>{words}</p>"), geometry);
        assert!(config.pages.len() > 1);
        for page in &config.pages {
            for b in &page.boxes {
                assert!(b.y + b.height <= geometry.height - geometry.margin_bottom + 0.5);
            }
        }
        let total: usize = (0..config.pages.len()).map(|p| page_texts(&config, p).len()).sum();
        assert!(total > 10);
    }

    #[test]
    fn tables_split_between_rows() {
        let mut rows = String::new();
        for i in 0..40 {
            rows.push_str(&format!("<tr><td>row {i}</td><td>value</td></tr>"));
        }
        let config = paginate_html(&format!("<table>{rows}</table>"), a4());
        assert!(config.pages.len() > 1);
        let first = page_texts(&config, 0);
        let second = page_texts(&config, 1);
        assert_eq!(first[0], "row 0");
        assert!(second[0].starts_with("row "));
        assert_ne!(first.last(), second.first());
    }
}
