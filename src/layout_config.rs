//! Layout config – the intermediate representation between layout computation
//! and PDF rendering. It records exactly what goes on each page and can be
//! dumped as JSON for inspection.

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::style::PageRule;

/// Page size and margins, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub margin_top: f32,
    pub margin_right: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
}

impl PageGeometry {
    pub fn uniform(width: f32, height: f32, margin: f32) -> Self {
        Self {
            width,
            height,
            margin_top: margin,
            margin_right: margin,
            margin_bottom: margin,
            margin_left: margin,
        }
    }

    /// Geometry from the configured page size, orientation and margin.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::uniform(
            config.effective_width(),
            config.effective_height(),
            config.page_margin,
        )
    }

    /// Apply an `@page` rule on top of this geometry.
    pub fn with_page_rule(mut self, rule: &PageRule) -> Self {
        let (width, height) = rule.dimensions((self.width, self.height));
        self.width = width;
        self.height = height;
        if let Some([top, right, bottom, left]) = rule.margin {
            self.margin_top = top;
            self.margin_right = right;
            self.margin_bottom = bottom;
            self.margin_left = left;
        }
        self
    }

    pub fn content_width(&self) -> f32 {
        self.width - self.margin_left - self.margin_right
    }

    pub fn content_height(&self) -> f32 {
        self.height - self.margin_top - self.margin_bottom
    }

    pub fn validate(&self) -> Result<()> {
        if self.content_width() <= 0.0 || self.content_height() <= 0.0 {
            return Err(Error::Layout(format!(
                "page {}x{}pt leaves no room inside its margins",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// A complete document layout ready for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Document title embedded in the PDF metadata.
    #[serde(default = "LayoutConfig::default_title")]
    pub title: String,
    /// Width of each page in PDF points (1 pt = 1/72 inch).
    pub page_width_pt: f32,
    /// Height of each page in PDF points.
    pub page_height_pt: f32,
    /// Ordered list of pages.
    pub pages: Vec<PageLayout>,
}

/// One page of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageLayout {
    pub page_index: usize,
    pub boxes: Vec<LayoutBox>,
}

/// A positioned rectangle with optional content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutBox {
    /// Position relative to page top-left, in points.
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,

    pub background_color: Option<[f32; 4]>,
    pub border: Option<BorderStyle>,

    /// Content (mutually exclusive in practice)
    pub text: Option<TextContent>,
    pub image: Option<ImageContent>,

    pub children: Vec<LayoutBox>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorderStyle {
    pub width: f32,
    pub color: [f32; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    /// Pre-wrapped lines of text.
    pub lines: Vec<TextLine>,
    pub font_family: String,
    pub font_size: f32,
    pub bold: bool,
    pub italic: bool,
    pub color: [f32; 4],
    pub line_height: f32,
    pub text_align: String,
    pub underline: bool,
    /// List bullet/number prefix (e.g. "• " or "1. ")
    pub list_marker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    /// X offset within the layout box (for alignment)
    pub x_offset: f32,
    /// Y offset from the top of the text content area
    pub y_offset: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageContent {
    /// Reference as written in the document; the renderer holds the bytes.
    pub src: String,
    pub width: f32,
    pub height: f32,
}

impl LayoutConfig {
    pub fn new(title: impl Into<String>, geometry: &PageGeometry) -> Self {
        Self {
            title: title.into(),
            page_width_pt: geometry.width,
            page_height_pt: geometry.height,
            pages: Vec::new(),
        }
    }

    fn default_title() -> String {
        "letterforge output".to_string()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serialise to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Layout(e.to_string()))
    }

    /// Deserialise from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Layout(e.to_string()))
    }

    /// All text lines in page order, for diagnostics and tests.
    pub fn text_lines(&self) -> Vec<&str> {
        fn walk<'a>(b: &'a LayoutBox, out: &mut Vec<&'a str>) {
            if let Some(t) = &b.text {
                out.extend(t.lines.iter().map(|l| l.text.as_str()));
            }
            for c in &b.children {
                walk(c, out);
            }
        }
        let mut out = Vec::new();
        for page in &self.pages {
            for b in &page.boxes {
                walk(b, &mut out);
            }
        }
        out
    }
}

impl LayoutBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            background_color: None,
            border: None,
            text: None,
            image: None,
            children: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::Stylesheet;

    #[test]
    fn page_rule_overrides_geometry() {
        let sheet = Stylesheet::parse("@page { size: letter landscape; margin: 36pt }");
        let g = PageGeometry::uniform(595.28, 841.89, 40.0).with_page_rule(sheet.page());
        assert_eq!((g.width, g.height), (792.0, 612.0));
        assert_eq!(g.margin_left, 36.0);
        assert_eq!(g.content_width(), 720.0);
    }

    #[test]
    fn margins_must_leave_room() {
        assert!(PageGeometry::uniform(100.0, 100.0, 60.0).validate().is_err());
        assert!(PageGeometry::uniform(100.0, 100.0, 10.0).validate().is_ok());
    }

    #[test]
    fn json_round_trip_keeps_pages() {
        let mut config = LayoutConfig::new("t", &PageGeometry::uniform(200.0, 300.0, 10.0));
        config.pages.push(PageLayout {
            page_index: 0,
            boxes: vec![LayoutBox::new(1.0, 2.0, 3.0, 4.0)],
        });
        let back = LayoutConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back.page_count(), 1);
        assert_eq!(back.page_width_pt, 200.0);
    }
}
