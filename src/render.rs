//! PDF renderer – takes a [`LayoutConfig`] and produces PDF bytes using
//! `printpdf` (v0.8 ops-based API).
//!
//! Text in a registered Identity-H font is drawn with that font, embedded
//! and subset to the glyphs used. Everything else is drawn with the builtin
//! Helvetica family in WinAnsiEncoding. Text a font cannot encode is an
//! error, never a replacement glyph.

use std::collections::{HashMap, HashSet};

use printpdf::*;

use crate::error::{Error, Result};
use crate::fonts::{FontEncoding, FontKey, FontManager, LoadedFont};
use crate::layout_config::*;

/// Fetched image bytes, keyed by the `src` reference used in the layout.
pub type ImageBytes = HashMap<String, Vec<u8>>;

const PT_TO_MM: f32 = 0.352778;

/// A printpdf XObject together with the pixel dimensions of the source image.
struct ImageResource {
    xobj_id: XObjectId,
    px_width: u32,
    px_height: u32,
}

/// The font a text run is drawn with.
#[derive(Clone)]
enum PdfFont<'f> {
    Embedded { id: FontId, font: &'f LoadedFont },
    Builtin(BuiltinFont),
}

struct RenderContext<'f> {
    fonts: &'f FontManager,
    embedded: HashMap<FontKey, FontId>,
    images: HashMap<String, ImageResource>,
    page_height: f32,
}

/// Render a LayoutConfig into PDF bytes.
pub fn render_pdf(config: &LayoutConfig, fonts: &FontManager, images: &ImageBytes) -> Result<Vec<u8>> {
    let page_w = Mm(config.page_width_pt * PT_TO_MM);
    let page_h = Mm(config.page_height_pt * PT_TO_MM);

    let mut doc = PdfDocument::new(&config.title);
    let mut warnings: Vec<PdfWarnMsg> = Vec::new();

    // ── Embed the Identity-H fonts the layout uses ─────────────────────────
    let mut used: HashSet<FontKey> = HashSet::new();
    for page in &config.pages {
        for lbox in &page.boxes {
            collect_used_fonts(lbox, fonts, &mut used);
        }
    }
    let mut embedded = HashMap::new();
    for font in fonts.fonts().iter().filter(|f| used.contains(&f.key)) {
        let parsed = ParsedFont::from_bytes(font.bytes(), 0, &mut warnings).ok_or_else(|| {
            Error::resource(
                font.resource.path.display().to_string(),
                "font cannot be embedded",
            )
        })?;
        let id = doc.add_font(&parsed);
        log::debug!("embedding font '{}' as {:?}", font.key.family, id);
        embedded.insert(font.key.clone(), id);
    }

    // ── Register all images ────────────────────────────────────────────────
    let mut all_srcs: HashSet<&str> = HashSet::new();
    for page in &config.pages {
        for lbox in &page.boxes {
            collect_image_srcs(lbox, &mut all_srcs);
        }
    }
    let mut image_resources = HashMap::new();
    for src in all_srcs {
        let bytes = images
            .get(src)
            .ok_or_else(|| Error::resource(src, "image was not loaded"))?;
        let dyn_img = ::image::load_from_memory(bytes)
            .map_err(|e| Error::resource(src, format!("cannot decode image: {e}")))?;
        let raw = RawImage::decode_from_bytes(bytes, &mut warnings)
            .map_err(|e| Error::resource(src, format!("cannot embed image: {e}")))?;
        image_resources.insert(
            src.to_string(),
            ImageResource {
                xobj_id: doc.add_image(&raw),
                px_width: dyn_img.width(),
                px_height: dyn_img.height(),
            },
        );
    }

    let ctx = RenderContext {
        fonts,
        embedded,
        images: image_resources,
        page_height: config.page_height_pt,
    };

    // ── Render pages ──────────────────────────────────────────────────────
    let mut pages = Vec::with_capacity(config.pages.len().max(1));
    for page_layout in &config.pages {
        let mut ops = Vec::new();
        for lbox in &page_layout.boxes {
            ctx.render_box(&mut ops, lbox)?;
        }
        pages.push(PdfPage::new(page_w, page_h, ops));
    }
    if pages.is_empty() {
        pages.push(PdfPage::new(page_w, page_h, Vec::new()));
    }

    doc.with_pages(pages);
    let options = PdfSaveOptions {
        subset_fonts: true,
        ..Default::default()
    };
    let bytes = doc.save(&options, &mut warnings);
    log::debug!(
        "serialized {} page(s), {} bytes, {} printpdf warning(s)",
        config.pages.len(),
        bytes.len(),
        warnings.len()
    );
    Ok(bytes)
}

/// Registered Identity-H fonts that some text box resolves to.
fn collect_used_fonts(lbox: &LayoutBox, fonts: &FontManager, used: &mut HashSet<FontKey>) {
    if let Some(text) = &lbox.text {
        if let Some(font) = fonts.lookup(&text.font_family, text.bold, text.italic) {
            if font.resource.encoding == FontEncoding::IdentityH && !text.lines.is_empty() {
                used.insert(font.key.clone());
            }
        }
    }
    for child in &lbox.children {
        collect_used_fonts(child, fonts, used);
    }
}

/// Recursively collect all unique `image.src` strings from a [`LayoutBox`] tree.
fn collect_image_srcs<'a>(lbox: &'a LayoutBox, srcs: &mut HashSet<&'a str>) {
    if let Some(img) = &lbox.image {
        srcs.insert(img.src.as_str());
    }
    for child in &lbox.children {
        collect_image_srcs(child, srcs);
    }
}

fn builtin_helvetica(bold: bool, italic: bool) -> BuiltinFont {
    match (bold, italic) {
        (true, true) => BuiltinFont::HelveticaBoldOblique,
        (true, false) => BuiltinFont::HelveticaBold,
        (false, true) => BuiltinFont::HelveticaOblique,
        (false, false) => BuiltinFont::Helvetica,
    }
}

/// Map one character to its WinAnsiEncoding (Windows-1252) byte.
fn winansi_byte(c: char) -> Option<u8> {
    Some(match c {
        '\u{20AC}' => 0x80,
        '\u{201A}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201E}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02C6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8A,
        '\u{2039}' => 0x8B,
        '\u{0152}' => 0x8C,
        '\u{017D}' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02DC}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9A,
        '\u{203A}' => 0x9B,
        '\u{0153}' => 0x9C,
        '\u{017E}' => 0x9E,
        '\u{0178}' => 0x9F,
        '\t' | '\u{00A0}' => 0x20,
        c if (' '..='~').contains(&c) || ('\u{00A1}'..='\u{00FF}').contains(&c) => c as u8,
        _ => return None,
    })
}

/// Convert a UTF-8 string to raw Windows-1252 bytes then wrap in a String so
/// printpdf writes the bytes unchanged into the PDF stream (builtin fonts use
/// WinAnsiEncoding, so each glyph is one byte). A character outside the
/// encoding fails with [`Error::UnencodableText`].
fn to_winlatin(s: &str, font_name: &str) -> Result<String> {
    let bytes = s
        .chars()
        .map(|ch| {
            winansi_byte(ch).ok_or_else(|| Error::UnencodableText {
                ch,
                font: font_name.to_string(),
            })
        })
        .collect::<Result<Vec<u8>>>()?;
    // SAFETY: intentionally non-UTF-8 for 0x80-0xFF; printpdf passes these
    // bytes straight to the PDF stream, decoded by WinAnsiEncoding.
    #[allow(unsafe_code)]
    let text = unsafe { String::from_utf8_unchecked(bytes) };
    Ok(text)
}

fn rgb(c: [f32; 4]) -> Color {
    Color::Rgb(Rgb {
        r: c[0],
        g: c[1],
        b: c[2],
        icc_profile: None,
    })
}

fn point(x: f32, y: f32) -> LinePoint {
    LinePoint {
        p: Point { x: Pt(x), y: Pt(y) },
        bezier: false,
    }
}

impl<'f> RenderContext<'f> {
    fn font_for(&self, text: &TextContent) -> PdfFont<'f> {
        match self.fonts.lookup(&text.font_family, text.bold, text.italic) {
            Some(font) if font.resource.encoding == FontEncoding::IdentityH => {
                match self.embedded.get(&font.key) {
                    Some(id) => PdfFont::Embedded {
                        id: id.clone(),
                        font,
                    },
                    None => PdfFont::Builtin(builtin_helvetica(text.bold, text.italic)),
                }
            }
            // WinAnsi fonts keep their metrics but draw as the base-14 face.
            _ => PdfFont::Builtin(builtin_helvetica(text.bold, text.italic)),
        }
    }

    fn write_text(&self, ops: &mut Vec<Op>, font: &PdfFont<'_>, size: f32, line: &str) -> Result<()> {
        match font {
            PdfFont::Embedded { id, font } => {
                if let Some(ch) = font.missing_glyph(line) {
                    return Err(Error::UnencodableText {
                        ch,
                        font: font.key.family.clone(),
                    });
                }
                ops.push(Op::SetFontSize {
                    size: Pt(size),
                    font: id.clone(),
                });
                ops.push(Op::WriteText {
                    items: vec![TextItem::Text(line.to_string())],
                    font: id.clone(),
                });
            }
            PdfFont::Builtin(builtin) => {
                let encoded = to_winlatin(line, "Helvetica")?;
                ops.push(Op::SetFontSizeBuiltinFont {
                    size: Pt(size),
                    font: *builtin,
                });
                ops.push(Op::WriteTextBuiltinFont {
                    items: vec![TextItem::Text(encoded)],
                    font: *builtin,
                });
            }
        }
        Ok(())
    }

    /// Recursively render a LayoutBox and its children into PDF ops.
    fn render_box(&self, ops: &mut Vec<Op>, lbox: &LayoutBox) -> Result<()> {
        // PDF origin is bottom-left; layout origin is top-left.
        let pdf_y = self.page_height - lbox.y;
        let (x1, y1, x2, y2) = (lbox.x, pdf_y - lbox.height, lbox.x + lbox.width, pdf_y);

        if let Some(bg) = &lbox.background_color {
            ops.push(Op::SetFillColor { col: rgb(*bg) });
            ops.push(Op::DrawPolygon {
                polygon: Polygon {
                    rings: vec![PolygonRing {
                        points: vec![point(x1, y1), point(x2, y1), point(x2, y2), point(x1, y2)],
                    }],
                    mode: PaintMode::Fill,
                    winding_order: WindingOrder::NonZero,
                },
            });
        }

        if let Some(border) = &lbox.border {
            ops.push(Op::SetOutlineColor {
                col: rgb(border.color),
            });
            ops.push(Op::SetOutlineThickness {
                pt: Pt(border.width),
            });
            ops.push(Op::DrawLine {
                line: Line {
                    points: vec![point(x1, y2), point(x2, y2), point(x2, y1), point(x1, y1)],
                    is_closed: true,
                },
            });
        }

        if let Some(text) = &lbox.text {
            self.render_text(ops, lbox, text, pdf_y)?;
        }

        if let Some(img) = &lbox.image {
            let res = self
                .images
                .get(&img.src)
                .ok_or_else(|| Error::resource(img.src.as_str(), "image was not registered"))?;
            let img_bottom_y = self.page_height - lbox.y - img.height;
            // At dpi=72 printpdf renders 1 px = 1 pt, so
            // scale = desired_pt / px_dim.
            let scale = |want: f32, px: u32| if px > 0 { want / px as f32 } else { 1.0 };
            ops.push(Op::UseXobject {
                id: res.xobj_id.clone(),
                transform: XObjectTransform {
                    translate_x: Some(Pt(lbox.x)),
                    translate_y: Some(Pt(img_bottom_y)),
                    dpi: Some(72.0),
                    scale_x: Some(scale(img.width, res.px_width)),
                    scale_y: Some(scale(img.height, res.px_height)),
                    rotate: None,
                },
            });
        }

        for child in &lbox.children {
            self.render_box(ops, child)?;
        }
        Ok(())
    }

    fn render_text(&self, ops: &mut Vec<Op>, lbox: &LayoutBox, text: &TextContent, pdf_y: f32) -> Result<()> {
        let font = self.font_for(text);
        // Baseline = top of line + ascender.
        let ascender = match &font {
            PdfFont::Embedded { .. } => {
                self.fonts
                    .ascender_px(text.font_size, text.bold, text.italic, &text.font_family)
            }
            PdfFont::Builtin(_) => text.font_size * 0.75,
        };

        for tline in &text.lines {
            if tline.text.trim().is_empty() {
                continue;
            }
            let text_x = lbox.x + tline.x_offset;
            let text_y = pdf_y - tline.y_offset - ascender;

            ops.push(Op::StartTextSection);
            ops.push(Op::SetTextCursor {
                pos: Point {
                    x: Pt(text_x),
                    y: Pt(text_y),
                },
            });
            ops.push(Op::SetLineHeight {
                lh: Pt(text.line_height),
            });
            ops.push(Op::SetFillColor {
                col: rgb(text.color),
            });
            self.write_text(ops, &font, text.font_size, &tline.text)?;
            ops.push(Op::EndTextSection);

            if text.underline {
                let underline_y = text_y - text.font_size * 0.1;
                let width = self.fonts.measure_text_width(
                    &tline.text,
                    text.font_size,
                    text.bold,
                    text.italic,
                    &text.font_family,
                );
                ops.push(Op::SetOutlineThickness { pt: Pt(0.5) });
                ops.push(Op::SetOutlineColor {
                    col: rgb(text.color),
                });
                ops.push(Op::DrawLine {
                    line: Line {
                        points: vec![point(text_x, underline_y), point(text_x + width, underline_y)],
                        is_closed: false,
                    },
                });
            }
        }

        if let Some(marker) = &text.list_marker {
            ops.push(Op::StartTextSection);
            ops.push(Op::SetTextCursor {
                pos: Point {
                    x: Pt(lbox.x - 16.0),
                    y: Pt(pdf_y - text.font_size * 0.75),
                },
            });
            ops.push(Op::SetFillColor {
                col: rgb(text.color),
            });
            let helvetica = PdfFont::Builtin(BuiltinFont::Helvetica);
            self.write_text(ops, &helvetica, text.font_size, marker)?;
            ops.push(Op::EndTextSection);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn one_line_config(line: &str) -> LayoutConfig {
        let geometry = PageGeometry::uniform(595.28, 841.89, 40.0);
        let mut config = LayoutConfig::new("render test", &geometry);
        let mut lbox = LayoutBox::new(40.0, 40.0, 200.0, 20.0);
        lbox.text = Some(TextContent {
            lines: vec![TextLine {
                text: line.to_string(),
                x_offset: 0.0,
                y_offset: 0.0,
            }],
            font_family: "Helvetica".to_string(),
            font_size: 12.0,
            bold: false,
            italic: false,
            color: [0.0, 0.0, 0.0, 1.0],
            line_height: 16.8,
            text_align: "left".to_string(),
            underline: true,
            list_marker: None,
        });
        config.pages.push(PageLayout {
            page_index: 0,
            boxes: vec![lbox],
        });
        config
    }

    #[test]
    fn render_empty_page() {
        let config = LayoutConfig::new("empty", &PageGeometry::uniform(595.28, 841.89, 40.0));
        let bytes = render_pdf(&config, &FontManager::new(), &ImageBytes::new()).unwrap();
        assert!(bytes.len() > 100, "PDF should have content");
        // PDF magic number
        assert_eq!(&bytes[0..5], b"%PDF-");
    }

    #[test]
    fn winansi_covers_latin1_and_cp1252_punctuation() {
        assert_eq!(winansi_byte('é'), Some(0xE9));
        assert_eq!(winansi_byte('€'), Some(0x80));
        assert_eq!(winansi_byte('\u{2014}'), Some(0x97));
        assert_eq!(winansi_byte('\u{0085}'), None);
        assert_eq!(winansi_byte('Ж'), None);
    }

    #[test]
    fn builtin_text_renders() {
        let bytes = render_pdf(&one_line_config("Grüße – €5"), &FontManager::new(), &ImageBytes::new()).unwrap();
        assert_eq!(&bytes[0..5], b"%PDF-");
    }

    #[test]
    fn unencodable_builtin_text_fails() {
        let err = render_pdf(&one_line_config("Привет"), &FontManager::new(), &ImageBytes::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnencodableText);
    }

    #[test]
    fn missing_image_bytes_fail() {
        let mut config = one_line_config("x");
        let mut img = LayoutBox::new(40.0, 80.0, 10.0, 10.0);
        img.image = Some(ImageContent {
            src: "logo.png".to_string(),
            width: 10.0,
            height: 10.0,
        });
        config.pages[0].boxes.push(img);
        let err = render_pdf(&config, &FontManager::new(), &ImageBytes::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceResolution);
    }
}
