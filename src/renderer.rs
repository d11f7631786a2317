//! Document renderer – drives one document through
//! `Empty → Loaded → LaidOut → Finalized`.
//!
//! Each renderer owns its fonts, stylesheet and image bytes; nothing is shared
//! between documents. A call made in the wrong state fails with
//! [`Error::InvalidSequence`] and leaves the renderer where it was.

use std::path::{Path, PathBuf};

use crate::dom::{parse_document, Document, StyleSource};
use crate::error::{Error, Result};
use crate::fonts::{FontManager, FontResource};
use crate::layout::{compute_layout, ImageSizes};
use crate::layout_config::{LayoutConfig, PageGeometry};
use crate::message::AttachmentDescriptor;
use crate::normalize::NormalizedMarkup;
use crate::pagination::{paginate, PAGE_MARGIN_PT};
use crate::render::{render_pdf, ImageBytes};
use crate::resources::ResourceBase;
use crate::style::{style_body, Stylesheet};

const A4_WIDTH_PT: f32 = 595.28;
const A4_HEIGHT_PT: f32 = 841.89;
const PDF_MIME: &str = "application/pdf";

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Finished PDF bytes for one document.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    bytes: Vec<u8>,
    page_count: usize,
    title: String,
}

impl RenderedDocument {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Write the PDF to `path`.
    ///
    /// The bytes go to a hidden sibling first and are renamed into place, so
    /// a failed write never leaves a partial file at `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let tmp = temp_sibling(path);
        let written = std::fs::write(&tmp, &self.bytes).and_then(|()| std::fs::rename(&tmp, path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(Error::io(path, e));
        }
        log::debug!("wrote {} bytes to {}", self.bytes.len(), path.display());
        Ok(())
    }

    /// Wrap the PDF as an `application/pdf` attachment.
    pub fn into_attachment(self, filename: impl Into<String>) -> Result<AttachmentDescriptor> {
        AttachmentDescriptor::from_bytes(self.bytes, filename, PDF_MIME)
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

struct LoadedDocument {
    document: Document,
    sheet: Stylesheet,
    images: ImageBytes,
    sizes: ImageSizes,
}

struct LaidOutDocument {
    layout: LayoutConfig,
    fonts: FontManager,
    images: ImageBytes,
}

enum RenderState {
    Empty,
    Loaded(Box<LoadedDocument>),
    LaidOut(Box<LaidOutDocument>),
    Finalized,
}

impl RenderState {
    fn name(&self) -> &'static str {
        match self {
            RenderState::Empty => "empty",
            RenderState::Loaded(_) => "loaded",
            RenderState::LaidOut(_) => "laid out",
            RenderState::Finalized => "finalized",
        }
    }
}

/// Renders one normalized document into a PDF.
pub struct DocumentRenderer {
    base: ResourceBase,
    geometry: PageGeometry,
    title: String,
    fonts: Vec<FontResource>,
    state: RenderState,
}

impl DocumentRenderer {
    /// A renderer resolving references against `base`, with an A4 page and
    /// the default margin.
    pub fn new(base: ResourceBase) -> Self {
        Self {
            base,
            geometry: PageGeometry::uniform(A4_WIDTH_PT, A4_HEIGHT_PT, PAGE_MARGIN_PT),
            title: "letterforge output".to_string(),
            fonts: Vec::new(),
            state: RenderState::Empty,
        }
    }

    /// Page geometry used unless the document's `@page` rule overrides it.
    pub fn with_geometry(mut self, geometry: PageGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Title used when the document has no `<title>`.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    fn out_of_order(&self, operation: &'static str) -> Error {
        Error::InvalidSequence {
            operation,
            state: self.state.name(),
        }
    }

    /// Register a font for this document. Only allowed before layout.
    pub fn register_font(&mut self, font: FontResource) -> Result<()> {
        match self.state {
            RenderState::Empty | RenderState::Loaded(_) => {}
            _ => return Err(self.out_of_order("register a font")),
        }
        font.validate()?;
        log::debug!("registered font {} ({})", font.path.display(), font.encoding);
        self.fonts.push(font);
        Ok(())
    }

    /// Parse the markup and fetch every stylesheet and image it references.
    pub fn load(&mut self, markup: &NormalizedMarkup) -> Result<()> {
        if !matches!(self.state, RenderState::Empty) {
            return Err(self.out_of_order("load a document"));
        }
        let document = parse_document(markup)?;

        let mut sheet = Stylesheet::new();
        for source in &document.styles {
            match source {
                StyleSource::Inline(css) => sheet.add_css(css),
                StyleSource::Linked(href) => sheet.add_css(&self.base.fetch_text(href)?),
            }
        }

        let mut images = ImageBytes::new();
        let mut sizes = ImageSizes::new();
        for src in document.image_sources() {
            let resource = self.base.fetch(&src)?;
            let decoded = image::load_from_memory(&resource.bytes)
                .map_err(|e| Error::resource(&src, format!("cannot decode image: {e}")))?;
            sizes.insert(src.clone(), (decoded.width(), decoded.height()));
            images.insert(src, resource.bytes);
        }

        log::debug!(
            "loaded document: {} style rule(s), {} image(s)",
            sheet.rule_count(),
            images.len()
        );
        self.state = RenderState::Loaded(Box::new(LoadedDocument {
            document,
            sheet,
            images,
            sizes,
        }));
        Ok(())
    }

    /// Style, flow and paginate the loaded document.
    pub fn layout(&mut self) -> Result<&LayoutConfig> {
        let loaded = match std::mem::replace(&mut self.state, RenderState::Empty) {
            RenderState::Loaded(loaded) => loaded,
            other => {
                self.state = other;
                return Err(self.out_of_order("lay out"));
            }
        };
        match self.lay_out(&loaded) {
            Ok((layout, fonts)) => {
                log::debug!("laid out {} page(s)", layout.page_count());
                self.state = RenderState::LaidOut(Box::new(LaidOutDocument {
                    layout,
                    fonts,
                    images: loaded.images,
                }));
            }
            Err(e) => {
                self.state = RenderState::Loaded(loaded);
                return Err(e);
            }
        }
        self.layout_config().ok_or_else(|| self.out_of_order("lay out"))
    }

    fn lay_out(&self, loaded: &LoadedDocument) -> Result<(LayoutConfig, FontManager)> {
        let mut fonts = FontManager::new();
        for font in &self.fonts {
            fonts.load(font, &self.base)?;
        }

        let geometry = self.geometry.with_page_rule(loaded.sheet.page());
        geometry.validate()?;

        let styled = style_body(&loaded.document.body, &loaded.sheet);
        let boxes = compute_layout(&styled, &geometry, &fonts, &loaded.sizes)?;
        let title = loaded
            .document
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.title);
        Ok((paginate(&boxes, &geometry, &fonts, title), fonts))
    }

    /// The page layout, once laid out.
    pub fn layout_config(&self) -> Option<&LayoutConfig> {
        match &self.state {
            RenderState::LaidOut(laid_out) => Some(&laid_out.layout),
            _ => None,
        }
    }

    /// Emit the PDF.
    pub fn finish(&mut self) -> Result<RenderedDocument> {
        let RenderState::LaidOut(laid_out) = &self.state else {
            return Err(self.out_of_order("finish"));
        };
        let bytes = render_pdf(&laid_out.layout, &laid_out.fonts, &laid_out.images)?;
        let document = RenderedDocument {
            bytes,
            page_count: laid_out.layout.page_count(),
            title: laid_out.layout.title.clone(),
        };
        self.state = RenderState::Finalized;
        log::info!(
            "rendered '{}': {} page(s), {} bytes",
            document.title,
            document.page_count,
            document.bytes.len()
        );
        Ok(document)
    }
}

/// Render normalized markup on A4 pages with `fonts` registered.
pub fn render(
    markup: &NormalizedMarkup,
    base_url: &str,
    fonts: &[FontResource],
) -> Result<RenderedDocument> {
    let mut renderer = DocumentRenderer::new(ResourceBase::parse(base_url)?);
    for font in fonts {
        renderer.register_font(font.clone())?;
    }
    renderer.load(markup)?;
    renderer.layout()?;
    renderer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::RawMarkup;
    use crate::error::ErrorKind;
    use crate::normalize::{normalize, Encoding};

    fn markup(html: &str) -> NormalizedMarkup {
        normalize(&RawMarkup::new(html), Encoding::Utf8).unwrap()
    }

    fn renderer(dir: &Path) -> DocumentRenderer {
        DocumentRenderer::new(ResourceBase::from_dir(dir).unwrap())
    }

    #[test]
    fn full_sequence_produces_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = renderer(dir.path());
        r.load(&markup("<html><head><title>Letter</title></head><body><p>Hello</p></body></html>"))
            .unwrap();
        assert_eq!(r.layout().unwrap().page_count(), 1);
        let doc = r.finish().unwrap();
        assert!(doc.bytes().starts_with(b"%PDF-"));
        assert_eq!(doc.title(), "Letter");
        assert_eq!(r.state_name(), "finalized");
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = renderer(dir.path());
        assert_eq!(r.layout().unwrap_err().kind(), ErrorKind::InvalidSequence);
        assert_eq!(r.finish().unwrap_err().kind(), ErrorKind::InvalidSequence);
        assert_eq!(r.state_name(), "empty");

        r.load(&markup("<p>x</p>")).unwrap();
        assert_eq!(
            r.load(&markup("<p>y</p>")).unwrap_err().kind(),
            ErrorKind::InvalidSequence
        );
        r.layout().unwrap();
        let font = FontResource::identity_h("any.ttf");
        assert_eq!(r.register_font(font).unwrap_err().kind(), ErrorKind::InvalidSequence);
        r.finish().unwrap();
        assert_eq!(r.finish().unwrap_err().kind(), ErrorKind::InvalidSequence);
    }

    #[test]
    fn missing_stylesheet_and_image_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = renderer(dir.path());
        let err = r
            .load(&markup(
                r#"<html><head><link rel="stylesheet" href="nope.css"/></head><body></body></html>"#,
            ))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceResolution);
        assert_eq!(r.state_name(), "empty");

        let err = r.load(&markup(r#"<p><img src="missing.png"/></p>"#)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceResolution);
    }

    #[test]
    fn linked_stylesheet_sets_page_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.css"), "@page { size: A4 landscape }").unwrap();
        let mut r = renderer(dir.path());
        r.load(&markup(
            r#"<html><head><link rel="stylesheet" href="page.css"/></head><body><p>wide</p></body></html>"#,
        ))
        .unwrap();
        let layout = r.layout().unwrap();
        assert!(layout.page_width_pt > layout.page_height_pt);
    }

    #[test]
    fn write_to_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let doc = render(&markup("<p>out</p>"), &dir.path().display().to_string(), &[]).unwrap();
        let target = dir.path().join("out.pdf");
        doc.write_to(&target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), doc.bytes());
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);

        let err = doc.write_to(&dir.path().join("no/such/dir/out.pdf")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
