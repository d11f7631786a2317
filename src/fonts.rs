//! Font registry and text measurement.
//!
//! Registered TrueType/OpenType files are parsed with `ttf-parser` for their
//! metrics and family name, and text is measured by shaping it with
//! `rustybuzz`. Text in a family nobody registered is measured with an
//! average-width heuristic and drawn with the builtin Helvetica.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::resources::ResourceBase;

/// How text drawn with a font is encoded in the PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontEncoding {
    /// Two-byte glyph ids; requires the font program in the document.
    IdentityH,
    /// Single-byte Windows-1252; the font is referenced, not embedded.
    WinAnsi,
}

impl FontEncoding {
    pub fn label(self) -> &'static str {
        match self {
            FontEncoding::IdentityH => "Identity-H",
            FontEncoding::WinAnsi => "WinAnsiEncoding",
        }
    }
}

impl fmt::Display for FontEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A font file the caller asks the renderer to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontResource {
    pub path: PathBuf,
    pub encoding: FontEncoding,
    pub embedded: bool,
    /// Family name matched against `font-family`; read from the font's
    /// name table when unset.
    pub family: Option<String>,
}

impl FontResource {
    pub fn new(path: impl Into<PathBuf>, encoding: FontEncoding, embedded: bool) -> Self {
        Self {
            path: path.into(),
            encoding,
            embedded,
            family: None,
        }
    }

    /// An embedded Identity-H font.
    pub fn identity_h(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FontEncoding::IdentityH, true)
    }

    /// A referenced (not embedded) WinAnsi font.
    pub fn win_ansi(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FontEncoding::WinAnsi, false)
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// Identity-H needs the glyph program embedded; WinAnsi must not embed.
    pub fn validate(&self) -> Result<()> {
        let consistent = match self.encoding {
            FontEncoding::IdentityH => self.embedded,
            FontEncoding::WinAnsi => !self.embedded,
        };
        if consistent {
            Ok(())
        } else {
            Err(Error::FontEncodingMismatch {
                path: self.path.clone(),
                encoding: self.encoding.label(),
                embedded: self.embedded,
            })
        }
    }
}

/// Style-qualified family name.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct FontKey {
    pub family: String,
    pub bold: bool,
    pub italic: bool,
}

/// A parsed font face with metrics.
#[derive(Clone)]
pub struct LoadedFont {
    pub key: FontKey,
    pub resource: FontResource,
    /// Raw font bytes (kept alive for ttf-parser's zero-copy API).
    bytes: Vec<u8>,
    pub units_per_em: f32,
    pub ascender: f32,
    pub descender: f32,
    pub line_gap: f32,
}

impl fmt::Debug for LoadedFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedFont")
            .field("key", &self.key)
            .field("path", &self.resource.path)
            .field("encoding", &self.resource.encoding)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl LoadedFont {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_embedded(&self) -> bool {
        self.resource.embedded
    }

    /// `true` if the face maps `ch` to a glyph.
    pub fn has_glyph(&self, ch: char) -> bool {
        self.missing_glyph(ch.encode_utf8(&mut [0; 4])).is_none()
    }

    /// First character of `text` (whitespace aside) the face has no glyph
    /// for.
    pub fn missing_glyph(&self, text: &str) -> Option<char> {
        let face = ttf_parser::Face::parse(&self.bytes, 0).ok();
        text.chars()
            .filter(|c| !c.is_whitespace())
            .find(|&c| face.as_ref().and_then(|f| f.glyph_index(c)).is_none())
    }

    /// Shaped advance width of `text` in points.
    fn shaped_width(&self, text: &str, font_size: f32) -> Option<f32> {
        let face = rustybuzz::Face::from_slice(&self.bytes, 0)?;
        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str(text);
        let shaped = rustybuzz::shape(&face, &[], buffer);
        let units: i64 = shaped
            .glyph_positions()
            .iter()
            .map(|p| i64::from(p.x_advance))
            .sum();
        Some(units as f32 * font_size / self.units_per_em)
    }
}

/// The fonts registered for one document.
#[derive(Debug, Default, Clone)]
pub struct FontManager {
    fonts: Vec<LoadedFont>,
}

impl FontManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and register a font file. Relative paths resolve against the
    /// base resource directory.
    pub fn load(&mut self, resource: &FontResource, base: &ResourceBase) -> Result<FontKey> {
        resource.validate()?;
        let path = if resource.path.is_absolute() {
            resource.path.clone()
        } else {
            base.dir().join(&resource.path)
        };
        let bytes = std::fs::read(&path).map_err(|e| {
            Error::resource(path.display().to_string(), format!("cannot read font: {e}"))
        })?;
        self.load_bytes(resource, bytes, &path)
    }

    /// Register font bytes already in memory.
    pub fn load_bytes(
        &mut self,
        resource: &FontResource,
        bytes: Vec<u8>,
        origin: &Path,
    ) -> Result<FontKey> {
        resource.validate()?;
        let (key, units_per_em, ascender, descender, line_gap) = {
            let face = ttf_parser::Face::parse(&bytes, 0).map_err(|e| {
                Error::resource(origin.display().to_string(), format!("cannot parse font: {e}"))
            })?;
            let family = match &resource.family {
                Some(f) => f.clone(),
                None => family_name(&face).ok_or_else(|| {
                    Error::resource(origin.display().to_string(), "font has no family name")
                })?,
            };
            let key = FontKey {
                family,
                bold: face.is_bold(),
                italic: face.is_italic(),
            };
            (
                key,
                f32::from(face.units_per_em()),
                f32::from(face.ascender()),
                f32::from(face.descender()),
                f32::from(face.line_gap()),
            )
        };

        log::debug!(
            "registered font '{}' (bold={}, italic={}, {}) from {}",
            key.family,
            key.bold,
            key.italic,
            resource.encoding,
            origin.display()
        );
        self.fonts.retain(|f| f.key != key);
        self.fonts.push(LoadedFont {
            key: key.clone(),
            resource: resource.clone(),
            bytes,
            units_per_em,
            ascender,
            descender,
            line_gap,
        });
        Ok(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn fonts(&self) -> &[LoadedFont] {
        &self.fonts
    }

    /// Find the face for a family, preferring the exact style and falling
    /// back to any face of the same family. Family names compare
    /// case-insensitively.
    pub fn lookup(&self, family: &str, bold: bool, italic: bool) -> Option<&LoadedFont> {
        let same_family = |f: &&LoadedFont| f.key.family.eq_ignore_ascii_case(family);
        self.fonts
            .iter()
            .filter(same_family)
            .find(|f| f.key.bold == bold && f.key.italic == italic)
            .or_else(|| {
                self.fonts
                    .iter()
                    .filter(same_family)
                    .min_by_key(|f| (f.key.bold != bold) as u8 + (f.key.italic != italic) as u8)
            })
    }

    /// Measure the width of a string at a given font size (in pt).
    /// Registered fonts are shaped; anything else uses an average character
    /// width of 0.5 × font_size.
    pub fn measure_text_width(
        &self,
        text: &str,
        font_size: f32,
        bold: bool,
        italic: bool,
        family: &str,
    ) -> f32 {
        if let Some(width) = self
            .lookup(family, bold, italic)
            .and_then(|font| font.shaped_width(text, font_size))
        {
            return width;
        }
        // Bold is ~10 % wider.
        let avg = if bold { 0.55 } else { 0.5 };
        text.chars().count() as f32 * font_size * avg
    }

    /// Get the ascender in pt for the given font.
    pub fn ascender_px(&self, font_size: f32, bold: bool, italic: bool, family: &str) -> f32 {
        match self.lookup(family, bold, italic) {
            Some(font) => font.ascender * font_size / font.units_per_em,
            None => font_size * 0.75,
        }
    }
}

fn family_name(face: &ttf_parser::Face<'_>) -> Option<String> {
    use ttf_parser::name_id::{FAMILY, TYPOGRAPHIC_FAMILY};
    [TYPOGRAPHIC_FAMILY, FAMILY].into_iter().find_map(|id| {
        face.names()
            .into_iter()
            .filter(|n| n.name_id == id)
            .find_map(|n| n.to_string())
    })
}

/// Word-wrap text to fit within `max_width` points. Returns a vec of lines.
pub fn wrap_text(
    text: &str,
    font_size: f32,
    bold: bool,
    italic: bool,
    family: &str,
    max_width: f32,
    fonts: &FontManager,
) -> Vec<String> {
    if max_width <= 0.0 || text.is_empty() {
        return vec![text.to_string()];
    }

    let mut lines: Vec<String> = Vec::new();
    // Split on existing newlines first
    for paragraph in text.split('\n') {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut current_line = String::new();
        for word in &words {
            let candidate = if current_line.is_empty() {
                word.to_string()
            } else {
                format!("{current_line} {word}")
            };
            let w = fonts.measure_text_width(&candidate, font_size, bold, italic, family);
            if w > max_width && !current_line.is_empty() {
                lines.push(std::mem::replace(&mut current_line, word.to_string()));
            } else {
                current_line = candidate;
            }
        }
        if !current_line.is_empty() {
            lines.push(current_line);
        }
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Locate a TrueType font on the host for tests.
#[cfg(test)]
pub(crate) fn system_test_font() -> Option<PathBuf> {
    [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn heuristic_text_width() {
        let mgr = FontManager::default();
        let w = mgr.measure_text_width("Hello", 16.0, false, false, "Helvetica");
        // 5 chars × 16 × 0.5 = 40
        assert!((w - 40.0).abs() < 0.1);
    }

    #[test]
    fn word_wrap_basic() {
        let mgr = FontManager::default();
        let lines = wrap_text("Hello world foo bar", 16.0, false, false, "Helvetica", 60.0, &mgr);
        assert!(lines.len() >= 2, "Expected wrapping, got {:?}", lines);
    }

    #[test]
    fn encoding_must_match_embedding() {
        assert!(FontResource::identity_h("a.ttf").validate().is_ok());
        assert!(FontResource::win_ansi("a.ttf").validate().is_ok());
        for bad in [
            FontResource::new("a.ttf", FontEncoding::IdentityH, false),
            FontResource::new("a.ttf", FontEncoding::WinAnsi, true),
        ] {
            assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::FontEncodingMismatch);
        }
    }

    #[test]
    fn unreadable_font_is_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("junk.ttf"), b"not a font").unwrap();
        let base = ResourceBase::from_dir(dir.path()).unwrap();
        let mut mgr = FontManager::new();
        for name in ["missing.ttf", "junk.ttf"] {
            let err = mgr.load(&FontResource::identity_h(name), &base).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ResourceResolution);
        }
        assert!(mgr.is_empty());
    }

    #[test]
    fn system_font_is_shaped() {
        let Some(path) = system_test_font() else {
            eprintln!("skipping: no system TrueType font found");
            return;
        };
        let base = ResourceBase::from_dir(Path::new("/")).unwrap();
        let mut mgr = FontManager::new();
        let key = mgr.load(&FontResource::identity_h(&path), &base).unwrap();
        assert!(!key.family.is_empty());

        let font = mgr.lookup(&key.family.to_uppercase(), false, false).unwrap();
        assert!(font.has_glyph('a'));
        let narrow = mgr.measure_text_width("iiii", 12.0, false, false, &key.family);
        let wide = mgr.measure_text_width("WWWW", 12.0, false, false, &key.family);
        assert!(narrow > 0.0 && wide > narrow);
    }
}
