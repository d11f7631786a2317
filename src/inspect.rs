//! PDF inspection through lopdf: page count, fonts and extracted text.
//!
//! Used by tests and the CLI to check what a rendered document contains.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use lopdf::content::Content;
use lopdf::{Dictionary, Document as LoDocument, Encoding, Object};

use crate::error::{Error, Result};

const FONT_FILE_KEYS: [&[u8]; 3] = [b"FontFile", b"FontFile2", b"FontFile3"];

/// Summary of a parsed PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfReport {
    pub pdf_version: String,
    pub page_count: usize,
    /// `BaseFont` of every font dictionary.
    pub fonts: BTreeSet<String>,
    /// `FontName` of every descriptor carrying a font program.
    pub embedded_fonts: BTreeSet<String>,
    pub file_size_bytes: usize,
}

/// A PDF loaded for inspection.
pub struct PdfInspector {
    pdf: LoDocument,
    size: usize,
}

impl PdfInspector {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let pdf = LoDocument::load_mem(bytes)
            .map_err(|e| Error::resource("<pdf>", format!("cannot parse PDF: {e}")))?;
        Ok(Self {
            pdf,
            size: bytes.len(),
        })
    }

    pub fn page_count(&self) -> usize {
        self.pdf.get_pages().len()
    }

    /// Base font names referenced by the document.
    pub fn fonts(&self) -> BTreeSet<String> {
        self.dictionaries()
            .filter(|d| has_type(d, b"Font"))
            .filter_map(|d| name_of(d, b"BaseFont"))
            .collect()
    }

    /// Names of fonts whose glyph program is embedded.
    pub fn embedded_fonts(&self) -> BTreeSet<String> {
        self.dictionaries()
            .filter(|d| has_type(d, b"FontDescriptor"))
            .filter(|d| FONT_FILE_KEYS.iter().any(|k| d.has(k)))
            .filter_map(|d| name_of(d, b"FontName"))
            .collect()
    }

    /// Text of every page, in page order. Every text object ends a line.
    pub fn extract_text(&self) -> Result<String> {
        let mut text = String::new();
        for page_id in self.pdf.get_pages().into_values() {
            let decoders: BTreeMap<Vec<u8>, TextDecoder<'_>> = self
                .pdf
                .get_page_fonts(page_id)
                .map_err(text_error)?
                .into_iter()
                .map(|(name, font)| (name, TextDecoder::for_font(&self.pdf, font)))
                .collect();
            let data = self.pdf.get_page_content(page_id).map_err(text_error)?;
            let content = Content::decode(&data).map_err(text_error)?;

            let mut current = None;
            for op in &content.operations {
                match op.operator.as_str() {
                    "Tf" => {
                        current = op
                            .operands
                            .first()
                            .and_then(|o| o.as_name().ok())
                            .and_then(|name| decoders.get(name));
                    }
                    "Tj" | "TJ" => match current {
                        Some(decoder) => collect_text(&mut text, decoder, &op.operands)?,
                        None => log::warn!("text shown without a known font on page {page_id:?}"),
                    },
                    "ET" if !text.is_empty() && !text.ends_with('\n') => text.push('\n'),
                    _ => {}
                }
            }
        }
        Ok(text)
    }

    pub fn report(&self) -> PdfReport {
        PdfReport {
            pdf_version: self.pdf.version.clone(),
            page_count: self.page_count(),
            fonts: self.fonts(),
            embedded_fonts: self.embedded_fonts(),
            file_size_bytes: self.size,
        }
    }

    fn dictionaries(&self) -> impl Iterator<Item = &Dictionary> {
        self.pdf.objects.values().filter_map(|obj| match obj {
            Object::Dictionary(d) => Some(d),
            Object::Stream(s) => Some(&s.dict),
            _ => None,
        })
    }
}

fn has_type(dict: &Dictionary, ty: &[u8]) -> bool {
    matches!(dict.get(b"Type").and_then(Object::as_name), Ok(name) if name == ty)
}

/// A name value with any subset prefix (`ABCDEF+`) removed.
fn name_of(dict: &Dictionary, key: &[u8]) -> Option<String> {
    let raw = dict.get(key).and_then(Object::as_name).ok()?;
    let full = String::from_utf8_lossy(raw);
    let name = match full.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.chars().all(|c| c.is_ascii_uppercase()) => rest,
        _ => full.as_ref(),
    };
    Some(name.to_string())
}

fn text_error(e: lopdf::Error) -> Error {
    Error::resource("<pdf>", format!("cannot extract text: {e}"))
}

// ---------------------------------------------------------------------------
// Text decoding
// ---------------------------------------------------------------------------

/// How the strings of one font map back to Unicode.
enum TextDecoder<'a> {
    /// An encoding lopdf resolves itself (WinAnsi and friends).
    Lopdf(Encoding<'a>),
    /// Two-byte codes from the font's ToUnicode table.
    ToUnicode(HashMap<u16, String>),
    Unknown,
}

impl<'a> TextDecoder<'a> {
    fn for_font(doc: &'a LoDocument, font: &'a Dictionary) -> Self {
        match font.get_font_encoding(doc) {
            Ok(encoding) => TextDecoder::Lopdf(encoding),
            // lopdf rejects ToUnicode streams carrying PostScript comments,
            // which is how printpdf writes them.
            Err(e) => match to_unicode_map(doc, font) {
                Some(map) => TextDecoder::ToUnicode(map),
                None => {
                    log::warn!("no usable encoding for font: {e}");
                    TextDecoder::Unknown
                }
            },
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            TextDecoder::Lopdf(encoding) => LoDocument::decode_text(encoding, bytes).map_err(text_error),
            TextDecoder::ToUnicode(map) => Ok(bytes
                .chunks(2)
                .map(|code| {
                    code_of(code)
                        .and_then(|c| map.get(&c))
                        .map_or("\u{FFFD}", String::as_str)
                })
                .collect()),
            TextDecoder::Unknown => Ok(String::new()),
        }
    }
}

fn collect_text(text: &mut String, decoder: &TextDecoder<'_>, operands: &[Object]) -> Result<()> {
    for operand in operands {
        match operand {
            Object::String(bytes, _) => text.push_str(&decoder.decode(bytes)?),
            Object::Array(items) => collect_text(text, decoder, items)?,
            // A large negative adjustment in a TJ array reads as a word gap.
            Object::Integer(i) if *i < -100 => text.push(' '),
            Object::Real(r) if *r < -100.0 => text.push(' '),
            _ => {}
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum CmapSection {
    Char,
    Range,
}

/// The `bfchar` and `bfrange` entries of a font's ToUnicode stream.
fn to_unicode_map(doc: &LoDocument, font: &Dictionary) -> Option<HashMap<u16, String>> {
    let stream = font.get_deref(b"ToUnicode", doc).ok()?.as_stream().ok()?;
    let content = stream.get_plain_content().ok()?;
    let cmap = String::from_utf8_lossy(&content);

    let mut map = HashMap::new();
    let mut section = None;
    for line in cmap.lines() {
        let line = line.split('%').next().unwrap_or_default().trim();
        if line.ends_with("beginbfchar") {
            section = Some(CmapSection::Char);
            continue;
        }
        if line.ends_with("beginbfrange") {
            section = Some(CmapSection::Range);
            continue;
        }
        if line.starts_with("endbf") {
            section = None;
            continue;
        }
        let tokens = hex_tokens(line);
        match (section, tokens.as_slice()) {
            (Some(CmapSection::Char), [src, dst, ..]) => {
                if let Some(code) = code_of(src) {
                    map.insert(code, utf16_text(dst));
                }
            }
            (Some(CmapSection::Range), [lo, hi, targets @ ..]) if !targets.is_empty() => {
                let (Some(lo), Some(hi)) = (code_of(lo), code_of(hi)) else {
                    continue;
                };
                if line.contains('[') {
                    for (code, dst) in (lo..=hi).zip(targets) {
                        map.insert(code, utf16_text(dst));
                    }
                } else if let Some(base) = code_of(&targets[0]) {
                    for code in lo..=hi {
                        let unit = u32::from(base) + u32::from(code - lo);
                        if let Some(ch) = char::from_u32(unit) {
                            map.insert(code, ch.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }
    (!map.is_empty()).then_some(map)
}

/// Every `<...>` hex string on a line, as bytes.
fn hex_tokens(line: &str) -> Vec<Vec<u8>> {
    line.split('<')
        .skip(1)
        .filter_map(|rest| {
            let hex: String = rest
                .split('>')
                .next()?
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            (0..hex.len())
                .step_by(2)
                .map(|i| hex.get(i..i + 2).and_then(|h| u8::from_str_radix(h, 16).ok()))
                .collect()
        })
        .collect()
}

fn code_of(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
        [b] => Some(u16::from(*b)),
        _ => None,
    }
}

fn utf16_text(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Inspect PDF bytes in one call.
pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<PdfReport> {
    Ok(PdfInspector::from_bytes(bytes)?.report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn single_page_pdf(text: &str) -> Vec<u8> {
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        };
        pdf_with_font(|_| font, format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET"))
    }

    fn pdf_with_font(font: impl FnOnce(&mut LoDocument) -> Dictionary, content: String) -> Vec<u8> {
        let mut doc = LoDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font = font(&mut doc);
        let font_id = doc.add_object(font);
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    const COMMENTED_CMAP: &str = "/CIDInit /ProcSet findresource begin\n\n12 dict begin\n\nbegincmap\n\n\
        %!PS-Adobe-3.0 Resource-CMap\n%%DocumentNeededResources: procset CIDInit\n\n\
        /CMapName /FontSpecific-F1 def\n/CMapType 2 def\n\n\
        1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n\
        1 beginbfchar\n<0009> <00E9>\nendbfchar\n\
        1 beginbfrange\n<0004> <0006> <0041>\nendbfrange\n\
        endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n";

    #[test]
    fn reads_pages_and_fonts() {
        let report = inspect_pdf_bytes(&single_page_pdf("Hello")).unwrap();
        assert_eq!(report.page_count, 1);
        assert!(report.fonts.contains("Helvetica"));
        assert!(report.embedded_fonts.is_empty());
    }

    #[test]
    fn extracts_text() {
        let inspector = PdfInspector::from_bytes(&single_page_pdf("Hello")).unwrap();
        assert!(inspector.extract_text().unwrap().contains("Hello"));
    }

    #[test]
    fn decodes_identity_fonts_through_to_unicode() {
        let bytes = pdf_with_font(
            |doc| {
                let cmap_id = doc.add_object(Stream::new(dictionary! {}, COMMENTED_CMAP.as_bytes().to_vec()));
                dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type0",
                    "BaseFont" => "ABCDEF+Body",
                    "Encoding" => "Identity-H",
                    "ToUnicode" => cmap_id,
                }
            },
            "BT /F1 12 Tf 72 720 Td <0009000400050006> Tj ET BT /F1 12 Tf 72 700 Td <0004> Tj ET"
                .to_string(),
        );
        let inspector = PdfInspector::from_bytes(&bytes).unwrap();
        assert_eq!(inspector.extract_text().unwrap(), "\u{e9}ABC\nA\n");
        assert!(inspector.fonts().contains("Body"));
    }

    #[test]
    fn to_unicode_tables_skip_comments() {
        let tokens = hex_tokens("<0004> <0006> [<0041> <00420043>]");
        assert_eq!(tokens, vec![vec![0, 4], vec![0, 6], vec![0, 0x41], vec![0, 0x42, 0, 0x43]]);
        assert_eq!(utf16_text(&tokens[3]), "BC");
    }

    #[test]
    fn rejects_garbage() {
        assert!(PdfInspector::from_bytes(b"not a pdf").is_err());
    }
}
