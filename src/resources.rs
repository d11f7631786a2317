//! Base resource URL resolution.
//!
//! Relative stylesheet, image and font references in a document are resolved
//! against one base: a `file:` URL or a plain directory path. `data:` URIs are
//! decoded inline. Any reference that cannot be turned into bytes is a
//! [`Error::ResourceResolution`].

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use url::Url;

use crate::error::{Error, Result};

/// Bytes fetched for one document reference.
#[derive(Debug, Clone)]
pub struct Resource {
    /// The reference as written in the document.
    pub reference: String,
    /// MIME type from a `data:` header, when there was one.
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

/// The directory relative references resolve against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBase {
    url: Url,
}

impl ResourceBase {
    /// Parse a `file:` URL or a directory path.
    pub fn parse(base: &str) -> Result<Self> {
        let base = base.trim();
        if let Some(url) = parse_absolute_url(base) {
            if url.scheme() != "file" {
                return Err(Error::resource(
                    base,
                    format!("unsupported base URL scheme '{}'", url.scheme()),
                ));
            }
            let path = url
                .to_file_path()
                .map_err(|_| Error::resource(base, "file URL has no local path"))?;
            return Self::from_dir(&path);
        }
        Self::from_dir(Path::new(if base.is_empty() { "." } else { base }))
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let absolute = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| Error::resource(dir.display().to_string(), e.to_string()))?
                .join(dir)
        };
        let url = Url::from_directory_path(&absolute).map_err(|_| {
            Error::resource(absolute.display().to_string(), "not a usable directory path")
        })?;
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The base as a local directory.
    pub fn dir(&self) -> PathBuf {
        self.url.to_file_path().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Resolve a non-`data:` reference to a local file path.
    pub fn resolve_path(&self, reference: &str) -> Result<PathBuf> {
        let url = match parse_absolute_url(reference) {
            Some(url) => url,
            None => self
                .url
                .join(reference)
                .map_err(|e| Error::resource(reference, e.to_string()))?,
        };
        if url.scheme() != "file" {
            return Err(Error::resource(
                reference,
                format!("unsupported URL scheme '{}'", url.scheme()),
            ));
        }
        url.to_file_path()
            .map_err(|_| Error::resource(reference, "URL has no local path"))
    }

    /// Fetch the bytes behind a reference.
    pub fn fetch(&self, reference: &str) -> Result<Resource> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::resource(reference, "empty reference"));
        }
        if reference.starts_with("data:") {
            let (mime, bytes) = decode_data_uri(reference)?;
            return Ok(Resource {
                reference: preview(reference),
                mime: Some(mime),
                bytes,
            });
        }
        let path = self.resolve_path(reference)?;
        let bytes = std::fs::read(&path)
            .map_err(|e| Error::resource(reference, format!("{}: {e}", path.display())))?;
        log::debug!("fetched '{}' ({} bytes)", reference, bytes.len());
        Ok(Resource {
            reference: reference.to_string(),
            mime: None,
            bytes,
        })
    }

    /// Fetch a reference and decode it as UTF-8 text (stylesheets).
    pub fn fetch_text(&self, reference: &str) -> Result<String> {
        let resource = self.fetch(reference)?;
        String::from_utf8(resource.bytes)
            .map_err(|_| Error::resource(reference, "stylesheet is not valid UTF-8"))
    }
}

/// Only multi-letter schemes count, so `C:\fonts` stays a path.
fn parse_absolute_url(s: &str) -> Option<Url> {
    Url::parse(s).ok().filter(|u| u.scheme().len() > 1)
}

fn preview(s: &str) -> String {
    match s.char_indices().nth(48) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}

/// Decode a `data:[<mime>][;base64],<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| Error::resource(preview(uri), "not a data URI"))?;
    let comma = rest.find(',').ok_or_else(|| {
        Error::resource(preview(uri), "missing ',' between header and data")
    })?;
    let header = &rest[..comma];
    let payload = &rest[comma + 1..];
    let mut parts = header.split(';');
    let mime = match parts.next().map(str::trim) {
        Some(m) if !m.is_empty() => m.to_ascii_lowercase(),
        _ => "text/plain".to_string(),
    };
    let is_base64 = parts.any(|p| p.trim().eq_ignore_ascii_case("base64"));
    let bytes = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        BASE64_STD
            .decode(compact)
            .map_err(|e| Error::resource(preview(uri), format!("base64 decode error: {e}")))?
    } else {
        percent_decode(payload)
    };
    Ok((mime, bytes))
}

fn percent_decode(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(b) = u8::from_str_radix(hex, 16) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn directory_and_file_url_bases_agree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("style.css"), "p { color: red }").unwrap();

        let from_dir = ResourceBase::from_dir(dir.path()).unwrap();
        let url = Url::from_directory_path(dir.path()).unwrap();
        let from_url = ResourceBase::parse(url.as_str()).unwrap();
        assert_eq!(from_dir, from_url);
        assert_eq!(from_url.fetch_text("style.css").unwrap(), "p { color: red }");
    }

    #[test]
    fn missing_file_is_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = ResourceBase::from_dir(dir.path()).unwrap();
        let err = base.fetch("nope.png").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceResolution);
    }

    #[test]
    fn rejects_remote_schemes() {
        assert_eq!(
            ResourceBase::parse("https://example.org/").unwrap_err().kind(),
            ErrorKind::ResourceResolution
        );
        let base = ResourceBase::from_dir(Path::new("/tmp")).unwrap();
        assert!(base.fetch("http://example.org/a.png").is_err());
    }

    #[test]
    fn data_uris() {
        let (mime, bytes) = decode_data_uri("data:text/css;base64,cCB7fQ==").unwrap();
        assert_eq!(mime, "text/css");
        assert_eq!(bytes, b"p {}");

        let (mime, bytes) = decode_data_uri("data:,a%20b").unwrap();
        assert_eq!(mime, "text/plain");
        assert_eq!(bytes, b"a b");

        assert!(decode_data_uri("data:image/png;base64,!!!").is_err());
    }
}
