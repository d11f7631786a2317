//! Message assembly – validates recipients and attachments and packages them
//! into a [`MessageEnvelope`] ready for a delivery gateway.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Body MIME type used when the draft names none.
pub const DEFAULT_BODY_MIME: &str = "text/plain";

const OCTET_STREAM: &str = "application/octet-stream";

/// Where an attachment's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// One attachment: in-memory bytes or a file on disk, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDescriptor {
    source: AttachmentSource,
    filename: String,
    mime_type: String,
}

impl AttachmentDescriptor {
    /// Build a descriptor from exactly one of `content` and `path`.
    ///
    /// A path attachment without an explicit MIME type gets one guessed from
    /// its filename extension.
    pub fn new(
        content: Option<Vec<u8>>,
        path: Option<PathBuf>,
        filename: impl Into<String>,
        mime_type: Option<String>,
    ) -> Result<Self> {
        let filename = filename.into();
        if filename.trim().is_empty() {
            return Err(Error::InvalidAttachment {
                filename,
                reason: "attachment filename is empty".into(),
            });
        }
        let source = match (content, path) {
            (Some(bytes), None) => AttachmentSource::Bytes(bytes),
            (None, Some(path)) => AttachmentSource::File(path),
            (Some(_), Some(_)) => {
                return Err(Error::InvalidAttachment {
                    filename,
                    reason: "both content and a file path were given".into(),
                })
            }
            (None, None) => {
                return Err(Error::InvalidAttachment {
                    filename,
                    reason: "neither content nor a file path was given".into(),
                })
            }
        };
        let mime_type = match mime_type.filter(|m| !m.trim().is_empty()) {
            Some(m) => m.trim().to_ascii_lowercase(),
            None => guess_mime_type(&filename).to_string(),
        };
        Ok(Self {
            source,
            filename,
            mime_type,
        })
    }

    pub fn from_bytes(
        bytes: Vec<u8>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Result<Self> {
        Self::new(Some(bytes), None, filename, Some(mime_type.into()))
    }

    /// A file attachment; the filename defaults to the path's last component.
    pub fn from_path(path: impl Into<PathBuf>, filename: Option<&str>) -> Result<Self> {
        let path = path.into();
        let filename = match filename {
            Some(f) => f.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        Self::new(None, Some(path), filename, None)
    }

    pub fn source(&self) -> &AttachmentSource {
        &self.source
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The attachment's bytes, reading the file for path attachments.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        match &self.source {
            AttachmentSource::Bytes(b) => Ok(b.clone()),
            AttachmentSource::File(path) => {
                std::fs::read(path).map_err(|e| Error::InvalidAttachment {
                    filename: self.filename.clone(),
                    reason: format!("cannot read {}: {e}", path.display()),
                })
            }
        }
    }

    fn check_exists(&self) -> Result<()> {
        match &self.source {
            AttachmentSource::File(path) if !path.is_file() => Err(Error::InvalidAttachment {
                filename: self.filename.clone(),
                reason: format!("file {} does not exist", path.display()),
            }),
            _ => Ok(()),
        }
    }
}

/// Guess a MIME type from a filename extension.
pub fn guess_mime_type(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "txt" | "text" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "xhtml" => "application/xhtml+xml",
        "xml" => "application/xml",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "zip" => "application/zip",
        _ => OCTET_STREAM,
    }
}

/// Everything a caller supplies to build an envelope.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeDraft {
    pub sender: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Defaults to [`DEFAULT_BODY_MIME`].
    pub body_mime_type: Option<String>,
    pub attachments: Vec<AttachmentDescriptor>,
    /// Display name shown alongside the sender.
    pub title: String,
}

/// A validated message: a well-formed sender and at least one primary
/// recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    sender: String,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    subject: String,
    body: String,
    body_mime_type: String,
    attachments: Vec<AttachmentDescriptor>,
    title: String,
}

impl MessageEnvelope {
    pub fn sender(&self) -> &str {
        &self.sender
    }
    pub fn to(&self) -> &[String] {
        &self.to
    }
    pub fn cc(&self) -> &[String] {
        &self.cc
    }
    pub fn bcc(&self) -> &[String] {
        &self.bcc
    }
    pub fn subject(&self) -> &str {
        &self.subject
    }
    pub fn body(&self) -> &str {
        &self.body
    }
    pub fn body_mime_type(&self) -> &str {
        &self.body_mime_type
    }
    pub fn attachments(&self) -> &[AttachmentDescriptor] {
        &self.attachments
    }
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Every recipient across `to`, `cc` and `bcc`.
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }
}

/// `local@domain` with a dotted or single-label domain and no whitespace.
fn is_valid_address(addr: &str) -> bool {
    let Some((local, domain)) = addr.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !addr.chars().any(|c| c.is_whitespace() || c.is_control())
        && !local.contains('@')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

fn clean_recipients(list: Vec<String>, field: &str) -> Result<Vec<String>> {
    list.into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .map(|a| {
            if is_valid_address(&a) {
                Ok(a)
            } else {
                Err(Error::InvalidEnvelope(format!(
                    "invalid {field} address '{a}'"
                )))
            }
        })
        .collect()
}

/// Validate a draft and build the envelope.
pub fn assemble(draft: EnvelopeDraft) -> Result<MessageEnvelope> {
    let sender = draft.sender.trim().to_string();
    if !is_valid_address(&sender) {
        return Err(Error::InvalidEnvelope(format!(
            "invalid sender address '{sender}'"
        )));
    }
    let to = clean_recipients(draft.to, "to")?;
    if to.is_empty() {
        return Err(Error::InvalidEnvelope(
            "at least one primary recipient is required".into(),
        ));
    }
    let cc = clean_recipients(draft.cc, "cc")?;
    let bcc = clean_recipients(draft.bcc, "bcc")?;

    for attachment in &draft.attachments {
        attachment.check_exists()?;
    }

    let body_mime_type = draft
        .body_mime_type
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BODY_MIME.to_string());

    let envelope = MessageEnvelope {
        sender,
        to,
        cc,
        bcc,
        subject: draft.subject,
        body: draft.body,
        body_mime_type,
        attachments: draft.attachments,
        title: draft.title,
    };
    log::debug!(
        "assembled envelope '{}' for {} recipient(s) with {} attachment(s)",
        envelope.subject,
        envelope.recipient_count(),
        envelope.attachments.len()
    );
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn draft() -> EnvelopeDraft {
        EnvelopeDraft {
            sender: "letters@example.org".into(),
            to: vec!["john.doe@example.org".into()],
            subject: "Your letter".into(),
            body: "See attachment".into(),
            ..Default::default()
        }
    }

    #[test]
    fn blank_recipients_are_dropped() {
        let env = assemble(EnvelopeDraft {
            to: vec!["a@x.org".into(), " ".into(), "".into()],
            cc: vec!["".into()],
            bcc: vec![],
            ..draft()
        })
        .unwrap();
        assert_eq!(env.to(), ["a@x.org".to_string()]);
        assert!(env.cc().is_empty());
        assert_eq!(env.body_mime_type(), DEFAULT_BODY_MIME);
    }

    #[test]
    fn needs_a_primary_recipient_and_valid_addresses() {
        for bad in [
            EnvelopeDraft {
                to: vec!["".into()],
                ..draft()
            },
            EnvelopeDraft {
                sender: "nobody".into(),
                ..draft()
            },
            EnvelopeDraft {
                cc: vec!["two words@x.org".into()],
                ..draft()
            },
        ] {
            assert_eq!(assemble(bad).unwrap_err().kind(), ErrorKind::InvalidEnvelope);
        }
    }

    #[test]
    fn attachment_needs_exactly_one_source() {
        let both = AttachmentDescriptor::new(Some(vec![1]), Some("a.txt".into()), "a.txt", None);
        let neither = AttachmentDescriptor::new(None, None, "a.txt", None);
        for r in [both, neither] {
            assert_eq!(r.unwrap_err().kind(), ErrorKind::InvalidAttachment);
        }
    }

    #[test]
    fn mime_types() {
        let a = AttachmentDescriptor::from_path("/tmp/report.PDF", None).unwrap();
        assert_eq!(a.mime_type(), "application/pdf");
        assert_eq!(a.filename(), "report.PDF");
        assert_eq!(guess_mime_type("data.bin"), OCTET_STREAM);
        let csv = AttachmentDescriptor::from_bytes(b"a,b\n".to_vec(), "t.csv", "text/csv").unwrap();
        assert_eq!(csv.read_bytes().unwrap(), b"a,b\n");
    }

    #[test]
    fn missing_file_attachment_fails_upfront() {
        let dir = tempfile::tempdir().unwrap();
        let missing = AttachmentDescriptor::from_path(dir.path().join("gone.txt"), Some("testDoc.txt")).unwrap();
        let err = assemble(EnvelopeDraft {
            attachments: vec![missing],
            ..draft()
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAttachment);

        let path = dir.path().join("here.txt");
        std::fs::write(&path, "hello").unwrap();
        let present = AttachmentDescriptor::from_path(&path, None).unwrap();
        let env = assemble(EnvelopeDraft {
            attachments: vec![present],
            body_mime_type: Some("text/html".into()),
            ..draft()
        })
        .unwrap();
        assert_eq!(env.attachments()[0].read_bytes().unwrap(), b"hello");
        assert_eq!(env.body_mime_type(), "text/html");
    }
}
