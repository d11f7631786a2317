//! Delivery – hands an assembled [`MessageEnvelope`] to a gateway.
//!
//! No transport lives here. [`RecordingGateway`] keeps envelopes in memory;
//! [`OutboxGateway`] drops each one into a directory as JSON for another
//! process to pick up.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::message::MessageEnvelope;

/// Something that can send an envelope. `Ok(false)` means the gateway
/// declined it.
pub trait DeliveryGateway {
    fn send_email(&self, envelope: &MessageEnvelope) -> Result<bool>;
}

/// Send through `gateway`, turning a refusal or any gateway error into
/// [`Error::DeliveryFailure`].
pub fn deliver(gateway: &dyn DeliveryGateway, envelope: &MessageEnvelope) -> Result<()> {
    match gateway.send_email(envelope) {
        Ok(true) => {
            log::info!(
                "delivered '{}' to {} recipient(s)",
                envelope.subject(),
                envelope.recipient_count()
            );
            Ok(())
        }
        Ok(false) => Err(Error::DeliveryFailure(format!(
            "gateway declined message '{}'",
            envelope.subject()
        ))),
        Err(Error::DeliveryFailure(reason)) => Err(Error::DeliveryFailure(reason)),
        Err(e) => Err(Error::DeliveryFailure(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// In-memory gateway
// ---------------------------------------------------------------------------

/// Records every envelope it is given and answers with a fixed result.
#[derive(Debug)]
pub struct RecordingGateway {
    accept: bool,
    sent: Mutex<Vec<MessageEnvelope>>,
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::accepting()
    }
}

impl RecordingGateway {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Envelopes received so far, accepted or not.
    pub fn sent(&self) -> Vec<MessageEnvelope> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl DeliveryGateway for RecordingGateway {
    fn send_email(&self, envelope: &MessageEnvelope) -> Result<bool> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| Error::DeliveryFailure("recording gateway lock poisoned".into()))?;
        sent.push(envelope.clone());
        Ok(self.accept)
    }
}

// ---------------------------------------------------------------------------
// Outbox gateway
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OutboxAttachment<'a> {
    filename: &'a str,
    mime_type: &'a str,
    /// Base64 of the attachment bytes.
    content: String,
}

#[derive(Serialize)]
struct OutboxMessage<'a> {
    sender: &'a str,
    title: &'a str,
    to: &'a [String],
    cc: &'a [String],
    bcc: &'a [String],
    subject: &'a str,
    body: &'a str,
    body_mime_type: &'a str,
    attachments: Vec<OutboxAttachment<'a>>,
}

/// Writes each envelope to `<dir>/<sha256>.json`.
#[derive(Debug, Clone)]
pub struct OutboxGateway {
    dir: PathBuf,
}

impl OutboxGateway {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the envelope and return the file it was written to.
    pub fn store(&self, envelope: &MessageEnvelope) -> Result<PathBuf> {
        let attachments = envelope
            .attachments()
            .iter()
            .map(|a| {
                Ok(OutboxAttachment {
                    filename: a.filename(),
                    mime_type: a.mime_type(),
                    content: BASE64_STD.encode(a.read_bytes()?),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let message = OutboxMessage {
            sender: envelope.sender(),
            title: envelope.title(),
            to: envelope.to(),
            cc: envelope.cc(),
            bcc: envelope.bcc(),
            subject: envelope.subject(),
            body: envelope.body(),
            body_mime_type: envelope.body_mime_type(),
            attachments,
        };
        let json = serde_json::to_vec_pretty(&message)
            .map_err(|e| Error::DeliveryFailure(format!("cannot serialize message: {e}")))?;

        let digest = Sha256::digest(&json);
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();

        std::fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        let path = self.dir.join(format!("{name}.json"));
        let tmp = self.dir.join(format!(".{name}.json.tmp"));
        std::fs::write(&tmp, &json)
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                Error::io(&path, e)
            })?;
        log::debug!("stored message in {}", path.display());
        Ok(path)
    }
}

impl DeliveryGateway for OutboxGateway {
    fn send_email(&self, envelope: &MessageEnvelope) -> Result<bool> {
        self.store(envelope).map(|_| true)
    }
}
