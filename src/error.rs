//! Error types for the letterforge pipeline.
//!
//! Every stage reports through the single [`Error`] enum. Binder, normalizer
//! and renderer errors are fatal to the current document: the pipeline stops
//! at the first one and no partial PDF is produced. Delivery failures are
//! surfaced to the caller as [`Error::DeliveryFailure`] rather than swallowed.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the letterforge library.
#[derive(Debug, Error)]
pub enum Error {
    // ── Template binder ───────────────────────────────────────────────────
    /// No template with this name exists under the template root.
    #[error("template not found: '{name}' (looked in {location})")]
    TemplateNotFound { name: String, location: String },

    /// A chain of `{{> …}}` includes leads back to a template already being
    /// expanded.
    #[error("template include cycle: {}", chain.join(" -> "))]
    TemplateCycle { chain: Vec<String> },

    /// The template text itself is malformed (unclosed tag, unbalanced block).
    #[error("template syntax error in '{template}' at byte {offset}: {message}")]
    TemplateSyntax {
        template: String,
        offset: usize,
        message: String,
    },

    /// A required placeholder did not resolve against the context.
    #[error("unresolved placeholder '{path}' in template '{template}'")]
    UnresolvedPlaceholder { template: String, path: String },

    // ── Markup normalizer ─────────────────────────────────────────────────
    /// Input could not be decoded or repaired into well-formed markup.
    #[error("markup normalization failed: {reason}")]
    MarkupNormalization { reason: String },

    // ── Document renderer ─────────────────────────────────────────────────
    /// A stylesheet, image or font reference could not be resolved or decoded.
    #[error("cannot resolve resource '{reference}': {reason}")]
    ResourceResolution { reference: String, reason: String },

    /// A renderer operation was called in the wrong state.
    #[error("invalid renderer call: cannot {operation} while {state}")]
    InvalidSequence {
        operation: &'static str,
        state: &'static str,
    },

    /// A font's embedding flag contradicts its declared encoding.
    #[error("font '{path}' declares {encoding} but embedding={embedded}")]
    FontEncodingMismatch {
        path: PathBuf,
        encoding: &'static str,
        embedded: bool,
    },

    /// Text contains a character the selected font encoding cannot represent.
    #[error("character {ch:?} cannot be encoded with font '{font}'")]
    UnencodableText { ch: char, font: String },

    /// The layout engine rejected the document tree.
    #[error("layout failed: {0}")]
    Layout(String),

    // ── Message assembler ─────────────────────────────────────────────────
    /// Sender or recipient lists violate the envelope invariant.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// An attachment has both or neither of content and path, or its file is
    /// missing.
    #[error("invalid attachment '{filename}': {reason}")]
    InvalidAttachment { filename: String, reason: String },

    // ── Delivery ──────────────────────────────────────────────────────────
    /// The delivery gateway refused or failed to send the message.
    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    // ── Ambient ───────────────────────────────────────────────────────────
    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem error outside resource resolution (output files, outbox).
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Flat classification of [`Error`] for callers that branch on the kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TemplateNotFound,
    TemplateCycle,
    TemplateSyntax,
    UnresolvedPlaceholder,
    MarkupNormalization,
    ResourceResolution,
    InvalidSequence,
    FontEncodingMismatch,
    UnencodableText,
    Layout,
    InvalidEnvelope,
    InvalidAttachment,
    DeliveryFailure,
    Config,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TemplateNotFound { .. } => ErrorKind::TemplateNotFound,
            Error::TemplateCycle { .. } => ErrorKind::TemplateCycle,
            Error::TemplateSyntax { .. } => ErrorKind::TemplateSyntax,
            Error::UnresolvedPlaceholder { .. } => ErrorKind::UnresolvedPlaceholder,
            Error::MarkupNormalization { .. } => ErrorKind::MarkupNormalization,
            Error::ResourceResolution { .. } => ErrorKind::ResourceResolution,
            Error::InvalidSequence { .. } => ErrorKind::InvalidSequence,
            Error::FontEncodingMismatch { .. } => ErrorKind::FontEncodingMismatch,
            Error::UnencodableText { .. } => ErrorKind::UnencodableText,
            Error::Layout(_) => ErrorKind::Layout,
            Error::InvalidEnvelope(_) => ErrorKind::InvalidEnvelope,
            Error::InvalidAttachment { .. } => ErrorKind::InvalidAttachment,
            Error::DeliveryFailure(_) => ErrorKind::DeliveryFailure,
            Error::Config(_) => ErrorKind::Config,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn resource(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ResourceResolution {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn normalization(reason: impl Into<String>) -> Self {
        Error::MarkupNormalization {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_chain() {
        let err = Error::TemplateCycle {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "template include cycle: a -> b -> a");
        assert_eq!(err.kind(), ErrorKind::TemplateCycle);
    }

    #[test]
    fn io_error_keeps_source() {
        let err = Error::io(
            "/tmp/x.pdf",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
