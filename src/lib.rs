//! # letterforge – template-driven letter pipeline
//!
//! Turns a named template plus structured data into a PDF and, optionally,
//! an email envelope carrying it. The stages are:
//!
//! 1. **Bind** – template + [`TemplateContext`] → raw markup ([`binder`])
//! 2. **Normalize** – raw markup → strict XHTML ([`normalize`])
//! 3. **Render** – XHTML → styled, laid-out, paginated PDF ([`renderer`],
//!    built on [`dom`], [`style`], [`fonts`], [`layout`], [`pagination`]
//!    and [`render`])
//! 4. **Assemble** – sender, recipients and attachments → [`MessageEnvelope`]
//!    ([`message`])
//! 5. **Deliver** – envelope → a [`DeliveryGateway`] ([`delivery`])
//!
//! [`Pipeline`] runs the stages in order from one [`PipelineConfig`].

pub mod binder;
pub mod config;
pub mod context;
pub mod delivery;
pub mod dom;
pub mod error;
pub mod fonts;
pub mod inspect;
pub mod layout;
pub mod layout_config;
pub mod message;
pub mod normalize;
pub mod pagination;
pub mod pipeline;
pub mod render;
pub mod renderer;
pub mod resources;
pub mod style;

// Re-exports for convenience
pub use binder::{RawMarkup, TemplateBinder};
pub use config::{MailSettings, PageOrientation, PipelineConfig, TemplateRoot};
pub use context::{TemplateContext, Value};
pub use delivery::{deliver, DeliveryGateway, OutboxGateway, RecordingGateway};
pub use error::{Error, ErrorKind, Result};
pub use fonts::{FontEncoding, FontResource};
pub use message::{assemble, AttachmentDescriptor, EnvelopeDraft, MessageEnvelope};
pub use normalize::{normalize, Encoding, NormalizedMarkup};
pub use pipeline::Pipeline;
pub use renderer::{render, DocumentRenderer, RenderedDocument};
