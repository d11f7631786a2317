//! Pipeline – ties binding, normalization, rendering, message assembly and
//! delivery together.
//!
//! Each stage aborts the run on its first error; nothing after a failed
//! stage executes and no partial PDF is produced.

use crate::binder::{RawMarkup, TemplateBinder};
use crate::config::PipelineConfig;
use crate::context::TemplateContext;
use crate::delivery::{deliver, DeliveryGateway};
use crate::error::Result;
use crate::fonts::FontResource;
use crate::layout_config::{LayoutConfig, PageGeometry};
use crate::message::{assemble, AttachmentDescriptor, EnvelopeDraft, MessageEnvelope};
use crate::normalize::{normalize, NormalizedMarkup};
use crate::renderer::{DocumentRenderer, RenderedDocument};
use crate::resources::ResourceBase;

/// One configured pipeline. Instances share nothing; run several in
/// parallel by giving each its own.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    binder: TemplateBinder,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let binder = TemplateBinder::from_root(config.templates.clone());
        Self { config, binder }
    }

    /// Use a custom binder (for example one over in-memory templates).
    pub fn with_binder(config: PipelineConfig, binder: TemplateBinder) -> Self {
        Self { config, binder }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Bind template `name` and normalize the result.
    pub fn prepare(&self, name: &str, context: &TemplateContext) -> Result<NormalizedMarkup> {
        let raw = self.binder.bind(name, context)?;
        let markup = normalize(&raw, self.config.encoding)?;
        log::debug!(
            "normalized '{}' as {} ({} bytes)",
            name,
            markup.encoding(),
            markup.as_str().len()
        );
        Ok(markup)
    }

    /// A renderer set up with this pipeline's page geometry, title, resource
    /// base and `fonts`.
    pub fn renderer(&self, fonts: &[FontResource]) -> Result<DocumentRenderer> {
        let base = ResourceBase::parse(&self.config.resource_base())?;
        let mut renderer = DocumentRenderer::new(base)
            .with_geometry(PageGeometry::from_config(&self.config))
            .with_title(self.config.title.clone());
        for font in fonts {
            renderer.register_font(font.clone())?;
        }
        Ok(renderer)
    }

    /// Render normalized markup, returning the PDF and the page layout it
    /// was drawn from.
    pub fn render_normalized(
        &self,
        markup: &NormalizedMarkup,
        fonts: &[FontResource],
    ) -> Result<(RenderedDocument, LayoutConfig)> {
        let mut renderer = self.renderer(fonts)?;
        renderer.load(markup)?;
        let layout = renderer.layout()?.clone();
        let document = renderer.finish()?;
        Ok((document, layout))
    }

    /// bind → normalize → render.
    pub fn render_template(
        &self,
        name: &str,
        context: &TemplateContext,
        fonts: &[FontResource],
    ) -> Result<RenderedDocument> {
        let markup = self.prepare(name, context)?;
        let (document, _) = self.render_normalized(&markup, fonts)?;
        Ok(document)
    }

    /// normalize → render, for markup that needs no binding.
    pub fn render_markup(&self, html: &str, fonts: &[FontResource]) -> Result<RenderedDocument> {
        let markup = normalize(&RawMarkup::new(html), self.config.encoding)?;
        let (document, _) = self.render_normalized(&markup, fonts)?;
        Ok(document)
    }

    /// Build an envelope from the configured mail settings with `document`
    /// attached as `attachment_name`, followed by `extra` attachments.
    ///
    /// `body_mime_type` defaults to `text/plain`; pass `Some("text/html")`
    /// to send the normalized markup itself as the body.
    pub fn compose(
        &self,
        document: RenderedDocument,
        attachment_name: &str,
        extra: Vec<AttachmentDescriptor>,
        subject: impl Into<String>,
        body: impl Into<String>,
        body_mime_type: Option<&str>,
    ) -> Result<MessageEnvelope> {
        let mail = &self.config.mail;
        let mut attachments = vec![document.into_attachment(attachment_name)?];
        attachments.extend(extra);
        assemble(EnvelopeDraft {
            sender: mail.sender.clone(),
            to: mail.to.clone(),
            cc: mail.cc.clone(),
            bcc: mail.bcc.clone(),
            subject: subject.into(),
            body: body.into(),
            body_mime_type: body_mime_type.map(str::to_string),
            attachments,
            title: mail.title.clone(),
        })
    }

    /// Hand an envelope to `gateway`.
    pub fn dispatch(&self, gateway: &dyn DeliveryGateway, envelope: &MessageEnvelope) -> Result<()> {
        deliver(gateway, envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::MemorySource;
    use crate::config::{MailSettings, PageOrientation};
    use crate::delivery::RecordingGateway;
    use crate::error::ErrorKind;

    fn pipeline(templates: &[(&str, &str)], config: PipelineConfig) -> Pipeline {
        let source = MemorySource::with_templates(templates.iter().copied());
        Pipeline::with_binder(config, TemplateBinder::new(source))
    }

    fn config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            resource_base: Some(dir.display().to_string()),
            mail: MailSettings {
                sender: "letters@example.org".into(),
                to: vec!["john.doe@example.org".into(), "".into()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn pipeline_basic() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&[], config(dir.path()));
        let doc = p.render_markup("<h1>Hello</h1><p>World</p>", &[]).unwrap();
        assert!(doc.page_count() >= 1);
        assert_eq!(&doc.bytes()[0..5], b"%PDF-");
    }

    #[test]
    fn landscape_config_reaches_layout() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            &[("t", "<p>{{ name }}</p>")],
            PipelineConfig {
                orientation: PageOrientation::Landscape,
                ..config(dir.path())
            },
        );
        let markup = p
            .prepare("t", &TemplateContext::new().with("name", "Doe"))
            .unwrap();
        let (_, layout) = p.render_normalized(&markup, &[]).unwrap();
        assert!(layout.page_width_pt > layout.page_height_pt);
        assert_eq!(layout.text_lines(), vec!["Doe"]);
    }

    #[test]
    fn binder_errors_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&[("t", "<p>{{ missing }}</p>")], config(dir.path()));
        let err = p.render_template("t", &TemplateContext::new(), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnresolvedPlaceholder);
    }

    #[test]
    fn compose_and_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&[], config(dir.path()));
        let doc = p.render_markup("<p>letter</p>", &[]).unwrap();
        let envelope = p.compose(doc, "letter.pdf", vec![], "Hi", "body", None).unwrap();
        assert_eq!(envelope.to().len(), 1);
        assert_eq!(envelope.body_mime_type(), "text/plain");
        assert_eq!(envelope.attachments()[0].mime_type(), "application/pdf");

        let gateway = RecordingGateway::accepting();
        p.dispatch(&gateway, &envelope).unwrap();
        assert_eq!(gateway.sent().len(), 1);
    }

    #[test]
    fn compose_with_markup_body() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&[("t", "<p>Dear {{ name }}</p>")], config(dir.path()));
        let markup = p
            .prepare("t", &TemplateContext::new().with("name", "John"))
            .unwrap();
        let (doc, _) = p.render_normalized(&markup, &[]).unwrap();
        let envelope = p
            .compose(doc, "letter.pdf", vec![], "Hi", markup.as_str(), Some("text/html"))
            .unwrap();
        assert_eq!(envelope.body_mime_type(), "text/html");
        assert!(envelope.body().contains("<p>Dear John</p>"));
    }
}
