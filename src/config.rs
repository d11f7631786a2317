//! Pipeline configuration.
//!
//! Everything the pipeline needs (page geometry, template root, markup
//! encoding, resource base and mail settings) travels in one explicit
//! [`PipelineConfig`] handed to [`crate::pipeline::Pipeline::new`]. Nothing is
//! read from ambient or static state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::normalize::Encoding;
use crate::pagination::PAGE_MARGIN_PT;

/// Page orientation for the generated PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageOrientation {
    /// Portrait mode: height > width (default).
    #[default]
    Portrait,
    /// Landscape mode: width > height (short-edge binding).
    Landscape,
}

/// Where templates live: a base directory plus a fixed filename suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateRoot {
    pub dir: PathBuf,
    pub suffix: String,
}

impl Default for TemplateRoot {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("templates"),
            suffix: ".html".to_string(),
        }
    }
}

impl TemplateRoot {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
        }
    }
}

/// Sender, recipients and the display title used when composing messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub sender: String,
    #[serde(deserialize_with = "address_list")]
    pub to: Vec<String>,
    #[serde(deserialize_with = "address_list")]
    pub cc: Vec<String>,
    #[serde(deserialize_with = "address_list")]
    pub bcc: Vec<String>,
    pub title: String,
}

/// Accept either a JSON array of addresses or one comma-separated string.
fn address_list<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Joined(String),
    }
    Ok(match Raw::deserialize(de)? {
        Raw::List(items) => items,
        Raw::Joined(joined) => joined.split(',').map(|s| s.trim().to_string()).collect(),
    })
}

/// Configuration for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Document title embedded in the PDF metadata.
    pub title: String,
    /// Page width in points (default: A4 = 595.28).
    pub page_width: f32,
    /// Page height in points (default: A4 = 841.89).
    pub page_height: f32,
    /// Page margin in points (default: 40).
    pub page_margin: f32,
    /// Page orientation; swaps effective width/height when `Landscape`.
    pub orientation: PageOrientation,
    pub templates: TemplateRoot,
    /// Encoding declared in the normalized markup.
    pub encoding: Encoding,
    /// Base URL or directory for relative stylesheet, image and font
    /// references. Defaults to the template directory.
    pub resource_base: Option<String>,
    pub mail: MailSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            title: "letterforge output".to_string(),
            page_width: 595.28,
            page_height: 841.89,
            page_margin: PAGE_MARGIN_PT,
            orientation: PageOrientation::Portrait,
            templates: TemplateRoot::default(),
            encoding: Encoding::Utf8,
            resource_base: None,
            mail: MailSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Effective page width after applying orientation.
    pub fn effective_width(&self) -> f32 {
        match self.orientation {
            PageOrientation::Portrait => self.page_width,
            PageOrientation::Landscape => self.page_height,
        }
    }

    /// Effective page height after applying orientation.
    pub fn effective_height(&self) -> f32 {
        match self.orientation {
            PageOrientation::Portrait => self.page_height,
            PageOrientation::Landscape => self.page_width,
        }
    }

    /// Create an A4 landscape config.
    pub fn a4_landscape() -> Self {
        Self {
            orientation: PageOrientation::Landscape,
            ..Self::default()
        }
    }

    /// The base used for relative resources: the explicit setting, or the
    /// template directory.
    pub fn resource_base(&self) -> String {
        match &self.resource_base {
            Some(base) => base.clone(),
            None => self.templates.dir.to_string_lossy().into_owned(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.page_width <= 0.0 || self.page_height <= 0.0 {
            return Err(Error::Config("page dimensions must be positive".into()));
        }
        if self.page_margin < 0.0
            || 2.0 * self.page_margin >= self.effective_width().min(self.effective_height())
        {
            return Err(Error::Config(format!(
                "page margin {} leaves no content area",
                self.page_margin
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_swaps_dimensions() {
        let cfg = PipelineConfig::a4_landscape();
        assert!(cfg.effective_width() > cfg.effective_height());
    }

    #[test]
    fn recipients_accept_comma_string() {
        let cfg = PipelineConfig::from_json_str(
            r#"{"mail": {"sender": "a@x.org", "to": "b@x.org, c@x.org", "cc": ["d@x.org"], "bcc": ""}}"#,
        )
        .unwrap();
        assert_eq!(cfg.mail.to, vec!["b@x.org", "c@x.org"]);
        assert_eq!(cfg.mail.cc, vec!["d@x.org"]);
        assert_eq!(cfg.mail.bcc, vec![""]);
        assert_eq!(cfg.templates.suffix, ".html");
    }

    #[test]
    fn rejects_oversized_margin() {
        let err = PipelineConfig::from_json_str(r#"{"page_margin": 400}"#).unwrap_err();
        assert!(err.to_string().contains("margin"));
    }

    #[test]
    fn resource_base_defaults_to_template_dir() {
        let mut cfg = PipelineConfig::default();
        cfg.templates.dir = PathBuf::from("/srv/tpl");
        assert_eq!(cfg.resource_base(), "/srv/tpl");
    }
}
