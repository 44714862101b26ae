//! # Template resources
//!
//! A template resource pairs a Handlebars source file with a destination
//! path and the store keys whose values feed it. Resources are declared in
//! `<confdir>/conf.d/*.toml`; sources live in `<confdir>/templates`.
//!
//! The [`TemplateEngine`] renders resources on demand and the processors in
//! [`processor`] drive it, either on a fixed interval or from store change
//! notifications.

pub mod processor;
pub mod render;
pub mod resource;

pub use processor::{
    ERROR_CHANNEL_CAPACITY, IntervalProcessor, Processor, ProcessorHandle, WatchProcessor,
};
pub use render::{RenderOutcome, RenderReport, TemplateEngine};
pub use resource::{TemplateResource, join_key, load_resources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where resources are found and how they are rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Root holding `conf.d/` and `templates/`.
    pub confdir: PathBuf,
    /// Global key prefix applied beneath every resource prefix.
    pub prefix: String,
    /// Render without touching destination files.
    pub noop: bool,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            confdir: PathBuf::from("/etc/confsync"),
            prefix: String::new(),
            noop: false,
        }
    }
}

impl TemplateConfig {
    pub fn resource_dir(&self) -> PathBuf {
        self.confdir.join("conf.d")
    }

    pub fn template_dir(&self) -> PathBuf {
        self.confdir.join("templates")
    }

    pub fn with_confdir(confdir: impl AsRef<Path>) -> Self {
        Self {
            confdir: confdir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }
}
