//! Rendering resources from store values.

use super::resource::{TemplateResource, load_resources};
use super::TemplateConfig;
use crate::backend::{KeyValueMap, SharedStore};
use crate::error::TemplateError;
use crate::persistence;
use handlebars::Handlebars;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info};

/// What happened to a single destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Written,
    Unchanged,
    /// Rendered in noop mode; the destination was left alone.
    Skipped,
}

/// Result of rendering every resource once.
#[derive(Debug, Default)]
pub struct RenderReport {
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: Vec<TemplateError>,
}

impl RenderReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, outcome: RenderOutcome) {
        match outcome {
            RenderOutcome::Written => self.written += 1,
            RenderOutcome::Unchanged => self.unchanged += 1,
            RenderOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Renders template resources against a store.
pub struct TemplateEngine {
    store: SharedStore,
    resources: Vec<TemplateResource>,
    noop: bool,
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new(store: SharedStore, resources: Vec<TemplateResource>, noop: bool) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Output is config files, not HTML.
        handlebars.register_escape_fn(handlebars::no_escape);
        Self {
            store,
            resources,
            noop,
            handlebars,
        }
    }

    /// Load resources from `config.confdir` and build an engine over them.
    pub fn from_config(store: SharedStore, config: &TemplateConfig) -> Result<Self, TemplateError> {
        let resources = load_resources(config)?;
        info!(
            count = resources.len(),
            confdir = %config.confdir.display(),
            "Loaded template resources"
        );
        Ok(Self::new(store, resources, config.noop))
    }

    pub fn resources(&self) -> &[TemplateResource] {
        &self.resources
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn is_noop(&self) -> bool {
        self.noop
    }

    /// Fetch, render and (unless noop) write one resource.
    pub async fn process(&self, resource: &TemplateResource) -> Result<RenderOutcome, TemplateError> {
        let values = self
            .store
            .get_values(&resource.keys)
            .await
            .map_err(|source| TemplateError::Fetch {
                template: resource.name.clone(),
                source,
            })?;
        let rendered = self.render(resource, &values)?;

        if self.noop {
            info!(
                resource = %resource.name,
                dest = %resource.dest.display(),
                bytes = rendered.len(),
                "Noop mode, not writing destination"
            );
            return Ok(RenderOutcome::Skipped);
        }

        let changed = persistence::write_if_changed(&resource.dest, rendered.as_bytes(), resource.mode)
            .map_err(|source| TemplateError::Write {
                path: resource.dest.clone(),
                source,
            })?;
        if changed {
            info!(resource = %resource.name, dest = %resource.dest.display(), "Destination updated");
            Ok(RenderOutcome::Written)
        } else {
            debug!(resource = %resource.name, "Destination already up to date");
            Ok(RenderOutcome::Unchanged)
        }
    }

    /// Process every resource once. Failures are collected, not short-circuited.
    pub async fn process_all(&self) -> RenderReport {
        let mut report = RenderReport::default();
        for resource in &self.resources {
            match self.process(resource).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!(resource = %resource.name, error = %e, "Template processing failed");
                    report.errors.push(e);
                }
            }
        }
        report
    }

    /// Render `resource` with `values` without touching the filesystem
    /// beyond reading the template source.
    pub fn render(
        &self,
        resource: &TemplateResource,
        values: &KeyValueMap,
    ) -> Result<String, TemplateError> {
        let source = std::fs::read_to_string(&resource.src).map_err(|source| TemplateError::Read {
            path: resource.src.clone(),
            source,
        })?;
        let context = render_context(resource, values);
        self.handlebars
            .render_template(&source, &context)
            .map_err(|e| TemplateError::Render {
                template: resource.name.clone(),
                message: e.to_string(),
            })
    }
}

/// Template context: `values` keyed by prefix-relative key, `entries` as a
/// sorted `{key, value}` list, and the effective `prefix`.
pub fn render_context(resource: &TemplateResource, values: &KeyValueMap) -> Value {
    let mut by_key = Map::new();
    let mut entries = Vec::with_capacity(values.len());
    for (key, value) in values {
        let key = resource.relative_key(key);
        by_key.insert(key.to_string(), Value::String(value.clone()));
        entries.push(json!({ "key": key, "value": value }));
    }
    json!({
        "values": by_key,
        "entries": entries,
        "prefix": resource.prefix,
    })
}
