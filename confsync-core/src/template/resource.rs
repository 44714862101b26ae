//! Loading template resource declarations from `conf.d`.

use super::TemplateConfig;
use crate::error::TemplateError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk shape of a `conf.d/*.toml` file.
#[derive(Debug, Deserialize)]
struct ResourceFile {
    template: ResourceDecl,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceDecl {
    src: String,
    dest: PathBuf,
    keys: Vec<String>,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    mode: Option<String>,
}

/// A fully resolved template resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateResource {
    /// File stem of the declaring `conf.d` entry.
    pub name: String,
    /// Absolute path of the Handlebars source.
    pub src: PathBuf,
    pub dest: PathBuf,
    /// Effective prefix (global joined with the resource prefix).
    pub prefix: String,
    /// Effective keys, already joined under `prefix`.
    pub keys: Vec<String>,
    /// Permission bits for the destination.
    pub mode: Option<u32>,
}

impl TemplateResource {
    /// Turn an absolute key back into the name templates refer to it by.
    pub fn relative_key<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() || self.prefix == "/" {
            return key;
        }
        match key.strip_prefix(self.prefix.as_str()) {
            Some(rest) if rest.starts_with('/') => rest,
            Some("") => "/",
            _ => key,
        }
    }

    /// Prefix handed to `watch_prefix`.
    pub fn watch_prefix(&self) -> &str {
        if self.prefix.is_empty() { "/" } else { &self.prefix }
    }
}

/// Join key path segments into one absolute key. Empty segments and
/// duplicate separators are dropped; the result always starts with `/`.
///
/// A trailing `/` is not kept, so a declared `/config/` is looked up as
/// `/config`. Backends treat a key without a value as a directory, so both
/// spellings fetch the same entries. A trailing `/*` is kept verbatim.
pub fn join_key(parts: &[&str]) -> String {
    let segments: Vec<&str> = parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

fn parse_mode(raw: &str) -> Option<u32> {
    let digits = raw.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8).ok().filter(|m| *m <= 0o7777)
}

/// Parse one resource declaration.
pub fn parse_resource(
    path: &Path,
    contents: &str,
    config: &TemplateConfig,
) -> Result<TemplateResource, TemplateError> {
    let invalid = |message: String| TemplateError::InvalidResource {
        path: path.to_path_buf(),
        message,
    };

    let file: ResourceFile = toml::from_str(contents).map_err(|e| invalid(e.to_string()))?;
    let decl = file.template;
    if decl.src.is_empty() {
        return Err(invalid("src must not be empty".into()));
    }
    if decl.keys.is_empty() {
        return Err(invalid("keys must list at least one key".into()));
    }
    let mode = match decl.mode.as_deref() {
        Some(raw) => Some(parse_mode(raw).ok_or_else(|| invalid(format!("bad mode '{raw}'")))?),
        None => None,
    };

    let prefix = if config.prefix.is_empty() && decl.prefix.is_empty() {
        String::new()
    } else {
        join_key(&[&config.prefix, &decl.prefix])
    };
    let keys = decl
        .keys
        .iter()
        .map(|k| join_key(&[&prefix, k]))
        .collect();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(TemplateResource {
        name,
        src: config.template_dir().join(&decl.src),
        dest: decl.dest,
        prefix,
        keys,
        mode,
    })
}

/// Load every `*.toml` under `<confdir>/conf.d`, sorted by file name.
pub fn load_resources(config: &TemplateConfig) -> Result<Vec<TemplateResource>, TemplateError> {
    let dir = config.resource_dir();
    let entries = std::fs::read_dir(&dir).map_err(|source| TemplateError::Read {
        path: dir.clone(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    let mut resources = Vec::with_capacity(paths.len());
    for path in paths {
        let contents = std::fs::read_to_string(&path).map_err(|source| TemplateError::Read {
            path: path.clone(),
            source,
        })?;
        let resource = parse_resource(&path, &contents, config)?;
        debug!(resource = %resource.name, keys = ?resource.keys, "Loaded template resource");
        resources.push(resource);
    }
    Ok(resources)
}
