//! Configuration system for confsync.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment -> CLI overrides. Without an explicit `--config`, the system
//! file `/etc/confsync/confsync.toml` is used if present, otherwise the user
//! config (`~/.config/confsync/config.toml`).

use crate::admin::AdminConfig;
use crate::backend::{BackendConfig, BackendKind};
use crate::error::ConfigError;
use crate::template::TemplateConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Path of the system-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/confsync/confsync.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfsyncConfig {
    pub backend: BackendConfig,
    pub template: TemplateConfig,
    pub admin: AdminConfig,
    pub log: LogConfig,
    /// Seconds between renders in interval mode.
    pub interval_secs: u64,
    /// Drive renders from store change notifications.
    pub watch: bool,
    /// Render once and exit.
    pub onetime: bool,
}

impl Default for ConfsyncConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            template: TemplateConfig::default(),
            admin: AdminConfig::default(),
            log: LogConfig::default(),
            interval_secs: 600,
            watch: false,
            onetime: false,
        }
    }
}

impl ConfsyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns a list of problems; empty means the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        // Watch mode can fall back to interval mode, so it needs a real interval too.
        if !self.onetime && self.interval_secs == 0 {
            problems.push("interval_secs must be greater than 0".to_string());
        }
        if self.backend.kind == BackendKind::Redis && self.backend.nodes.is_empty() {
            problems.push("backend.nodes must list at least one endpoint".to_string());
        }
        if self.template.confdir.as_os_str().is_empty() {
            problems.push("template.confdir must not be empty".to_string());
        }
        if !self.template.prefix.is_empty() && !self.template.prefix.starts_with('/') {
            problems.push("template.prefix must start with '/'".to_string());
        }
        problems.extend(self.admin.validate());
        problems
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive for stderr output (`error`, `info`, `confsync_core=debug`, ...).
    pub level: String,
    /// When set, JSON logs are also written to daily files in this directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// Values supplied on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onetime: Option<bool>,
    pub backend: BackendOverrides,
    pub template: TemplateOverrides,
    pub admin: AdminOverrides,
    pub log: LogOverrides,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confdir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noop: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdminOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables (prefixed with `CONFSYNC_`, `__` separates sections)
/// 3. The explicit config file, or the system/user file when none is given
/// 4. Built-in defaults
pub fn load_config(
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ConfsyncConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ConfsyncConfig::default()));

    match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(path) = default_config_file() {
                figment = figment.merge(Toml::file(path));
            }
        }
    }

    // CONFSYNC_INTERVAL_SECS, CONFSYNC_BACKEND__NODES, CONFSYNC_ADMIN__PORT, ...
    figment = figment.merge(Env::prefixed("CONFSYNC_").split("__"));
    figment = figment.merge(Serialized::defaults(overrides));

    let config: ConfsyncConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;

    let problems = config.validate();
    if !problems.is_empty() {
        return Err(ConfigError::Invalid {
            message: problems.join("; "),
        });
    }
    Ok(config)
}

/// The config file used when none is given explicitly, if one exists.
pub fn default_config_file() -> Option<PathBuf> {
    let system = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system.exists() {
        return Some(system);
    }
    directories::ProjectDirs::from("io", "confsync", "confsync")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .filter(|path| path.exists())
}
