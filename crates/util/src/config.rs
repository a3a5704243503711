//! Application configuration for the confmap binary.
//!
//! The configuration is a JSON file at `CONFMAP_CONFIG_PATH` or, by default,
//! `<config dir>/confmap/confmap.json`. A missing file yields the defaults.
//! Relative paths inside the file are resolved against the file's directory.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{SyncMode, expand_tilde, resolve_relative};

/// Environment variable allowing callers to override the configuration file path.
pub const CONFIG_PATH_ENV: &str = "CONFMAP_CONFIG_PATH";

/// Default filename for the JSON payload.
pub const CONFIG_FILE_NAME: &str = "confmap.json";

const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid { reason: reason.into() }
    }
}

/// What discovery does when a previously bound rule file changes and the new
/// version cannot be loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReloadPolicy {
    /// Keep the previously bound provider and log the error.
    #[default]
    RetainOnError,
    /// Unbind the previous provider and leave the key empty.
    UnbindOnError,
}

/// A file kept in sync with the resolved mapping of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncTarget {
    /// Configuration kind to resolve.
    pub name: String,
    /// Optional instance of the kind.
    #[serde(default)]
    pub instance: Option<String>,
    /// Destination JSON file.
    pub path: PathBuf,
    #[serde(default)]
    pub mode: SyncMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppConfig {
    /// Directory scanned for mapping rule files.
    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,
    /// Optional JSON file seeding the in-memory configuration store.
    #[serde(default)]
    pub store_file: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub reload_policy: ReloadPolicy,
    #[serde(default)]
    pub targets: Vec<SyncTarget>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rules_dir: default_rules_dir(),
            store_file: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reload_policy: ReloadPolicy::default(),
            targets: Vec::new(),
        }
    }
}

fn default_config_root() -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("confmap")
}

fn default_rules_dir() -> PathBuf {
    default_config_root().join("rules")
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Returns the default path for the configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }

    default_config_root().join(CONFIG_FILE_NAME)
}

/// Loads the configuration from the default path.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(&default_config_path())
}

/// Loads, anchors and validates the configuration at `path`.
pub fn load_config_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found; using defaults");
            return Ok(AppConfig::default());
        }
        Err(error) => return Err(ConfigError::Io(error)),
    };

    let mut config: AppConfig = serde_json::from_str(&content)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.rules_dir = resolve_relative(base, &config.rules_dir);
    config.store_file = config.store_file.map(|store| resolve_relative(base, &store));
    for target in &mut config.targets {
        target.path = resolve_relative(base, &target.path);
    }
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.poll_interval_ms == 0 {
        return Err(ConfigError::invalid("pollIntervalMs must be greater than zero"));
    }

    let mut paths = HashSet::new();
    for target in &config.targets {
        if target.name.trim().is_empty() {
            return Err(ConfigError::invalid(format!("target '{}' has an empty name", target.path.display())));
        }
        if !paths.insert(&target.path) {
            return Err(ConfigError::invalid(format!(
                "target path '{}' is used more than once",
                target.path.display()
            )));
        }
    }
    Ok(())
}
