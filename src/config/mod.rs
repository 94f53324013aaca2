pub mod openstack;
pub mod settings;

pub use openstack::{pack_openstack_params, AuthParams, OpenStackParams};
pub use settings::{apply_env, merge_values, Settings, SETTING_KEYS};

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Default settings directory: ~/.testvnf/conf
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".testvnf")
        .join("conf")
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}

/// Errors for settings I/O and parsing
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse {}: {}", .0.display(), .1)]
    ParseError(PathBuf, String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Required configuration '{0}' is missing")]
    ConfigurationMissing(String),
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure merging
// ============================================================================

/// Read every `*.yaml` / `*.yml` file of `dir` in file-name order and merge
/// their top-level keys. A missing directory yields no values.
pub fn read_config_dir(dir: &Path) -> Result<Map<String, Value>, ConfigError> {
    let mut merged = Map::new();
    if !dir.is_dir() {
        debug!("Config directory {} not found, skipping", dir.display());
        return Ok(merged);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();

    for file in files {
        debug!("Loading settings from {}", file.display());
        let content = std::fs::read_to_string(&file)?;
        let layer: Option<Map<String, Value>> = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(file.clone(), e.to_string()))?;
        if let Some(layer) = layer {
            merge_values(&mut merged, layer);
        }
    }

    Ok(merged)
}

/// Load settings from a config directory, overlaid by the process environment
pub fn load_settings(dir: &Path) -> Result<Settings, ConfigError> {
    let mut values = read_config_dir(dir)?;
    apply_env(&mut values, |key| std::env::var(key).ok());
    Settings::from_values(values).map_err(|e| ConfigError::InvalidSettings(e.to_string()))
}
