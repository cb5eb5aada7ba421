// src/config/loader.rs

use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::config::model::Config;
use crate::config::validate::validate_config;
use crate::errors::{Result, ThothError};

/// Load a configuration file and return the raw `Config`.
///
/// The file extension selects the codec: `.toml`, `.json`, or `.yaml`/`.yml`.
/// This performs deserialization only; use [`load_and_validate`] for the
/// semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {:?}", path))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    parse_config_str(&contents, &ext)
}

/// Parse configuration text in the given format (`toml`, `json`, `yaml`/`yml`).
pub fn parse_config_str(contents: &str, format: &str) -> Result<Config> {
    let config: Config = match format {
        "toml" => toml::from_str(contents)?,
        "json" => serde_json::from_str(contents)?,
        "yaml" | "yml" => serde_yaml::from_str(contents)?,
        other => {
            return Err(ThothError::Config(format!(
                "unsupported config format {other:?} (expected .toml, .json, .yaml or .yml)"
            )));
        }
    };
    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// This is the entry point used by the CLI. Validation failures surface as
/// [`ThothError::Config`] before any stage runs.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config> {
    let config = load_from_path(&path)?;
    validate_config(&config)?;
    Ok(config)
}
