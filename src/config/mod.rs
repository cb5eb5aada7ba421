// src/config/mod.rs

//! Configuration loading and validation for thoth.
//!
//! Responsibilities:
//! - Define the configuration record consumed by the stage runtime (`model.rs`).
//! - Load it from a TOML/JSON/YAML file (`loader.rs`).
//! - Validate basic invariants before any stage runs (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_config_str};
pub use model::{
    Action, CaptureConfig, Config, DiffFormat, DiffMetaConfig, DiffOnly, DiscoveryConfig,
    ErrorMode, ErrorPolicy, InlineScript, LimitsConfig, LocatorPolicy, OutputConfig,
    SandboxLibs, SandboxPolicy, ShellConfig, Toggle, UiConfig, UpdateMetaConfig,
    ValidationConfig, inline_code,
};
pub use validate::validate_config;
