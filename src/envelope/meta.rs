// src/envelope/meta.rs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{
    Action, Config, DiffMetaConfig, DiscoveryConfig, ErrorPolicy, InlineScript, LimitsConfig,
    LocatorPolicy, OutputConfig, SandboxPolicy, ShellConfig, Toggle, UiConfig, UpdateMetaConfig,
    ValidationConfig,
};
use crate::metafile::diff::DiffReport;

/// Contract version stamped on every envelope that leaves the core.
pub const CONTRACT_VERSION: &str = "1";

/// Identifies the configuration an envelope was produced from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigHeader {
    pub config_version: String,
    pub action: Action,
}

/// Ambient state carried alongside the records.
///
/// Populated from the configuration when the envelope is created and enriched
/// (never shrunk) as stages run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    pub contract_version: String,

    /// Name of the last stage that produced this envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigHeader>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator_policy: Option<LocatorPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<InlineScript>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<InlineScript>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_map: Option<InlineScript>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<InlineScript>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lua_sandbox: Option<SandboxPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_info: Option<Toggle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<Toggle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_meta: Option<UpdateMetaConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_meta: Option<DiffMetaConfig>,

    /// Input locators (diff-meta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<String>>,

    /// Sidecar locators (diff-meta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_files: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_report: Option<DiffReport>,

    /// Accumulator produced by `lua-reduce`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduced: Option<Value>,
}

impl Default for EnvelopeMeta {
    fn default() -> Self {
        Self {
            contract_version: CONTRACT_VERSION.to_string(),
            stage: None,
            config: None,
            discovery: None,
            validation: None,
            limits: None,
            locator_policy: None,
            filter: None,
            map: None,
            post_map: None,
            reduce: None,
            lua_sandbox: None,
            shell: None,
            output: None,
            errors: None,
            workers: None,
            ui: None,
            file_info: None,
            git: None,
            update_meta: None,
            diff_meta: None,
            inputs: None,
            meta_files: None,
            diff_report: None,
            reduced: None,
        }
    }
}

impl EnvelopeMeta {
    /// Snapshot the configuration into the ambient state.
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            config: Some(ConfigHeader {
                config_version: cfg.config_version.clone(),
                action: cfg.action,
            }),
            discovery: Some(cfg.discovery.clone()),
            validation: Some(cfg.validation.clone()),
            limits: Some(cfg.limits.clone()),
            locator_policy: Some(cfg.locator_policy.clone()),
            filter: cfg.filter.clone(),
            map: cfg.map.clone(),
            post_map: cfg.post_map.clone(),
            reduce: cfg.reduce.clone(),
            lua_sandbox: Some(cfg.lua.clone()),
            shell: Some(cfg.shell.clone()),
            output: Some(cfg.output.clone()),
            errors: Some(cfg.errors.clone()),
            workers: Some(cfg.effective_workers()),
            ui: Some(cfg.ui.clone()),
            file_info: Some(cfg.file_info),
            git: Some(cfg.git),
            update_meta: cfg.update_meta.clone(),
            diff_meta: cfg.diff_meta.clone(),
            ..Self::default()
        }
    }

    /// Rebuild a configuration from the snapshot; missing sections take
    /// their defaults.
    pub fn to_config(&self) -> Config {
        let header = self.config.clone();
        Config {
            config_version: header
                .as_ref()
                .map(|h| h.config_version.clone())
                .unwrap_or_else(|| CONTRACT_VERSION.to_string()),
            action: header.map(|h| h.action).unwrap_or_default(),
            discovery: self.discovery_options(),
            validation: self.validation.clone().unwrap_or_default(),
            limits: self.limits_or_default(),
            locator_policy: self.locator_policy.clone().unwrap_or_default(),
            filter: self.filter.clone(),
            map: self.map.clone(),
            post_map: self.post_map.clone(),
            reduce: self.reduce.clone(),
            shell: self.shell_policy(),
            lua: self.sandbox_policy(),
            output: self.output_options(),
            errors: self.error_policy(),
            workers: self.workers.unwrap_or(0),
            ui: self.ui.clone().unwrap_or_default(),
            file_info: self.file_info.unwrap_or_default(),
            git: self.git.unwrap_or_default(),
            update_meta: self.update_meta.clone(),
            diff_meta: self.diff_meta.clone(),
        }
    }

    pub fn locator_policy_or_default(&self) -> LocatorPolicy {
        self.locator_policy.clone().unwrap_or_default()
    }

    pub fn root(&self) -> PathBuf {
        self.discovery
            .as_ref()
            .map(|d| d.root.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn discovery_options(&self) -> DiscoveryConfig {
        self.discovery.clone().unwrap_or_default()
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.errors.clone().unwrap_or_default()
    }

    pub fn limits_or_default(&self) -> LimitsConfig {
        self.limits.clone().unwrap_or_default()
    }

    pub fn sandbox_policy(&self) -> SandboxPolicy {
        self.lua_sandbox.clone().unwrap_or_default()
    }

    pub fn shell_policy(&self) -> ShellConfig {
        self.shell.clone().unwrap_or_default()
    }

    pub fn output_options(&self) -> OutputConfig {
        self.output.clone().unwrap_or_default()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(1).max(1)
    }

    pub fn action(&self) -> Option<Action> {
        self.config.as_ref().map(|c| c.action)
    }
}
