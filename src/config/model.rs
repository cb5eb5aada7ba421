// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level configuration record.
///
/// Every section is optional; omitted keys fall back to the defaults below.
/// Keys are camelCase on the wire:
///
/// ```toml
/// configVersion = "1"
/// action = "pipeline"
///
/// [discovery]
/// root = "docs"
///
/// [map]
/// inline = "return {locator=locator}"
///
/// [errors]
/// mode = "keep-going"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: String,

    #[serde(default)]
    pub action: Action,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub locator_policy: LocatorPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<InlineScript>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<InlineScript>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_map: Option<InlineScript>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<InlineScript>,

    #[serde(default)]
    pub shell: ShellConfig,

    #[serde(default)]
    pub lua: SandboxPolicy,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub errors: ErrorPolicy,

    /// Worker count for parallel stages; `0` means "number of CPUs".
    #[serde(default)]
    pub workers: usize,

    #[serde(default)]
    pub ui: UiConfig,

    #[serde(default)]
    pub file_info: Toggle,

    #[serde(default)]
    pub git: Toggle,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_meta: Option<UpdateMetaConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_meta: Option<DiffMetaConfig>,
}

fn default_config_version() -> String {
    "1".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            action: Action::default(),
            discovery: DiscoveryConfig::default(),
            validation: ValidationConfig::default(),
            limits: LimitsConfig::default(),
            locator_policy: LocatorPolicy::default(),
            filter: None,
            map: None,
            post_map: None,
            reduce: None,
            shell: ShellConfig::default(),
            lua: SandboxPolicy::default(),
            output: OutputConfig::default(),
            errors: ErrorPolicy::default(),
            workers: 0,
            ui: UiConfig::default(),
            file_info: Toggle::default(),
            git: Toggle::default(),
            update_meta: None,
            diff_meta: None,
        }
    }
}

impl Config {
    /// Effective worker count: the configured value, or the CPU count when
    /// unset, never less than one.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(1)
    }
}

/// The closed set of actions the driver knows how to plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    #[default]
    Pipeline,
    /// Alias of `pipeline`.
    Nop,
    Validate,
    CreateMeta,
    UpdateMeta,
    DiffMeta,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Pipeline => "pipeline",
            Action::Nop => "nop",
            Action::Validate => "validate",
            Action::CreateMeta => "create-meta",
            Action::UpdateMeta => "update-meta",
            Action::DiffMeta => "diff-meta",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pipeline" => Ok(Action::Pipeline),
            "nop" => Ok(Action::Nop),
            "validate" => Ok(Action::Validate),
            "create-meta" => Ok(Action::CreateMeta),
            "update-meta" => Ok(Action::UpdateMeta),
            "diff-meta" => Ok(Action::DiffMeta),
            other => Err(format!(
                "invalid action: {other} (expected pipeline, nop, validate, create-meta, update-meta or diff-meta)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub no_gitignore: bool,

    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            no_gitignore: false,
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    #[serde(default)]
    pub allow_unknown_top_level: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    #[serde(default = "default_max_yaml_bytes", rename = "maxYAMLBytes")]
    pub max_yaml_bytes: u64,

    #[serde(default = "default_max_records_in_memory")]
    pub max_records_in_memory: usize,
}

fn default_max_yaml_bytes() -> u64 {
    1024 * 1024
}

fn default_max_records_in_memory() -> usize {
    10_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_yaml_bytes: default_max_yaml_bytes(),
            max_records_in_memory: default_max_records_in_memory(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorPolicy {
    #[serde(default)]
    pub allow_absolute: bool,

    #[serde(default)]
    pub allow_parent_refs: bool,

    #[serde(default = "default_true")]
    pub posix_style: bool,

    #[serde(default, rename = "allowURLs")]
    pub allow_urls: bool,
}

impl Default for LocatorPolicy {
    fn default() -> Self {
        Self {
            allow_absolute: false,
            allow_parent_refs: false,
            posix_style: true,
            allow_urls: false,
        }
    }
}

/// An inline script fragment (`filter`, `map`, `postMap`, `reduce`,
/// `expectedLua`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InlineScript {
    #[serde(default)]
    pub inline: String,
}

impl InlineScript {
    /// The fragment, if it contains anything but whitespace.
    pub fn code(&self) -> Option<&str> {
        let trimmed = self.inline.trim();
        if trimmed.is_empty() { None } else { Some(&self.inline) }
    }
}

/// Resolve an optional inline script section to its code, if any.
pub fn inline_code(script: &Option<InlineScript>) -> Option<&str> {
    script.as_ref().and_then(InlineScript::code)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub program: String,

    #[serde(default)]
    pub args_template: Vec<String>,

    /// Relative to `discovery.root`.
    #[serde(default)]
    pub working_dir: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_shell_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default = "default_true")]
    pub strict_templating: bool,

    #[serde(default = "default_true")]
    pub kill_process_group: bool,

    #[serde(default = "default_term_grace_ms")]
    pub term_grace_ms: u64,
}

fn default_shell_timeout_ms() -> u64 {
    60_000
}

fn default_term_grace_ms() -> u64 {
    2_000
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: String::new(),
            args_template: Vec::new(),
            working_dir: String::new(),
            env: BTreeMap::new(),
            timeout_ms: default_shell_timeout_ms(),
            capture: CaptureConfig::default(),
            strict_templating: true,
            kill_process_group: true,
            term_grace_ms: default_term_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    #[serde(default = "default_true")]
    pub stdout: bool,

    #[serde(default = "default_true")]
    pub stderr: bool,

    #[serde(default = "default_capture_max_bytes")]
    pub max_bytes: usize,
}

fn default_capture_max_bytes() -> usize {
    1024 * 1024
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            max_bytes: default_capture_max_bytes(),
        }
    }
}

/// Limits and library allowlist for the embedded script sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxPolicy {
    #[serde(default = "default_lua_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_instruction_limit")]
    pub instruction_limit: u64,

    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: u64,

    #[serde(default = "default_true")]
    pub deterministic_random: bool,

    #[serde(default)]
    pub libs: SandboxLibs,
}

fn default_lua_timeout_ms() -> u64 {
    2_000
}

fn default_instruction_limit() -> u64 {
    1_000_000
}

fn default_memory_limit_bytes() -> u64 {
    8 * 1024 * 1024
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_lua_timeout_ms(),
            instruction_limit: default_instruction_limit(),
            memory_limit_bytes: default_memory_limit_bytes(),
            deterministic_random: true,
            libs: SandboxLibs::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLibs {
    #[serde(default = "default_true")]
    pub base: bool,
    #[serde(default = "default_true")]
    pub table: bool,
    #[serde(default = "default_true")]
    pub string: bool,
    #[serde(default = "default_true")]
    pub math: bool,
}

impl Default for SandboxLibs {
    fn default() -> Self {
        Self {
            base: true,
            table: true,
            string: true,
            math: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// `"-"` means stdout.
    #[serde(default = "default_out")]
    pub out: String,

    #[serde(default)]
    pub pretty: bool,

    #[serde(default)]
    pub lines: bool,
}

fn default_out() -> String {
    "-".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            out: default_out(),
            pretty: false,
            lines: false,
        }
    }
}

/// How stage-local failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorMode {
    #[default]
    FailFast,
    KeepGoing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPolicy {
    #[serde(default)]
    pub mode: ErrorMode,

    #[serde(default = "default_true")]
    pub embed_errors: bool,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            mode: ErrorMode::FailFast,
            embed_errors: true,
        }
    }
}

impl ErrorPolicy {
    pub fn fail_fast(&self) -> bool {
        self.mode == ErrorMode::FailFast
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiConfig {
    #[serde(default)]
    pub progress: bool,

    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

fn default_progress_interval_ms() -> u64 {
    1_000
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            progress: false,
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

/// `{ enabled = bool }` sections (`fileInfo`, `git`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Toggle {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetaConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_lua: Option<InlineScript>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffFormat {
    #[default]
    Summary,
    Detailed,
    JsonPatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOnly {
    #[default]
    All,
    Changed,
    Unchanged,
    Orphans,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffMetaConfig {
    #[serde(default)]
    pub format: DiffFormat,

    #[serde(default)]
    pub only: DiffOnly,

    /// Write a compact text summary to stderr.
    #[serde(default)]
    pub summary: bool,

    #[serde(default)]
    pub fail_on_change: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_patch: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_lua: Option<InlineScript>,
}

fn default_true() -> bool {
    true
}
