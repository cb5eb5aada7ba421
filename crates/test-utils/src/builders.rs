#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thoth::config::{
    Action, Config, DiffFormat, DiffMetaConfig, DiffOnly, ErrorMode, InlineScript, ShellConfig,
    UpdateMetaConfig,
};

/// Builder for `Config` to simplify test setup.
pub struct ConfigBuilder {
    config: Config,
}

fn inline(code: &str) -> Option<InlineScript> {
    Some(InlineScript {
        inline: code.to_string(),
    })
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(m) => m,
        other => panic!("expected a JSON object, got {other}"),
    }
}

impl ConfigBuilder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let mut config = Config::default();
        config.discovery.root = root.as_ref().to_path_buf();
        Self { config }
    }

    pub fn action(mut self, action: Action) -> Self {
        self.config.action = action;
        self
    }

    pub fn keep_going(mut self) -> Self {
        self.config.errors.mode = ErrorMode::KeepGoing;
        self
    }

    pub fn embed_errors(mut self, val: bool) -> Self {
        self.config.errors.embed_errors = val;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn filter(mut self, code: &str) -> Self {
        self.config.filter = inline(code);
        self
    }

    pub fn map(mut self, code: &str) -> Self {
        self.config.map = inline(code);
        self
    }

    pub fn post_map(mut self, code: &str) -> Self {
        self.config.post_map = inline(code);
        self
    }

    pub fn reduce(mut self, code: &str) -> Self {
        self.config.reduce = inline(code);
        self
    }

    pub fn lua_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lua.timeout_ms = ms;
        self
    }

    /// Enable the shell with `program` and `args`.
    pub fn shell(mut self, program: &str, args: &[&str]) -> Self {
        self.config.shell = ShellConfig {
            enabled: true,
            program: program.to_string(),
            args_template: args.iter().map(|a| a.to_string()).collect(),
            ..ShellConfig::default()
        };
        self
    }

    pub fn shell_timeouts(mut self, timeout_ms: u64, term_grace_ms: u64) -> Self {
        self.config.shell.timeout_ms = timeout_ms;
        self.config.shell.term_grace_ms = term_grace_ms;
        self
    }

    pub fn max_records_in_memory(mut self, n: usize) -> Self {
        self.config.limits.max_records_in_memory = n;
        self
    }

    pub fn lines(mut self, val: bool) -> Self {
        self.config.output.lines = val;
        self
    }

    pub fn pretty(mut self, val: bool) -> Self {
        self.config.output.pretty = val;
        self
    }

    pub fn out(mut self, out: impl Into<String>) -> Self {
        self.config.output.out = out.into();
        self
    }

    pub fn file_info(mut self, val: bool) -> Self {
        self.config.file_info.enabled = val;
        self
    }

    pub fn git(mut self, val: bool) -> Self {
        self.config.git.enabled = val;
        self
    }

    pub fn update_patch(mut self, patch: Value) -> Self {
        self.config.update_meta = Some(UpdateMetaConfig {
            patch: Some(as_map(patch)),
            expected_lua: None,
        });
        self
    }

    pub fn update_lua(mut self, code: &str) -> Self {
        self.config.update_meta = Some(UpdateMetaConfig {
            patch: None,
            expected_lua: inline(code),
        });
        self
    }

    pub fn diff(mut self, format: DiffFormat, only: DiffOnly) -> Self {
        let diff = self.config.diff_meta.get_or_insert_with(DiffMetaConfig::default);
        diff.format = format;
        diff.only = only;
        self
    }

    pub fn expected_patch(mut self, patch: Value) -> Self {
        let diff = self.config.diff_meta.get_or_insert_with(DiffMetaConfig::default);
        diff.expected_patch = Some(as_map(patch));
        self
    }

    pub fn fail_on_change(mut self, val: bool) -> Self {
        let diff = self.config.diff_meta.get_or_insert_with(DiffMetaConfig::default);
        diff.fail_on_change = val;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }

    /// Write the config as JSON into `dir` and return its path.
    pub fn write_json(self, dir: impl AsRef<Path>) -> PathBuf {
        let path = dir.as_ref().join("thoth.json");
        let text = serde_json::to_string_pretty(&self.config).expect("config serializes");
        std::fs::write(&path, text).expect("config file is writable");
        path
    }
}
