// src/config/validate.rs

use crate::config::model::{Action, Config};
use crate::errors::{Result, ThothError};

/// Run semantic validation against a loaded configuration.
///
/// Enum-valued keys (`action`, `errors.mode`, `diffMeta.format`,
/// `diffMeta.only`) are already checked by deserialization. This covers:
/// - `configVersion` is `"1"`
/// - limits and timeouts are positive
/// - an enabled shell names a program
/// - progress reporting has a usable interval
/// - `update-meta` has something to merge
pub fn validate_config(cfg: &Config) -> Result<()> {
    validate_version(cfg)?;
    validate_limits(cfg)?;
    validate_sandbox(cfg)?;
    validate_shell(cfg)?;
    validate_ui(cfg)?;
    validate_action_blocks(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> ThothError {
    ThothError::Config(msg.into())
}

fn validate_version(cfg: &Config) -> Result<()> {
    if cfg.config_version != "1" {
        return Err(config_error(format!(
            "unsupported configVersion {:?} (expected \"1\")",
            cfg.config_version
        )));
    }
    Ok(())
}

fn validate_limits(cfg: &Config) -> Result<()> {
    if cfg.limits.max_yaml_bytes == 0 {
        return Err(config_error("limits.maxYAMLBytes must be >= 1 (got 0)"));
    }
    if cfg.limits.max_records_in_memory == 0 {
        return Err(config_error(
            "limits.maxRecordsInMemory must be >= 1 (got 0)",
        ));
    }
    Ok(())
}

fn validate_sandbox(cfg: &Config) -> Result<()> {
    let lua = &cfg.lua;
    if lua.timeout_ms == 0 {
        return Err(config_error("lua.timeoutMs must be >= 1 (got 0)"));
    }
    if lua.instruction_limit == 0 {
        return Err(config_error("lua.instructionLimit must be >= 1 (got 0)"));
    }
    if lua.memory_limit_bytes == 0 {
        return Err(config_error("lua.memoryLimitBytes must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_shell(cfg: &Config) -> Result<()> {
    let shell = &cfg.shell;
    if !shell.enabled {
        return Ok(());
    }
    if shell.program.trim().is_empty() {
        return Err(config_error("shell.program is required when shell.enabled = true"));
    }
    if shell.timeout_ms == 0 {
        return Err(config_error("shell.timeoutMs must be >= 1 (got 0)"));
    }
    if shell.capture.max_bytes == 0 && (shell.capture.stdout || shell.capture.stderr) {
        return Err(config_error(
            "shell.capture.maxBytes must be >= 1 when capture is enabled",
        ));
    }
    Ok(())
}

fn validate_ui(cfg: &Config) -> Result<()> {
    if cfg.ui.progress && cfg.ui.progress_interval_ms == 0 {
        return Err(config_error(
            "ui.progressIntervalMs must be >= 1 when ui.progress = true",
        ));
    }
    Ok(())
}

fn validate_action_blocks(cfg: &Config) -> Result<()> {
    if cfg.action == Action::UpdateMeta {
        let has_source = cfg
            .update_meta
            .as_ref()
            .map(|u| u.patch.is_some() || u.expected_lua.as_ref().and_then(|s| s.code()).is_some())
            .unwrap_or(false);
        if !has_source {
            return Err(config_error(
                "update-meta requires updateMeta.patch or updateMeta.expectedLua.inline",
            ));
        }
    }
    Ok(())
}
