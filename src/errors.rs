// src/errors.rs

//! Crate-wide error type and helpers.
//!
//! Stage failures carry the stage name so the driver can report them as
//! `"<stage>: <message>"`, which is what ends up on stderr.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThothError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{stage}: {message}")]
    Stage { stage: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ThothError {
    /// Build a stage-scoped error with a normalized single-line message.
    pub fn stage(stage: &str, message: impl AsRef<str>) -> Self {
        ThothError::Stage {
            stage: stage.to_string(),
            message: collapse_whitespace(message.as_ref()),
        }
    }

    /// Stage name for stage-scoped errors.
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            ThothError::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ThothError::Config(_) => ErrorKind::Configuration,
            ThothError::Stage { stage, message } => ErrorKind::classify(stage, message),
            ThothError::Io(_) | ThothError::Other(_) => ErrorKind::Io,
            ThothError::Yaml(_) | ThothError::Json(_) | ThothError::Toml(_) => ErrorKind::Parse,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ThothError>;

/// Classification of failures, used for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Io,
    Parse,
    Schema,
    Policy,
    Sandbox,
    SubprocessStart,
    SubprocessRuntime,
    SubprocessTimeout,
    MergeScript,
    DiffScript,
    ContractInvariant,
}

impl ErrorKind {
    /// Best-effort classification of a stage failure.
    pub fn classify(stage: &str, message: &str) -> Self {
        match stage {
            "validate-config" => ErrorKind::Configuration,
            "parse-validate-yaml" | "load-existing-meta" => {
                if message.contains("must") || message.contains("key") {
                    ErrorKind::Schema
                } else {
                    ErrorKind::Parse
                }
            }
            "validate-locators" => ErrorKind::Policy,
            "lua-filter" | "lua-map" | "lua-postmap" | "lua-reduce" => ErrorKind::Sandbox,
            "shell-exec" if message == "timeout" => ErrorKind::SubprocessTimeout,
            "shell-exec" if message.contains("not found") || message.contains("start failed") => {
                ErrorKind::SubprocessStart
            }
            "shell-exec" => ErrorKind::SubprocessRuntime,
            "merge-meta" => ErrorKind::MergeScript,
            "compute-meta-diff" => ErrorKind::DiffScript,
            "write-output" if message.contains("maxRecordsInMemory") => ErrorKind::ContractInvariant,
            _ => ErrorKind::Io,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Io => "io",
            ErrorKind::Parse => "parse",
            ErrorKind::Schema => "schema",
            ErrorKind::Policy => "policy",
            ErrorKind::Sandbox => "sandbox",
            ErrorKind::SubprocessStart => "subprocess-start",
            ErrorKind::SubprocessRuntime => "subprocess-runtime",
            ErrorKind::SubprocessTimeout => "subprocess-timeout",
            ErrorKind::MergeScript => "merge-script",
            ErrorKind::DiffScript => "diff-script",
            ErrorKind::ContractInvariant => "contract-invariant",
        }
    }
}

/// Collapse all runs of whitespace (including newlines) into single spaces
/// and trim both ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Produce a user-facing message: strip any occurrence of the discovery root
/// (so absolute paths do not leak) and collapse whitespace.
pub fn sanitize_message(msg: &str, root: &std::path::Path) -> String {
    let mut out = msg.to_string();
    let mut prefixes: Vec<String> = Vec::new();
    if let Ok(abs) = root.canonicalize() {
        prefixes.push(abs.to_string_lossy().into_owned());
    }
    let given = root.to_string_lossy().into_owned();
    if !given.is_empty() && given != "." {
        prefixes.push(given);
    }
    // Longest first so a nested prefix doesn't leave a dangling fragment.
    prefixes.sort_by_key(|p| std::cmp::Reverse(p.len()));
    for prefix in prefixes {
        let with_sep = format!("{}/", prefix.trim_end_matches('/'));
        out = out.replace(&with_sep, "");
        out = out.replace(&prefix, "");
    }
    collapse_whitespace(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn stage_failures_are_classified() {
        assert_eq!(ThothError::stage("shell-exec", "timeout").kind(), ErrorKind::SubprocessTimeout);
        assert_eq!(
            ThothError::stage("shell-exec", "program x not found").kind(),
            ErrorKind::SubprocessStart
        );
        assert_eq!(ThothError::stage("lua-map", "sandbox timeout").kind().as_str(), "sandbox");
        assert_eq!(ThothError::Config("x".into()).kind(), ErrorKind::Configuration);
    }

    #[test]
    fn collapse_whitespace_makes_single_line() {
        assert_eq!(collapse_whitespace("  a\n  b\t\tc  "), "a b c");
        assert_eq!(collapse_whitespace(""), "");
    }

    #[test]
    fn sanitize_strips_root_prefix() {
        let msg = "failed to read /srv/repo/docs/a.thoth.yaml: denied";
        let out = sanitize_message(msg, Path::new("/srv/repo"));
        assert_eq!(out, "failed to read docs/a.thoth.yaml: denied");
    }

    #[test]
    fn stage_error_displays_with_stage_prefix() {
        let err = ThothError::stage("lua-map", "sandbox   timeout\n");
        assert_eq!(err.to_string(), "lua-map: sandbox timeout");
        assert_eq!(err.stage_name(), Some("lua-map"));
    }
}
