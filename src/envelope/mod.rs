// src/envelope/mod.rs

//! The data contract passed between stages.
//!
//! - [`record`] holds the per-record shape (`locator`, `meta`, `mapped`, ...).
//! - [`meta`] holds the ambient state (`EnvelopeMeta`).
//!
//! An [`Envelope`] is what every stage consumes and returns.

pub mod meta;
pub mod record;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::collapse_whitespace;

pub use meta::{CONTRACT_VERSION, ConfigHeader, EnvelopeMeta};
pub use record::{
    FileInfo, GitInfo, GitStatus, LastCommit, Record, RecordError, ShellResult,
};

/// Envelope-level error entry.
///
/// Field order matters: the derived `Ord` sorts by `(stage, locator, message)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub stage: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,

    pub message: String,
}

impl EnvelopeError {
    pub fn new(stage: &str, locator: Option<&str>, message: impl AsRef<str>) -> Self {
        Self {
            stage: stage.to_string(),
            locator: locator.map(str::to_string),
            message: collapse_whitespace(message.as_ref()),
        }
    }
}

/// Stage I/O unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub records: Vec<Record>,

    #[serde(default)]
    pub meta: EnvelopeMeta,

    #[serde(default)]
    pub errors: Vec<EnvelopeError>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial envelope for an invocation: no records, config snapshot in meta.
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            records: Vec::new(),
            meta: EnvelopeMeta::from_config(cfg),
            errors: Vec::new(),
        }
    }

    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }

    /// Append an envelope error and keep the list sorted.
    pub fn push_error(&mut self, err: EnvelopeError) {
        self.errors.push(err);
        self.sort_errors();
    }

    /// Normalize messages and sort by `(stage, locator, message)`.
    pub fn sort_errors(&mut self) {
        for err in self.errors.iter_mut() {
            err.message = collapse_whitespace(&err.message);
        }
        self.errors.sort();
    }

    /// Number of records that carry no error.
    pub fn successful_records(&self) -> usize {
        self.records.iter().filter(|r| !r.has_error()).count()
    }

    /// Stamp the contract version and the producing stage.
    pub fn stamp(&mut self, stage: &str) {
        self.meta.contract_version = CONTRACT_VERSION.to_string();
        self.meta.stage = Some(stage.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_sort_by_stage_locator_message() {
        let mut env = Envelope::new();
        env.push_error(EnvelopeError::new("z-stage", Some("a"), "m"));
        env.push_error(EnvelopeError::new("a-stage", Some("b"), "m"));
        env.push_error(EnvelopeError::new("a-stage", Some("a"), "z"));
        env.push_error(EnvelopeError::new("a-stage", Some("a"), "  b\n  c "));
        env.push_error(EnvelopeError::new("a-stage", None, "x"));

        let keys: Vec<_> = env
            .errors
            .iter()
            .map(|e| (e.stage.as_str(), e.locator.as_deref(), e.message.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("a-stage", None, "x"),
                ("a-stage", Some("a"), "b c"),
                ("a-stage", Some("a"), "z"),
                ("a-stage", Some("b"), "m"),
                ("z-stage", Some("a"), "m"),
            ]
        );
    }

    #[test]
    fn new_envelope_is_stamped_and_records_serialize_as_array() {
        let env = Envelope::from_config(&Config::default());
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["meta"]["contractVersion"], "1");
        assert_eq!(v["meta"]["config"]["configVersion"], "1");
        assert_eq!(v["meta"]["config"]["action"], "pipeline");
        assert!(v["records"].as_array().unwrap().is_empty());
        assert!(v["errors"].as_array().unwrap().is_empty());
    }
}
