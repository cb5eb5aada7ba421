// src/envelope/record.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The unit a stage operates on.
///
/// Absent fields are omitted from JSON entirely (never `null`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default)]
    pub locator: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
}

impl Record {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            ..Self::default()
        }
    }

    pub fn with_meta(locator: impl Into<String>, meta: Map<String, Value>) -> Self {
        Self {
            locator: locator.into(),
            meta: Some(meta),
            ..Self::default()
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Attach a failure to this record.
    pub fn set_error(&mut self, stage: &str, message: impl Into<String>) {
        self.error = Some(RecordError {
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    /// `meta` as a JSON value (`{}` when absent).
    pub fn meta_value(&self) -> Value {
        Value::Object(self.meta.clone().unwrap_or_default())
    }

    /// The record rendered as a JSON value, used as a script input.
    pub fn structured_view(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Field of `post` when `post` is a mapping.
    pub fn post_field(&self, key: &str) -> Option<&Value> {
        self.post.as_ref().and_then(|p| p.get(key))
    }

    /// Set a field of `post`, turning `post` into a mapping if needed.
    pub fn set_post_field(&mut self, key: &str, value: Value) {
        let post = self.post.get_or_insert_with(|| Value::Object(Map::new()));
        if !post.is_object() {
            *post = Value::Object(Map::new());
        }
        if let Value::Object(map) = post {
            map.insert(key.to_string(), value);
        }
    }
}

/// Failure embedded on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub stage: String,
    pub message: String,
}

/// Outcome of a per-record subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellResult {
    pub exit_code: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    #[serde(default)]
    pub stdout_truncated: bool,

    #[serde(default)]
    pub stderr_truncated: bool,

    #[serde(default)]
    pub timed_out: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub size: u64,
    /// Permission bits.
    pub mode: u32,
    /// RFC-3339, UTC, second precision.
    pub mod_time: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitStatus {
    Clean,
    Modified,
    Deleted,
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitInfo {
    pub tracked: bool,
    pub ignored: bool,
    pub status: GitStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<LastCommit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCommit {
    pub hash: String,
    pub author: String,
    /// RFC-3339, UTC.
    pub date: String,
}
