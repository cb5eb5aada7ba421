// src/metafile/diff.rs

//! Deterministic structural diff between two metadata mappings.
//!
//! One walk produces all three report formats:
//! - `summary`: dotted key paths grouped as added / removed / changed /
//!   type-changed, plus per-array index sets
//! - `detailed`: the summary plus a flat `changes[]` list
//! - `json-patch`: RFC-6902-style `add` / `remove` / `replace` ops; arrays are
//!   opaque and produce a single `replace`
//!
//! All key lists, change lists and patch ops are sorted by path.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{DiffFormat, DiffOnly};

/// JSON kind name of a value; type changes are only reported across kinds.
pub fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Escape one JSON-pointer reference token (`~` → `~0`, `/` → `~1`).
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayDiff {
    pub path: String,
    pub added_indices: Vec<usize>,
    pub removed_indices: Vec<usize>,
    pub changed_indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub added_keys: Vec<String>,
    pub removed_keys: Vec<String>,
    pub changed_keys: Vec<String>,
    pub type_changed_keys: Vec<String>,
    pub arrays: Vec<ArrayDiff>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
    TypeChanged,
    ArrayIndexChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchOpKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Complete diff between two values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueDiff {
    pub summary: DiffSummary,
    pub changes: Vec<Change>,
    pub patch: Vec<PatchOp>,
}

impl ValueDiff {
    /// Diff `old` (what is on disk) against `new` (what is expected).
    pub fn compute(old: &Value, new: &Value) -> Self {
        let mut w = Walker::default();
        w.walk(&mut Vec::new(), old, new);
        w.finish()
    }

    pub fn compute_maps(old: &Map<String, Value>, new: &Map<String, Value>) -> Self {
        Self::compute(&Value::Object(old.clone()), &Value::Object(new.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.patch.is_empty()
    }

    /// Project into the per-record detail for the requested format.
    pub fn into_detail(self, locator: &str, meta_file: &str, format: DiffFormat) -> DiffDetail {
        let changed = !self.is_empty();
        let (summary, changes, patch) = match format {
            DiffFormat::Summary => (Some(self.summary), None, None),
            DiffFormat::Detailed => (Some(self.summary), Some(self.changes), None),
            DiffFormat::JsonPatch => (None, None, Some(self.patch)),
        };
        DiffDetail {
            locator: locator.to_string(),
            meta_file: meta_file.to_string(),
            changed,
            summary,
            changes,
            patch,
        }
    }
}

#[derive(Default)]
struct Walker {
    added: BTreeSet<String>,
    removed: BTreeSet<String>,
    changed: BTreeSet<String>,
    type_changed: BTreeSet<String>,
    arrays: Vec<ArrayDiff>,
    changes: Vec<Change>,
    patch: Vec<PatchOp>,
}

fn dotted(path: &[String]) -> String {
    path.join(".")
}

fn pointer(path: &[String]) -> String {
    path.iter()
        .map(|seg| format!("/{}", escape_pointer_token(seg)))
        .collect()
}

impl Walker {
    fn walk(&mut self, path: &mut Vec<String>, old: &Value, new: &Value) {
        if old == new {
            return;
        }

        match (old, new) {
            (Value::Object(a), Value::Object(b)) => {
                let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
                for key in keys {
                    path.push(key.clone());
                    match (a.get(key), b.get(key)) {
                        (None, Some(v)) => self.added_key(path, v),
                        (Some(v), None) => self.removed_key(path, v),
                        (Some(x), Some(y)) => self.walk(path, x, y),
                        (None, None) => {}
                    }
                    path.pop();
                }
            }
            (Value::Array(a), Value::Array(b)) => self.array(path, a, b, new),
            _ if json_kind(old) != json_kind(new) => {
                let p = dotted(path);
                self.type_changed.insert(p.clone());
                self.changes.push(Change {
                    path: p,
                    kind: ChangeKind::TypeChanged,
                    old_value: Some(old.clone()),
                    new_value: Some(new.clone()),
                });
                self.replace(path, new);
            }
            _ => {
                let p = dotted(path);
                self.changed.insert(p.clone());
                self.changes.push(Change {
                    path: p,
                    kind: ChangeKind::Changed,
                    old_value: Some(old.clone()),
                    new_value: Some(new.clone()),
                });
                self.replace(path, new);
            }
        }
    }

    fn added_key(&mut self, path: &[String], value: &Value) {
        let p = dotted(path);
        self.added.insert(p.clone());
        self.changes.push(Change {
            path: p,
            kind: ChangeKind::Added,
            old_value: None,
            new_value: Some(value.clone()),
        });
        self.patch.push(PatchOp {
            op: PatchOpKind::Add,
            path: pointer(path),
            value: Some(value.clone()),
        });
    }

    fn removed_key(&mut self, path: &[String], value: &Value) {
        let p = dotted(path);
        self.removed.insert(p.clone());
        self.changes.push(Change {
            path: p,
            kind: ChangeKind::Removed,
            old_value: Some(value.clone()),
            new_value: None,
        });
        self.patch.push(PatchOp {
            op: PatchOpKind::Remove,
            path: pointer(path),
            value: None,
        });
    }

    fn replace(&mut self, path: &[String], new: &Value) {
        self.patch.push(PatchOp {
            op: PatchOpKind::Replace,
            path: pointer(path),
            value: Some(new.clone()),
        });
    }

    fn array(&mut self, path: &[String], a: &[Value], b: &[Value], new: &Value) {
        let p = dotted(path);
        let mut diff = ArrayDiff {
            path: p.clone(),
            ..ArrayDiff::default()
        };

        for i in 0..a.len().max(b.len()) {
            let at = format!("{p}[{i}]");
            match (a.get(i), b.get(i)) {
                (Some(x), Some(y)) if x != y => {
                    diff.changed_indices.push(i);
                    self.changes.push(Change {
                        path: at,
                        kind: ChangeKind::ArrayIndexChanged,
                        old_value: Some(x.clone()),
                        new_value: Some(y.clone()),
                    });
                }
                (None, Some(y)) => {
                    diff.added_indices.push(i);
                    self.changes.push(Change {
                        path: at,
                        kind: ChangeKind::Added,
                        old_value: None,
                        new_value: Some(y.clone()),
                    });
                }
                (Some(x), None) => {
                    diff.removed_indices.push(i);
                    self.changes.push(Change {
                        path: at,
                        kind: ChangeKind::Removed,
                        old_value: Some(x.clone()),
                        new_value: None,
                    });
                }
                _ => {}
            }
        }

        self.arrays.push(diff);
        self.replace(path, new);
    }

    fn finish(mut self) -> ValueDiff {
        self.arrays.sort_by(|x, y| x.path.cmp(&y.path));
        self.changes
            .sort_by(|x, y| x.path.cmp(&y.path).then(x.kind.cmp(&y.kind)));
        self.patch.sort_by(|x, y| x.path.cmp(&y.path));

        ValueDiff {
            summary: DiffSummary {
                added_keys: self.added.into_iter().collect(),
                removed_keys: self.removed.into_iter().collect(),
                changed_keys: self.changed.into_iter().collect(),
                type_changed_keys: self.type_changed.into_iter().collect(),
                arrays: self.arrays,
            },
            changes: self.changes,
            patch: self.patch,
        }
    }
}

/// Per-input diff entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffDetail {
    pub locator: String,
    pub meta_file: String,
    pub changed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DiffSummary>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<Change>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Vec<PatchOp>>,
}

/// Aggregate written to `meta.diffReport`.
///
/// Counts describe the whole comparison; `orphans`/`details` are filtered by
/// `only`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    pub format: DiffFormat,
    pub only: DiffOnly,
    pub input_count: usize,
    pub meta_file_count: usize,
    pub changed_count: usize,
    pub unchanged_count: usize,
    pub orphan_count: usize,
    pub orphans: Vec<String>,
    pub details: Vec<DiffDetail>,
}

impl DiffReport {
    /// Assemble a report: sort, count, then filter by `only`.
    pub fn build(
        format: DiffFormat,
        only: DiffOnly,
        input_count: usize,
        meta_file_count: usize,
        mut details: Vec<DiffDetail>,
        mut orphans: Vec<String>,
    ) -> Self {
        details.sort_by(|a, b| a.locator.cmp(&b.locator));
        orphans.sort();
        orphans.dedup();

        let changed_count = details.iter().filter(|d| d.changed).count();
        let unchanged_count = details.len() - changed_count;
        let orphan_count = orphans.len();

        let (details, orphans) = match only {
            DiffOnly::All => (details, orphans),
            DiffOnly::Changed => (details.into_iter().filter(|d| d.changed).collect(), Vec::new()),
            DiffOnly::Unchanged => (details.into_iter().filter(|d| !d.changed).collect(), Vec::new()),
            DiffOnly::Orphans => (Vec::new(), orphans),
        };

        Self {
            format,
            only,
            input_count,
            meta_file_count,
            changed_count,
            unchanged_count,
            orphan_count,
            orphans,
            details,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.changed_count > 0
    }

    /// One-line human summary for stderr.
    pub fn summary_line(&self) -> String {
        format!(
            "diff-meta: {} inputs, {} meta files, {} changed, {} unchanged, {} orphans",
            self.input_count,
            self.meta_file_count,
            self.changed_count,
            self.unchanged_count,
            self.orphan_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_values_produce_empty_diff() {
        let v = json!({"a": [1, 2], "b": {"c": "x"}});
        let d = ValueDiff::compute(&v, &v);
        assert!(d.is_empty());
        assert_eq!(d.summary, DiffSummary::default());
    }

    #[test]
    fn summary_groups_keys_by_kind() {
        let old = json!({"a": 1, "b": {"c": 1, "d": 2}, "e": "x", "t": 1});
        let new = json!({"a": 2, "b": {"c": 1, "f": 3}, "e": "x", "t": "1"});
        let d = ValueDiff::compute(&old, &new);
        assert_eq!(d.summary.added_keys, vec!["b.f"]);
        assert_eq!(d.summary.removed_keys, vec!["b.d"]);
        assert_eq!(d.summary.changed_keys, vec!["a"]);
        assert_eq!(d.summary.type_changed_keys, vec!["t"]);
        assert!(d.summary.arrays.is_empty());
    }

    #[test]
    fn int_and_float_are_the_same_kind() {
        let d = ValueDiff::compute(&json!({"n": 1}), &json!({"n": 1.5}));
        assert_eq!(d.summary.changed_keys, vec!["n"]);
        assert!(d.summary.type_changed_keys.is_empty());
    }

    #[test]
    fn arrays_report_index_sets_and_one_replace() {
        let old = json!({"xs": [1, 2, 3]});
        let new = json!({"xs": [1, 9]});
        let d = ValueDiff::compute(&old, &new);
        assert_eq!(
            d.summary.arrays,
            vec![ArrayDiff {
                path: "xs".into(),
                added_indices: vec![],
                removed_indices: vec![2],
                changed_indices: vec![1],
            }]
        );
        assert_eq!(
            d.patch,
            vec![PatchOp {
                op: PatchOpKind::Replace,
                path: "/xs".into(),
                value: Some(json!([1, 9])),
            }]
        );
        let kinds: Vec<_> = d.changes.iter().map(|c| (c.path.as_str(), c.kind)).collect();
        assert_eq!(
            kinds,
            vec![("xs[1]", ChangeKind::ArrayIndexChanged), ("xs[2]", ChangeKind::Removed)]
        );
    }

    #[test]
    fn unchanged_array_produces_no_ops() {
        let v = json!({"xs": [1, {"a": 2}]});
        let mut new = v.clone();
        new["y"] = json!(1);
        let d = ValueDiff::compute(&v, &new);
        assert_eq!(d.patch.len(), 1);
        assert_eq!(d.patch[0].op, PatchOpKind::Add);
        assert_eq!(d.patch[0].path, "/y");
    }

    #[test]
    fn pointer_paths_are_escaped_and_sorted() {
        let old = json!({"a/b": 1, "m~n": {"k": 1}, "z": 1});
        let new = json!({"a/b": 2, "m~n": {}, "c": 1});
        let d = ValueDiff::compute(&old, &new);
        let ops: Vec<_> = d.patch.iter().map(|o| (o.op, o.path.as_str())).collect();
        assert_eq!(
            ops,
            vec![
                (PatchOpKind::Replace, "/a~1b"),
                (PatchOpKind::Add, "/c"),
                (PatchOpKind::Remove, "/m~0n/k"),
                (PatchOpKind::Remove, "/z"),
            ]
        );
    }

    #[test]
    fn detail_projection_follows_format() {
        let d = ValueDiff::compute(&json!({"x": 1}), &json!({"x": 2}));
        let s = d.clone().into_detail("a", "a.thoth.yaml", DiffFormat::Summary);
        assert!(s.changed && s.summary.is_some() && s.changes.is_none() && s.patch.is_none());
        let det = d.clone().into_detail("a", "a.thoth.yaml", DiffFormat::Detailed);
        assert_eq!(det.changes.as_ref().map(Vec::len), Some(1));
        let p = d.into_detail("a", "a.thoth.yaml", DiffFormat::JsonPatch);
        assert!(p.summary.is_none() && p.patch.is_some());
    }

    #[test]
    fn report_counts_before_filtering() {
        let changed = ValueDiff::compute(&json!({"x": 1}), &json!({"x": 2}))
            .into_detail("b", "b.thoth.yaml", DiffFormat::Summary);
        let same = ValueDiff::default().into_detail("a", "a.thoth.yaml", DiffFormat::Summary);

        let report = DiffReport::build(
            DiffFormat::Summary,
            DiffOnly::Changed,
            2,
            3,
            vec![changed, same],
            vec!["z.thoth.yaml".into()],
        );
        assert_eq!(report.changed_count, 1);
        assert_eq!(report.unchanged_count, 1);
        assert_eq!(report.orphan_count, 1);
        assert_eq!(report.details.len(), 1);
        assert_eq!(report.details[0].locator, "b");
        assert!(report.orphans.is_empty());
        assert!(report.summary_line().contains("1 changed"));
    }
}
