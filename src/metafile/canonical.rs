// src/metafile/canonical.rs

//! Canonical on-disk form of sidecar files.
//!
//! A sidecar is `locator: <string>\nmeta: ...\n` with keys sorted
//! lexicographically at every depth, 2-space indentation and exactly one
//! trailing newline. Writing the same mapping twice yields identical bytes.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

/// Suffix appended to a locator to form its sidecar path.
pub const SIDECAR_SUFFIX: &str = ".thoth.yaml";

/// Sidecar locator for an input locator.
pub fn sidecar_locator(locator: &str) -> String {
    format!("{locator}{SIDECAR_SUFFIX}")
}

/// Whether a locator names a sidecar file.
pub fn is_sidecar(locator: &str) -> bool {
    locator.ends_with(SIDECAR_SUFFIX)
}

/// Failure to read or validate a sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaFileError {
    /// The document is not valid YAML.
    Parse(String),
    /// Valid YAML with the wrong shape.
    Schema(String),
}

impl fmt::Display for MetaFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaFileError::Parse(m) => write!(f, "invalid YAML: {m}"),
            MetaFileError::Schema(m) => f.write_str(m),
        }
    }
}

impl std::error::Error for MetaFileError {}

/// A validated `{locator, meta}` document.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaDocument {
    pub locator: String,
    pub meta: Map<String, Value>,
}

#[derive(Serialize)]
struct MetaDocumentOut<'a> {
    locator: &'a str,
    meta: &'a Value,
}

/// Rebuild a value with every mapping's keys inserted in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Render a sidecar in canonical form.
pub fn marshal_meta(locator: &str, meta: &Map<String, Value>) -> Result<String, serde_yaml::Error> {
    let meta = canonicalize(&Value::Object(meta.clone()));
    let doc = MetaDocumentOut {
        locator,
        meta: &meta,
    };
    let text = serde_yaml::to_string(&doc)?;
    let text = text.strip_prefix("---\n").unwrap_or(&text);
    Ok(format!("{}\n", text.trim_end_matches('\n')))
}

/// Parse and validate sidecar text.
///
/// The top level must be a mapping with a string `locator` and a mapping
/// `meta`; other top-level keys are rejected unless `allow_unknown_top_level`.
pub fn parse_meta(text: &str, allow_unknown_top_level: bool) -> Result<MetaDocument, MetaFileError> {
    let doc: Value =
        serde_yaml::from_str(text).map_err(|e| MetaFileError::Parse(e.to_string()))?;

    let Value::Object(mut top) = doc else {
        return Err(MetaFileError::Schema(
            "top-level YAML must be a mapping with keys locator and meta".to_string(),
        ));
    };

    if !allow_unknown_top_level {
        let mut unknown: Vec<&String> = top
            .keys()
            .filter(|k| k.as_str() != "locator" && k.as_str() != "meta")
            .collect();
        unknown.sort();
        if let Some(key) = unknown.first() {
            return Err(MetaFileError::Schema(format!("unknown top-level key {key:?}")));
        }
    }

    let locator = match top.remove("locator") {
        None => {
            return Err(MetaFileError::Schema(
                "missing required key \"locator\"".to_string(),
            ));
        }
        Some(Value::String(s)) if s.is_empty() => {
            return Err(MetaFileError::Schema("\"locator\" must not be empty".to_string()));
        }
        Some(Value::String(s)) => s,
        Some(_) => {
            return Err(MetaFileError::Schema("\"locator\" must be a string".to_string()));
        }
    };

    let meta = match top.remove("meta") {
        None => {
            return Err(MetaFileError::Schema("missing required key \"meta\"".to_string()));
        }
        Some(Value::Object(m)) => m,
        Some(_) => {
            return Err(MetaFileError::Schema("\"meta\" must be a mapping".to_string()));
        }
    };

    Ok(MetaDocument { locator, meta })
}

/// Read and validate a sidecar from disk, enforcing a byte ceiling.
pub fn load_meta_file(
    path: &Path,
    max_bytes: u64,
    allow_unknown_top_level: bool,
) -> anyhow::Result<MetaDocument> {
    let len = fs::metadata(path)?.len();
    if len > max_bytes {
        anyhow::bail!("file size {len} exceeds limits.maxYAMLBytes ({max_bytes})");
    }
    let text = fs::read_to_string(path)?;
    Ok(parse_meta(&text, allow_unknown_top_level)?)
}

/// Write a sidecar atomically. With `overwrite = false` an existing file is
/// left untouched and an error is returned.
pub fn write_meta_file(
    path: &Path,
    locator: &str,
    meta: &Map<String, Value>,
    overwrite: bool,
) -> anyhow::Result<()> {
    let text = marshal_meta(locator, meta)?;
    let parent = parent_dir(path);
    fs::create_dir_all(&parent)?;

    let mut tmp = NamedTempFile::new_in(&parent)?;
    tmp.write_all(text.as_bytes())?;
    tmp.flush()?;

    if overwrite {
        tmp.persist(path).map_err(|e| e.error)?;
    } else {
        tmp.persist_noclobber(path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                anyhow::anyhow!("meta file already exists")
            } else {
                anyhow::Error::from(e.error)
            }
        })?;
    }
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn marshal_sorts_keys_at_every_depth() {
        let meta = map(json!({"b": {"z": 1, "a": [ {"y": 1, "x": 2} ]}, "a": "s"}));
        let text = marshal_meta("docs/a.md", &meta).unwrap();
        assert_eq!(
            text,
            "locator: docs/a.md\nmeta:\n  a: s\n  b:\n    a:\n    - x: 2\n      y: 1\n    z: 1\n"
        );
        assert_eq!(text, marshal_meta("docs/a.md", &meta).unwrap());
    }

    #[test]
    fn empty_meta_marshals_as_flow_mapping() {
        let text = marshal_meta("a", &Map::new()).unwrap();
        assert_eq!(text, "locator: a\nmeta: {}\n");
    }

    #[test]
    fn parse_round_trips_canonical_text() {
        let text = "locator: a\nmeta:\n  enabled: true\n  n: 3\n";
        let doc = parse_meta(text, false).unwrap();
        assert_eq!(doc.locator, "a");
        assert_eq!(doc.meta, map(json!({"enabled": true, "n": 3})));
        assert_eq!(marshal_meta(&doc.locator, &doc.meta).unwrap(), text);
    }

    #[test]
    fn parse_rejects_bad_shapes() {
        assert!(matches!(parse_meta("- 1\n- 2\n", false), Err(MetaFileError::Schema(_))));
        assert!(matches!(parse_meta("meta: {}\n", false), Err(MetaFileError::Schema(m)) if m.contains("locator")));
        assert!(matches!(parse_meta("locator: a\n", false), Err(MetaFileError::Schema(m)) if m.contains("meta")));
        assert!(matches!(parse_meta("locator: 3\nmeta: {}\n", false), Err(MetaFileError::Schema(m)) if m.contains("string")));
        assert!(matches!(parse_meta("locator: a\nmeta: [1]\n", false), Err(MetaFileError::Schema(m)) if m.contains("mapping")));
        assert!(matches!(parse_meta("locator: a\nmeta: {\n", false), Err(MetaFileError::Parse(_))));
    }

    #[test]
    fn unknown_top_level_keys_follow_policy() {
        let text = "locator: a\nmeta: {}\nextra: 1\n";
        assert!(matches!(parse_meta(text, false), Err(MetaFileError::Schema(m)) if m.contains("extra")));
        assert!(parse_meta(text, true).is_ok());
    }

    #[test]
    fn write_refuses_to_clobber_unless_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/a.thoth.yaml");
        let meta = map(json!({"k": 1}));

        write_meta_file(&path, "a", &meta, false).unwrap();
        let err = write_meta_file(&path, "a", &map(json!({"k": 2})), false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "locator: a\nmeta:\n  k: 1\n");

        write_meta_file(&path, "a", &map(json!({"k": 2})), true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "locator: a\nmeta:\n  k: 2\n");
    }

    #[test]
    fn sidecar_naming() {
        assert_eq!(sidecar_locator("docs/a.md"), "docs/a.md.thoth.yaml");
        assert!(is_sidecar("docs/a.md.thoth.yaml"));
        assert!(!is_sidecar("docs/a.md"));
    }
}
