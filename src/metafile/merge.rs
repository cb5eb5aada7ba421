// src/metafile/merge.rs

use serde_json::{Map, Value};

/// Structural merge of `patch` onto `base`.
///
/// - mappings recurse and union their keys
/// - any other patch value (including arrays and `null`) replaces the base
///   value wholesale
pub fn deep_merge(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(b), Value::Object(p)) => Value::Object(deep_merge_maps(b, p)),
        (_, p) => p.clone(),
    }
}

/// Mapping-level [`deep_merge`].
pub fn deep_merge_maps(base: &Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    for (key, pv) in patch {
        let merged = match out.get(key) {
            Some(bv) => deep_merge(bv, pv),
            None => pv.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

/// Merge where an absent base counts as an empty mapping.
pub fn merge_optional(base: Option<&Map<String, Value>>, patch: &Map<String, Value>) -> Map<String, Value> {
    match base {
        Some(b) => deep_merge_maps(b, patch),
        None => deep_merge_maps(&Map::new(), patch),
    }
}
