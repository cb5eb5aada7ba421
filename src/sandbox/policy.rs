// src/sandbox/policy.rs

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Depth past which returned values stop counting towards the memory bound.
const MEASURE_DEPTH_CAP: usize = 32;

/// Cost multiplier applied when the code contains a loop keyword.
const LOOP_COST_FACTOR: u64 = 1_000;

static LOOP_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(while|for|repeat)\b").expect("loop keyword regex is valid"));

static RETURN_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\breturn\b").expect("return keyword regex is valid"));

/// A resource bound the script ran into.
///
/// These are reported as plain tokens (`"sandbox timeout"`, ...) and are
/// distinct from script runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    Timeout,
    InstructionLimit,
    MemoryLimit,
}

impl Violation {
    pub fn as_str(self) -> &'static str {
        match self {
            Violation::Timeout => "sandbox timeout",
            Violation::InstructionLimit => "sandbox instruction limit",
            Violation::MemoryLimit => "sandbox memory limit",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse static cost estimate: code length, scaled up when a loop keyword is
/// present.
pub fn estimate_instructions(code: &str) -> u64 {
    let len = code.len() as u64;
    if LOOP_KEYWORD.is_match(code) {
        len.saturating_mul(LOOP_COST_FACTOR)
    } else {
        len
    }
}

/// Approximate size of a returned value in bytes.
pub fn measure_value(value: &Value) -> u64 {
    measure_at(value, 0)
}

fn measure_at(value: &Value, depth: usize) -> u64 {
    if depth > MEASURE_DEPTH_CAP {
        return 0;
    }
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len() as u64,
        Value::Array(items) => items
            .iter()
            .map(|v| measure_at(v, depth + 1))
            .fold(0u64, u64::saturating_add),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.len() as u64).saturating_add(measure_at(v, depth + 1)))
            .fold(0u64, u64::saturating_add),
    }
}

/// Turn an inline fragment into a chunk: verbatim when it already returns,
/// otherwise wrapped as an expression. Statement fragments do not survive the
/// wrapping; the runtime loads those verbatim instead.
pub fn wrap_fragment(fragment: &str) -> String {
    if RETURN_KEYWORD.is_match(fragment) {
        fragment.to_string()
    } else {
        format!("return ( {fragment} )")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loops_scale_the_estimate() {
        assert_eq!(estimate_instructions("return 1"), 8);
        assert_eq!(estimate_instructions("while true do end"), 17_000);
        assert_eq!(estimate_instructions("return forward"), 14);
    }

    #[test]
    fn measure_counts_strings_numbers_and_bools() {
        assert_eq!(measure_value(&json!(null)), 0);
        assert_eq!(measure_value(&json!({"ab": "xyz", "n": [1, true]})), 2 + 3 + 1 + 8 + 1);
    }

    #[test]
    fn fragments_without_return_are_wrapped() {
        assert_eq!(wrap_fragment("meta.enabled"), "return ( meta.enabled )");
        assert_eq!(wrap_fragment("return 1"), "return 1");
        assert_eq!(wrap_fragment("returned"), "return ( returned )");
    }
}
