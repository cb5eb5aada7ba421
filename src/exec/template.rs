// src/exec/template.rs

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// The only placeholder the argument templates understand.
pub const JSON_PLACEHOLDER: &str = "{json}";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid"));

/// Render `argsTemplate` for one record.
///
/// `{json}` becomes the compact JSON of `mapped` (`null` when absent). With
/// `strict`, any other `{name}` placeholder is an error; the check runs on
/// the template, so braces inside the substituted JSON never trip it.
pub fn render_args(template: &[String], mapped: Option<&Value>, strict: bool) -> Result<Vec<String>, String> {
    let json = match mapped {
        Some(v) => serde_json::to_string(v).map_err(|e| format!("cannot encode mapped value: {e}"))?,
        None => "null".to_string(),
    };

    template
        .iter()
        .map(|arg| {
            if strict {
                if let Some(name) = PLACEHOLDER
                    .captures_iter(arg)
                    .filter_map(|c| c.get(1))
                    .map(|m| m.as_str())
                    .find(|name| *name != "json")
                {
                    return Err(format!("unknown template placeholder {{{name}}}"));
                }
            }
            Ok(arg.replace(JSON_PLACEHOLDER, &json))
        })
        .collect()
}
