// src/locator.rs

//! Locator policy checks and the HTTP(S) URL normalizer.

use url::Url;

use crate::config::LocatorPolicy;

/// Whether a locator looks like `scheme://...`.
pub fn is_url_like(locator: &str) -> bool {
    match locator.find("://") {
        Some(i) if i > 0 => locator[..i]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
        _ => false,
    }
}

fn is_absolute(locator: &str) -> bool {
    if locator.starts_with('/') || locator.starts_with('\\') {
        return true;
    }
    // Windows drive letter: `C:` followed by a separator or nothing.
    let bytes = locator.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Check a locator against the policy. The error is a short, path-free
/// message suitable for an envelope error.
pub fn check_locator(locator: &str, policy: &LocatorPolicy) -> Result<(), String> {
    if locator.trim().is_empty() {
        return Err("empty locator".to_string());
    }

    if is_url_like(locator) {
        if policy.allow_urls {
            return Ok(());
        }
        return Err("URL locators are not allowed".to_string());
    }

    if policy.posix_style && locator.contains('\\') {
        return Err("locator must use POSIX separators".to_string());
    }

    if !policy.allow_absolute && is_absolute(locator) {
        return Err("absolute locators are not allowed".to_string());
    }

    if !policy.allow_parent_refs && locator.split(['/', '\\']).any(|seg| seg == "..") {
        return Err("parent directory references are not allowed".to_string());
    }

    Ok(())
}

/// Normalize an `http`/`https` locator: lowercase scheme and host, drop the
/// default port and the fragment, and make sure there is a path.
pub fn normalize_http_url_locator(raw: &str) -> Result<String, String> {
    let mut url = Url::parse(raw.trim()).map_err(|e| format!("invalid URL: {e}"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported URL scheme {other:?}")),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err("URL has no host".to_string());
    }

    // `Url` lowercases scheme/host, strips default ports and fills in "/"
    // as the path on its own; only the fragment needs dropping.
    url.set_fragment(None);
    Ok(url.to_string())
}
