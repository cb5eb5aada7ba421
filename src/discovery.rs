// src/discovery.rs

//! Working-tree walk shared by the two discovery stages.
//!
//! The walk honours `.gitignore` files (unless `discovery.noGitignore`), never
//! descends into `.git`, and returns root-relative locators with `/`
//! separators, sorted.

use std::path::{Component, Path};

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::config::DiscoveryConfig;
use crate::metafile::is_sidecar;

/// Which side of the sidecar relation a walk collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryKind {
    /// Files ending in `.thoth.yaml`.
    MetaFiles,
    /// Everything else except `.gitignore`.
    InputFiles,
}

impl DiscoveryKind {
    fn accepts(self, locator: &str) -> bool {
        match self {
            DiscoveryKind::MetaFiles => is_sidecar(locator),
            DiscoveryKind::InputFiles => {
                let name = locator.rsplit('/').next().unwrap_or(locator);
                !is_sidecar(locator) && name != ".gitignore"
            }
        }
    }
}

/// Walk `opts.root` and return the sorted locators of the requested kind.
pub fn discover(opts: &DiscoveryConfig, kind: DiscoveryKind) -> Result<Vec<String>> {
    let root = opts.root.as_path();
    let meta = std::fs::metadata(root).context("discovery root is not accessible")?;
    if !meta.is_dir() {
        anyhow::bail!("discovery root is not a directory");
    }

    let use_gitignore = !opts.no_gitignore;
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .follow_links(opts.follow_symlinks)
        .require_git(false)
        .ignore(false)
        .git_global(false)
        .git_ignore(use_gitignore)
        .git_exclude(use_gitignore)
        .parents(use_gitignore)
        .filter_entry(|entry| entry.file_name() != ".git");

    let mut out = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry during discovery");
                continue;
            }
        };

        let is_file = entry.file_type().is_some_and(|ft| ft.is_file());
        if !is_file {
            continue;
        }

        let Some(locator) = relative_locator(root, entry.path()) else {
            continue;
        };
        if kind.accepts(&locator) {
            out.push(locator);
        }
    }

    out.sort();
    out.dedup();
    debug!(count = out.len(), ?kind, "discovery finished");
    Ok(out)
}

/// Root-relative path joined with `/`.
pub fn relative_locator(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
