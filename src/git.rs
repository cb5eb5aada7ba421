// src/git.rs

//! Working-tree state from the `git` CLI.
//!
//! One [`GitSnapshot`] is taken per `enrich-git` run; per-record lookups are
//! then pure, except `last_commit` which asks `git log` for that path.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::envelope::{GitInfo, GitStatus, LastCommit};

/// Tracked/ignored/status sets for the tree under a discovery root.
#[derive(Debug, Clone, Default)]
pub struct GitSnapshot {
    root: PathBuf,
    in_work_tree: bool,
    tracked: BTreeSet<String>,
    /// Porcelain `XY` code per root-relative path.
    status: BTreeMap<String, String>,
    /// Ignored files, and ignored directories with a trailing `/`.
    ignored: BTreeSet<String>,
}

async fn git_output(root: &Path, args: &[&str]) -> Option<Vec<u8>> {
    let out = Command::new("git")
        .args(args)
        .current_dir(root)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;
    match out {
        Ok(o) if o.status.success() => Some(o.stdout),
        Ok(o) => {
            debug!(?args, code = ?o.status.code(), "git command failed");
            None
        }
        Err(err) => {
            warn!(error = %err, "could not run git");
            None
        }
    }
}

fn split_nul(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

impl GitSnapshot {
    /// Take a snapshot; outside a work tree the snapshot reports every path
    /// as untracked.
    pub async fn capture(root: &Path) -> Self {
        let mut snap = GitSnapshot {
            root: root.to_path_buf(),
            ..GitSnapshot::default()
        };

        let Some(prefix) = git_output(root, &["rev-parse", "--show-prefix"]).await else {
            debug!("discovery root is not inside a git work tree");
            return snap;
        };
        snap.in_work_tree = true;
        let prefix = String::from_utf8_lossy(&prefix).trim().to_string();

        if let Some(out) = git_output(root, &["ls-files", "-z"]).await {
            snap.tracked = split_nul(&out).into_iter().collect();
        }

        if let Some(out) = git_output(
            root,
            &["status", "--porcelain=v1", "-z", "--ignored", "--untracked-files=all"],
        )
        .await
        {
            snap.absorb_porcelain(&split_nul(&out), &prefix);
        }

        snap
    }

    /// Parse `status --porcelain=v1 -z` entries (paths relative to the repo
    /// top level) into root-relative maps.
    fn absorb_porcelain(&mut self, entries: &[String], prefix: &str) {
        let mut iter = entries.iter();
        while let Some(entry) = iter.next() {
            if entry.len() < 4 {
                continue;
            }
            let (code, path) = (&entry[..2], &entry[3..]);
            if code.starts_with('R') || code.starts_with('C') {
                // The source path follows as its own entry.
                iter.next();
            }
            let Some(rel) = path.strip_prefix(prefix) else {
                continue;
            };
            if code == "!!" {
                self.ignored.insert(rel.to_string());
            } else {
                self.status.insert(rel.to_string(), code.to_string());
            }
        }
    }

    fn is_ignored(&self, locator: &str) -> bool {
        self.ignored.contains(locator)
            || self
                .ignored
                .iter()
                .any(|p| p.ends_with('/') && locator.starts_with(p.as_str()))
    }

    /// Tracked / ignored / status for one locator, without `lastCommit`.
    pub fn info(&self, locator: &str) -> GitInfo {
        if !self.in_work_tree {
            return GitInfo {
                tracked: false,
                ignored: false,
                status: GitStatus::Untracked,
                last_commit: None,
            };
        }

        let tracked = self.tracked.contains(locator);
        let ignored = !tracked && self.is_ignored(locator);
        let status = match self.status.get(locator) {
            Some(code) if code == "??" => GitStatus::Untracked,
            Some(code) if code.contains('D') => GitStatus::Deleted,
            Some(_) => GitStatus::Modified,
            None if tracked => GitStatus::Clean,
            None => GitStatus::Untracked,
        };

        GitInfo {
            tracked,
            ignored,
            status,
            last_commit: None,
        }
    }

    /// Most recent commit touching `locator`, with the date in UTC.
    pub async fn last_commit(&self, locator: &str) -> Option<LastCommit> {
        if !self.in_work_tree || !self.tracked.contains(locator) {
            return None;
        }
        let out = git_output(
            &self.root,
            &["log", "-1", "--format=%H%x00%an%x00%aI", "--", locator],
        )
        .await?;
        parse_log_line(&String::from_utf8_lossy(&out))
    }
}

fn parse_log_line(line: &str) -> Option<LastCommit> {
    let mut parts = line.trim_end().splitn(3, '\0');
    let hash = parts.next()?.to_string();
    let author = parts.next()?.to_string();
    let date = DateTime::parse_from_rfc3339(parts.next()?.trim())
        .ok()?
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    if hash.is_empty() {
        return None;
    }
    Some(LastCommit { hash, author, date })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_from(tracked: &[&str], porcelain: &[&str], prefix: &str) -> GitSnapshot {
        let mut snap = GitSnapshot {
            in_work_tree: true,
            tracked: tracked.iter().map(|s| s.to_string()).collect(),
            ..GitSnapshot::default()
        };
        let entries: Vec<String> = porcelain.iter().map(|s| s.to_string()).collect();
        snap.absorb_porcelain(&entries, prefix);
        snap
    }

    #[test]
    fn statuses_follow_porcelain_codes() {
        let snap = snapshot_from(
            &["a.md", "b.md", "c.md", "n.md"],
            &[" M docs/a.md", " D docs/b.md", "R  docs/n.md", "docs/old.md", "?? docs/u.md", "!! docs/build/"],
            "docs/",
        );
        assert_eq!(snap.info("a.md").status, GitStatus::Modified);
        assert_eq!(snap.info("b.md").status, GitStatus::Deleted);
        assert_eq!(snap.info("c.md").status, GitStatus::Clean);
        assert_eq!(snap.info("n.md").status, GitStatus::Modified);
        let u = snap.info("u.md");
        assert!(!u.tracked && !u.ignored);
        assert_eq!(u.status, GitStatus::Untracked);
        let ig = snap.info("build/out.bin");
        assert!(ig.ignored && !ig.tracked);
        // Paths outside the prefix are not ours.
        assert!(!snap.status.contains_key("old.md"));
    }

    #[test]
    fn outside_a_work_tree_everything_is_untracked() {
        let snap = GitSnapshot::default();
        let info = snap.info("anything");
        assert!(!info.tracked && !info.ignored);
        assert_eq!(info.status, GitStatus::Untracked);
    }

    #[test]
    fn log_lines_are_normalized_to_utc() {
        let c = parse_log_line("abc123\0Ada\02024-03-01T12:00:00+02:00\n").unwrap();
        assert_eq!(c.hash, "abc123");
        assert_eq!(c.author, "Ada");
        assert_eq!(c.date, "2024-03-01T10:00:00Z");
        assert!(parse_log_line("").is_none());
    }

    #[tokio::test]
    async fn plain_directory_is_not_a_work_tree() {
        let dir = tempfile::tempdir().unwrap();
        let snap = GitSnapshot::capture(dir.path()).await;
        assert_eq!(snap.info("x").status, GitStatus::Untracked);
        assert!(snap.last_commit("x").await.is_none());
    }
}
