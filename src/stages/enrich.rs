// src/stages/enrich.rs

use std::fs::Metadata;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::engine::{Deps, StageContext, StageFuture, Step, map_records};
use crate::envelope::{Envelope, FileInfo, Record};
use crate::git::GitSnapshot;
use crate::stages::names;

#[cfg(unix)]
fn permission_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

fn file_info(meta: &Metadata) -> FileInfo {
    let mod_time = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    FileInfo {
        size: meta.len(),
        mode: permission_bits(meta),
        mod_time,
        is_dir: meta.is_dir(),
    }
}

/// `stat` each record's file into `fileInfo`.
pub fn enrich_fileinfo(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let root = env.meta.root();
        map_records(names::ENRICH_FILEINFO, &ctx, env, move |mut record: Record| {
            let path = root.join(&record.locator);
            async move {
                match tokio::fs::metadata(&path).await {
                    Ok(meta) => {
                        record.file_info = Some(file_info(&meta));
                        Step::Keep(record)
                    }
                    Err(err) => Step::Fail(record, format!("stat failed: {err}")),
                }
            }
        })
        .await
    })
}

/// Attach tracked / ignored / status (and the last commit) from one git
/// snapshot of the root.
pub fn enrich_git(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let snapshot = Arc::new(GitSnapshot::capture(&env.meta.root()).await);
        map_records(names::ENRICH_GIT, &ctx, env, move |mut record: Record| {
            let snapshot = snapshot.clone();
            async move {
                let mut info = snapshot.info(&record.locator);
                info.last_commit = snapshot.last_commit(&record.locator).await;
                record.git = Some(info);
                Step::Keep(record)
            }
        })
        .await
    })
}
