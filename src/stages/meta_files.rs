// src/stages/meta_files.rs

//! Sidecar stages of `create-meta` and `update-meta`.
//!
//! State flows through `record.post`:
//! - `existingMetaPath` / `existingMeta` from `load-existing-meta`
//! - `nextMeta` from `merge-meta`
//! - `metaPath` from both writers

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::config::inline_code;
use crate::engine::{Deps, StageContext, StageFuture, Step, map_records};
use crate::envelope::{Envelope, Record};
use crate::metafile::{load_meta_file, merge_optional, sidecar_locator, write_meta_file};
use crate::stages::lua::expected_from_lua;
use crate::stages::{blocking, names};

const EXISTING_META_PATH: &str = "existingMetaPath";
const EXISTING_META: &str = "existingMeta";
const NEXT_META: &str = "nextMeta";
const META_PATH: &str = "metaPath";

fn post_object(record: &Record, key: &str) -> Option<Map<String, Value>> {
    match record.post_field(key) {
        Some(Value::Object(m)) => Some(m.clone()),
        _ => None,
    }
}

fn post_string(record: &Record, key: &str) -> Option<String> {
    record.post_field(key).and_then(Value::as_str).map(str::to_string)
}

/// Meta for a brand-new sidecar: the record's meta plus any enrichment.
fn initial_meta(record: &Record) -> Map<String, Value> {
    let mut meta = record.meta.clone().unwrap_or_default();
    if let Some(info) = record.file_info.as_ref().and_then(|i| serde_json::to_value(i).ok()) {
        meta.insert("fileInfo".to_string(), info);
    }
    if let Some(git) = record.git.as_ref().and_then(|g| serde_json::to_value(g).ok()) {
        meta.insert("git".to_string(), git);
    }
    meta
}

pub fn load_existing_meta(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let root = env.meta.root();
        let max_bytes = env.meta.limits_or_default().max_yaml_bytes;
        let allow_unknown = env
            .meta
            .validation
            .as_ref()
            .is_some_and(|v| v.allow_unknown_top_level);

        map_records(names::LOAD_EXISTING_META, &ctx, env, move |mut record: Record| {
            let rel = sidecar_locator(&record.locator);
            let path = root.join(&rel);
            async move {
                record.set_post_field(EXISTING_META_PATH, Value::String(rel));
                let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
                if !exists {
                    return Step::Keep(record);
                }
                match blocking(move || load_meta_file(&path, max_bytes, allow_unknown)).await {
                    Ok(doc) => {
                        record.set_post_field(EXISTING_META, Value::Object(doc.meta));
                        Step::Keep(record)
                    }
                    Err(msg) => Step::Fail(record, msg),
                }
            }
        })
        .await
    })
}

/// `nextMeta = deepMerge(existingMeta, derived)`, where `derived` comes from
/// `updateMeta.expectedLua` when set, else `updateMeta.patch`.
pub fn merge_meta(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let update = env.meta.update_meta.clone().unwrap_or_default();
        let code = inline_code(&update.expected_lua).map(str::to_string);
        let patch = update.patch.unwrap_or_default();
        let policy = env.meta.sandbox_policy();
        let cancel = ctx.cancel.clone();

        map_records(names::MERGE_META, &ctx, env, move |mut record: Record| {
            let existing = post_object(&record, EXISTING_META);
            let (code, patch, policy, cancel) = (code.clone(), patch.clone(), policy.clone(), cancel.clone());
            async move {
                let derived = match code {
                    Some(code) => {
                        let base = existing.clone().unwrap_or_default();
                        match expected_from_lua(names::MERGE_META, policy, &code, &record.locator, &base, cancel).await {
                            Ok(map) => map,
                            Err(msg) => return Step::Fail(record, msg),
                        }
                    }
                    None => patch,
                };
                let next = merge_optional(existing.as_ref(), &derived);
                record.set_post_field(NEXT_META, Value::Object(next));
                Step::Keep(record)
            }
        })
        .await
    })
}

/// Write a fresh sidecar per record; an existing file is a failure.
pub fn write_meta_files(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let root = env.meta.root();
        map_records(names::WRITE_META_FILES, &ctx, env, move |record: Record| {
            let rel = sidecar_locator(&record.locator);
            write_one(root.clone(), rel, initial_meta(&record), false, record)
        })
        .await
    })
}

/// Write `nextMeta` per record, replacing whatever is on disk.
pub fn write_updated_meta_files(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let root = env.meta.root();
        map_records(names::WRITE_UPDATED_META_FILES, &ctx, env, move |record: Record| {
            let rel = post_string(&record, EXISTING_META_PATH)
                .unwrap_or_else(|| sidecar_locator(&record.locator));
            let meta = post_object(&record, NEXT_META)
                .or_else(|| post_object(&record, EXISTING_META))
                .unwrap_or_default();
            write_one(root.clone(), rel, meta, true, record)
        })
        .await
    })
}

async fn write_one(
    root: PathBuf,
    rel: String,
    meta: Map<String, Value>,
    overwrite: bool,
    mut record: Record,
) -> Step {
    let path = root.join(&rel);
    let locator = record.locator.clone();
    match blocking(move || write_meta_file(&path, &locator, &meta, overwrite)).await {
        Ok(()) => {
            record.set_post_field(META_PATH, Value::String(rel));
            Step::Keep(record)
        }
        Err(msg) => Step::Fail(record, msg),
    }
}
