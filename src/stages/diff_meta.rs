// src/stages/diff_meta.rs

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::inline_code;
use crate::engine::{Deps, FailurePolicy, StageContext, StageFuture};
use crate::envelope::Envelope;
use crate::errors::Result;
use crate::metafile::{
    DiffReport, SIDECAR_SUFFIX, ValueDiff, deep_merge_maps, load_meta_file, sidecar_locator,
};
use crate::stages::lua::expected_from_lua;
use crate::stages::{blocking, names};

/// Compare each input's sidecar against its expected metadata and put the
/// report on `meta.diffReport`.
pub fn compute_meta_diff(ctx: StageContext, env: Envelope, deps: Deps) -> StageFuture {
    Box::pin(run(ctx, env, deps))
}

async fn run(ctx: StageContext, mut env: Envelope, deps: Deps) -> Result<Envelope> {
    let failures = FailurePolicy::for_envelope(names::COMPUTE_META_DIFF, &env);
    let cfg = env.meta.diff_meta.clone().unwrap_or_default();
    let code = inline_code(&cfg.expected_lua).map(str::to_string);
    let patch = cfg.expected_patch.clone().unwrap_or_default();
    let sandbox = env.meta.sandbox_policy();
    let root = env.meta.root();
    let max_bytes = env.meta.limits_or_default().max_yaml_bytes;
    let allow_unknown = env
        .meta
        .validation
        .as_ref()
        .is_some_and(|v| v.allow_unknown_top_level);

    let inputs = env.meta.inputs.clone().unwrap_or_default();
    let meta_files = env.meta.meta_files.clone().unwrap_or_default();
    let input_set: BTreeSet<&str> = inputs.iter().map(String::as_str).collect();
    let meta_set: BTreeSet<&str> = meta_files.iter().map(String::as_str).collect();

    // Parsed sidecars by their declared locator; failed ones by file locator.
    let mut parsed: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    let mut failed: BTreeSet<String> = BTreeSet::new();
    for record in &env.records {
        if record.has_error() {
            failed.insert(record.locator.clone());
        } else {
            parsed.insert(record.locator.clone(), record.meta.clone().unwrap_or_default());
        }
    }

    let orphans: Vec<String> = meta_files
        .iter()
        .filter(|m| {
            m.strip_suffix(SIDECAR_SUFFIX)
                .is_none_or(|input| !input_set.contains(input))
        })
        .cloned()
        .collect();

    let matched: Vec<&String> = inputs
        .iter()
        .filter(|i| meta_set.contains(sidecar_locator(i).as_str()))
        .collect();
    info!(
        stage = names::COMPUTE_META_DIFF,
        inputs = inputs.len(),
        matched = matched.len(),
        orphans = orphans.len(),
        "stage started"
    );
    ctx.progress_begin(names::COMPUTE_META_DIFF, matched.len());

    let mut details = Vec::with_capacity(matched.len());
    for input in matched {
        if ctx.cancel.is_cancelled() {
            return Err(failures.fatal("cancelled"));
        }
        let meta_file = sidecar_locator(input);
        if failed.contains(&meta_file) {
            ctx.progress_tick(true);
            continue;
        }

        let existing = match parsed.get(input.as_str()) {
            Some(meta) => meta.clone(),
            None => {
                let path = root.join(&meta_file);
                match blocking(move || load_meta_file(&path, max_bytes, allow_unknown)).await {
                    Ok(doc) => doc.meta,
                    Err(msg) => {
                        warn!(locator = %input, error = %msg, "could not load meta file");
                        ctx.progress_tick(true);
                        failures.envelope_failure(&mut env, Some(input), &msg)?;
                        continue;
                    }
                }
            }
        };

        let derived = match &code {
            Some(code) => {
                match expected_from_lua(
                    names::COMPUTE_META_DIFF,
                    sandbox.clone(),
                    code,
                    input,
                    &existing,
                    ctx.cancel.clone(),
                )
                .await
                {
                    Ok(map) => map,
                    Err(msg) => {
                        ctx.progress_tick(true);
                        failures.envelope_failure(&mut env, Some(input), &msg)?;
                        continue;
                    }
                }
            }
            None => patch.clone(),
        };
        let expected = deep_merge_maps(&existing, &derived);

        details.push(ValueDiff::compute_maps(&existing, &expected).into_detail(input, &meta_file, cfg.format));
        ctx.progress_tick(false);
    }

    let report = DiffReport::build(
        cfg.format,
        cfg.only,
        inputs.len(),
        meta_files.len(),
        details,
        orphans,
    );
    info!(
        stage = names::COMPUTE_META_DIFF,
        changed = report.changed_count,
        unchanged = report.unchanged_count,
        orphans = report.orphan_count,
        "stage finished"
    );

    if cfg.summary {
        if let Err(err) = deps.write_stderr_line(&report.summary_line()) {
            warn!(error = %err, "could not write diff summary");
        }
    }
    env.meta.diff_report = Some(report);
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Action, Config, DiffFormat, DiffMetaConfig, DiffOnly, InlineScript};
    use crate::engine::StageContext;
    use crate::envelope::Record;
    use serde_json::json;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn env_for(diff: DiffMetaConfig, inputs: &[&str], meta_files: &[&str], records: Vec<Record>) -> Envelope {
        let mut env = Envelope::from_config(&Config {
            action: Action::DiffMeta,
            diff_meta: Some(diff),
            ..Config::default()
        })
        .with_records(records);
        env.meta.inputs = Some(inputs.iter().map(|s| s.to_string()).collect());
        env.meta.meta_files = Some(meta_files.iter().map(|s| s.to_string()).collect());
        env
    }

    fn parsed(locator: &str, meta: Value) -> Record {
        Record::with_meta(locator, meta.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn patch_drift_and_orphans() {
        let diff = DiffMetaConfig {
            expected_patch: json!({"x": 2}).as_object().cloned(),
            ..DiffMetaConfig::default()
        };
        let env = env_for(
            diff,
            &["a", "b", "c"],
            &["a.thoth.yaml", "b.thoth.yaml", "gone.thoth.yaml"],
            vec![parsed("a", json!({"x": 1})), parsed("b", json!({"x": 2}))],
        );
        let out = compute_meta_diff(StageContext::new(), env, Deps::stdio()).await.unwrap();
        let report = out.meta.diff_report.unwrap();
        assert_eq!(report.input_count, 3);
        assert_eq!(report.meta_file_count, 3);
        assert_eq!(report.changed_count, 1);
        assert_eq!(report.unchanged_count, 1);
        assert_eq!(report.orphans, vec!["gone.thoth.yaml"]);
        assert_eq!(report.details[0].locator, "a");
        assert!(report.details[0].changed);
        assert_eq!(
            report.details[0].summary.as_ref().unwrap().changed_keys,
            vec!["x".to_string()]
        );
    }

    #[tokio::test]
    async fn self_diff_is_clean() {
        let env = env_for(
            DiffMetaConfig::default(),
            &["a"],
            &["a.thoth.yaml"],
            vec![parsed("a", json!({"x": [1, 2], "y": {"z": true}}))],
        );
        let out = compute_meta_diff(StageContext::new(), env, Deps::stdio()).await.unwrap();
        let report = out.meta.diff_report.unwrap();
        assert_eq!(report.changed_count, 0);
        assert_eq!(report.orphan_count, 0);
        assert!(!report.has_changes());
    }

    #[tokio::test]
    async fn expected_lua_and_json_patch_format() {
        let diff = DiffMetaConfig {
            format: DiffFormat::JsonPatch,
            only: DiffOnly::Changed,
            expected_lua: Some(InlineScript {
                inline: "return {owner = locator}".to_string(),
            }),
            ..DiffMetaConfig::default()
        };
        let env = env_for(diff, &["a"], &["a.thoth.yaml"], vec![parsed("a", json!({}))]);
        let out = compute_meta_diff(StageContext::new(), env, Deps::stdio()).await.unwrap();
        let report = out.meta.diff_report.unwrap();
        let patch = serde_json::to_value(report.details[0].patch.as_ref().unwrap()).unwrap();
        assert_eq!(patch, json!([{"op": "add", "path": "/owner", "value": "a"}]));
    }

    #[tokio::test]
    async fn summary_goes_to_stderr() {
        let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink: Arc<Mutex<dyn Write + Send>> = buf.clone();
        let deps = Deps::new(Arc::new(Mutex::new(Vec::<u8>::new())), sink);
        let diff = DiffMetaConfig {
            summary: true,
            ..DiffMetaConfig::default()
        };
        let env = env_for(diff, &["a"], &[], vec![]);
        compute_meta_diff(StageContext::new(), env, deps).await.unwrap();
        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert_eq!(
            text,
            "diff-meta: 1 inputs, 0 meta files, 0 changed, 0 unchanged, 0 orphans\n"
        );
    }
}
