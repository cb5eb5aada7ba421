// src/stages/parse_yaml.rs

use crate::engine::{Deps, StageContext, StageFuture, Step, map_records};
use crate::envelope::{Envelope, Record};
use crate::metafile::load_meta_file;
use crate::stages::{blocking, names};

/// Read each sidecar and replace the record with `{locator, meta}` from the
/// file, then sort by locator.
pub fn parse_validate_yaml(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let root = env.meta.root();
        let max_bytes = env.meta.limits_or_default().max_yaml_bytes;
        let allow_unknown = env
            .meta
            .validation
            .as_ref()
            .is_some_and(|v| v.allow_unknown_top_level);

        let mut env = map_records(names::PARSE_VALIDATE_YAML, &ctx, env, move |record: Record| {
            let path = root.join(&record.locator);
            async move {
                match blocking(move || load_meta_file(&path, max_bytes, allow_unknown)).await {
                    Ok(doc) => Step::Keep(Record::with_meta(doc.locator, doc.meta)),
                    Err(msg) => Step::Fail(record, msg),
                }
            }
        })
        .await?;

        env.records.sort_by(|a, b| a.locator.cmp(&b.locator));
        Ok(env)
    })
}
