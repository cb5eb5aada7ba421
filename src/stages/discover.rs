// src/stages/discover.rs

use tracing::info;

use crate::config::Action;
use crate::discovery::{DiscoveryKind, discover};
use crate::engine::{Deps, FailurePolicy, StageContext, StageFuture};
use crate::envelope::{Envelope, Record};
use crate::errors::Result;
use crate::stages::{blocking, names};

pub fn discover_meta_files(_ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(run(names::DISCOVER_META_FILES, DiscoveryKind::MetaFiles, env))
}

pub fn discover_input_files(_ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(run(names::DISCOVER_INPUT_FILES, DiscoveryKind::InputFiles, env))
}

async fn run(stage: &'static str, kind: DiscoveryKind, mut env: Envelope) -> Result<Envelope> {
    let policy = FailurePolicy::for_envelope(stage, &env);
    let opts = env.meta.discovery_options();

    let locators = match blocking(move || discover(&opts, kind)).await {
        Ok(locators) => locators,
        Err(msg) => {
            policy.envelope_failure(&mut env, None, &msg)?;
            Vec::new()
        }
    };
    info!(stage, found = locators.len(), "discovery finished");

    if env.meta.action() == Some(Action::DiffMeta) {
        match kind {
            DiscoveryKind::MetaFiles => env.meta.meta_files = Some(locators.clone()),
            DiscoveryKind::InputFiles => env.meta.inputs = Some(locators.clone()),
        }
    }

    env.records = locators.into_iter().map(Record::new).collect();
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DiscoveryConfig, ErrorMode, ErrorPolicy};
    use std::fs;

    fn env_at(root: &std::path::Path, action: Action, mode: ErrorMode) -> Envelope {
        Envelope::from_config(&Config {
            action,
            discovery: DiscoveryConfig {
                root: root.to_path_buf(),
                ..DiscoveryConfig::default()
            },
            errors: ErrorPolicy {
                mode,
                embed_errors: true,
            },
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn both_kinds_and_diff_stash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();
        fs::write(dir.path().join("b.md.thoth.yaml"), "locator: b.md\nmeta: {}\n").unwrap();
        fs::write(dir.path().join("a.md"), "a").unwrap();

        let env = env_at(dir.path(), Action::DiffMeta, ErrorMode::FailFast);
        let env = discover_input_files(StageContext::new(), env, Deps::stdio()).await.unwrap();
        let locs: Vec<_> = env.records.iter().map(|r| r.locator.clone()).collect();
        assert_eq!(locs, vec!["a.md", "b.md"]);
        assert_eq!(env.meta.inputs, Some(locs));

        let env = discover_meta_files(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert_eq!(env.records.len(), 1);
        assert_eq!(env.meta.meta_files, Some(vec!["b.md.thoth.yaml".to_string()]));
        assert_eq!(env.meta.inputs.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn pipeline_does_not_stash_lists() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.thoth.yaml"), "locator: a\nmeta: {}\n").unwrap();
        let env = env_at(dir.path(), Action::Pipeline, ErrorMode::FailFast);
        let env = discover_meta_files(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert_eq!(env.records.len(), 1);
        assert!(env.meta.meta_files.is_none());
    }

    #[tokio::test]
    async fn missing_root_follows_the_error_mode() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("missing");

        let env = env_at(&gone, Action::Pipeline, ErrorMode::FailFast);
        let err = discover_meta_files(StageContext::new(), env, Deps::stdio()).await.unwrap_err();
        assert_eq!(err.stage_name(), Some("discover-meta-files"));

        let env = env_at(&gone, Action::Pipeline, ErrorMode::KeepGoing);
        let env = discover_meta_files(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert!(env.records.is_empty());
        assert_eq!(env.errors.len(), 1);
        assert!(!env.errors[0].message.contains(&*gone.to_string_lossy()));
    }
}
