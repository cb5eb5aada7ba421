// src/engine/driver.rs

use std::time::Duration;

use tracing::{error, info};

use crate::config::{Action, Config};
use crate::engine::context::{CancelToken, Deps, ProgressReporter, StageContext};
use crate::engine::exit::{ExitDecision, evaluate};
use crate::engine::registry::registry;
use crate::envelope::Envelope;
use crate::errors::ThothError;
use crate::stages::names;

/// Ordered stage list for an action.
pub fn plan(action: Action, file_info: bool, git: bool) -> Vec<&'static str> {
    let enrich = |stages: &mut Vec<&'static str>| {
        if file_info {
            stages.push(names::ENRICH_FILEINFO);
        }
        if git {
            stages.push(names::ENRICH_GIT);
        }
    };

    match action {
        Action::Pipeline | Action::Nop => vec![
            names::DISCOVER_META_FILES,
            names::PARSE_VALIDATE_YAML,
            names::VALIDATE_LOCATORS,
            names::LUA_FILTER,
            names::LUA_MAP,
            names::SHELL_EXEC,
            names::LUA_POSTMAP,
            names::LUA_REDUCE,
            names::WRITE_OUTPUT,
        ],
        Action::Validate => vec![
            names::DISCOVER_META_FILES,
            names::PARSE_VALIDATE_YAML,
            names::VALIDATE_LOCATORS,
            names::WRITE_OUTPUT,
        ],
        Action::CreateMeta => {
            let mut s = vec![names::DISCOVER_INPUT_FILES];
            enrich(&mut s);
            s.extend([names::WRITE_META_FILES, names::WRITE_OUTPUT]);
            s
        }
        Action::UpdateMeta => {
            let mut s = vec![names::DISCOVER_INPUT_FILES];
            enrich(&mut s);
            s.extend([
                names::LOAD_EXISTING_META,
                names::MERGE_META,
                names::WRITE_UPDATED_META_FILES,
                names::WRITE_OUTPUT,
            ]);
            s
        }
        Action::DiffMeta => vec![
            names::DISCOVER_INPUT_FILES,
            names::DISCOVER_META_FILES,
            names::PARSE_VALIDATE_YAML,
            names::VALIDATE_LOCATORS,
            names::COMPUTE_META_DIFF,
            names::WRITE_OUTPUT,
        ],
    }
}

pub fn plan_for(cfg: &Config) -> Vec<&'static str> {
    plan(cfg.action, cfg.file_info.enabled, cfg.git.enabled)
}

/// Result of one invocation.
#[derive(Debug)]
pub struct RunOutcome {
    /// Envelope after the last stage; `None` when a stage failed fatally.
    pub envelope: Option<Envelope>,
    pub fatal: Option<ThothError>,
    pub exit: ExitDecision,
}

/// Thread the envelope through the action's stages, stopping at the first
/// fatal error.
pub async fn run_pipeline(cfg: &Config, ctx: StageContext, deps: Deps) -> RunOutcome {
    let stages = plan_for(cfg);
    info!(action = %cfg.action, ?stages, "pipeline starting");

    let stop_ticker = CancelToken::new();
    let (ctx, ticker) = if cfg.ui.progress {
        let reporter = ProgressReporter::new();
        let handle = reporter.spawn_ticker(
            Duration::from_millis(cfg.ui.progress_interval_ms.max(1)),
            deps.stderr.clone(),
            stop_ticker.clone(),
        );
        (ctx.with_progress(reporter), Some(handle))
    } else {
        (ctx, None)
    };

    let mut env = Envelope::from_config(cfg);
    let mut fatal = None;
    for stage in stages {
        match registry().run(stage, ctx.child(), env, deps.clone()).await {
            Ok(next) => env = next,
            Err(err) => {
                error!(stage, kind = err.kind().as_str(), error = %err, "stage failed");
                fatal = Some(err);
                env = Envelope::from_config(cfg);
                break;
            }
        }
    }

    stop_ticker.cancel();
    if let Some(handle) = ticker {
        let _ = handle.await;
    }

    let exit = evaluate(&env, fatal.as_ref());
    info!(status = %exit.status, "pipeline finished");
    RunOutcome {
        envelope: if fatal.is_some() { None } else { Some(env) },
        fatal,
        exit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_follow_the_action() {
        assert_eq!(plan(Action::Nop, true, true), plan(Action::Pipeline, false, false));
        assert_eq!(
            plan(Action::Validate, false, false),
            vec!["discover-meta-files", "parse-validate-yaml", "validate-locators", "write-output"]
        );
        assert_eq!(
            plan(Action::CreateMeta, true, true),
            vec!["discover-input-files", "enrich-fileinfo", "enrich-git", "write-meta-files", "write-output"]
        );
        assert_eq!(
            plan(Action::UpdateMeta, false, true),
            vec![
                "discover-input-files",
                "enrich-git",
                "load-existing-meta",
                "merge-meta",
                "write-updated-meta-files",
                "write-output"
            ]
        );
        assert_eq!(plan(Action::DiffMeta, false, false).last(), Some(&"write-output"));
    }

    #[test]
    fn every_planned_stage_is_registered() {
        for action in [
            Action::Pipeline,
            Action::Validate,
            Action::CreateMeta,
            Action::UpdateMeta,
            Action::DiffMeta,
        ] {
            for stage in plan(action, true, true) {
                assert!(registry().contains(stage), "{stage}");
            }
        }
    }
}
