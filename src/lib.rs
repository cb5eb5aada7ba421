// src/lib.rs

pub mod cli;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod envelope;
pub mod errors;
pub mod exec;
pub mod git;
pub mod locator;
pub mod logging;
pub mod metafile;
pub mod sandbox;
pub mod stages;

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{Config, load_from_path, validate_config};
use crate::engine::{CancelToken, Deps, StageContext, plan_for, run_pipeline};
use crate::errors::Result;

/// Exit code for a configuration that could not be loaded or validated.
pub const EXIT_CONFIG_ERROR: i32 = 1;

/// High-level entry point used by `main.rs`: real stdout/stderr.
pub async fn run(args: CliArgs) -> i32 {
    run_with(args, Deps::stdio()).await
}

/// Load the config, apply CLI overrides, run the action's stages and map the
/// outcome to a process exit code.
///
/// This wires together:
/// - config loading and validation
/// - the stage plan for the action
/// - Ctrl-C → cancellation of in-flight work
/// - the exit-rule evaluator
pub async fn run_with(args: CliArgs, deps: Deps) -> i32 {
    let cfg = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            report(&deps, &err.to_string());
            return EXIT_CONFIG_ERROR;
        }
    };

    if args.dry_run {
        if let Err(err) = deps.write_stdout(dry_run_text(&cfg).as_bytes()) {
            warn!(error = %err, "could not print dry-run plan");
        }
        debug!("dry-run complete (no execution)");
        return 0;
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("interrupted, cancelling");
            cancel.cancel();
        });
    }

    let ctx = StageContext::with_cancel(cancel);
    let outcome = run_pipeline(&cfg, ctx, deps.clone()).await;
    if let Some(message) = &outcome.exit.message {
        report(&deps, message);
    }
    outcome.exit.code()
}

fn load_config(args: &CliArgs) -> Result<Config> {
    let path = PathBuf::from(&args.config);
    let mut cfg = load_from_path(&path)?;
    if let Some(out) = &args.out {
        cfg.output.out = out.clone();
    }
    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

fn report(deps: &Deps, message: &str) {
    if let Err(err) = deps.write_stderr_line(&format!("thoth: {message}")) {
        warn!(error = %err, "could not write to stderr");
    }
}

/// Resolved plan for `--dry-run`.
pub fn dry_run_text(cfg: &Config) -> String {
    let stages = plan_for(cfg);
    let mut out = String::new();
    out.push_str("thoth dry-run\n");
    out.push_str(&format!("  action = {}\n", cfg.action));
    out.push_str(&format!("  root = {}\n", cfg.discovery.root.display()));
    out.push_str(&format!("  workers = {}\n", cfg.effective_workers()));
    out.push_str(&format!("  errors.mode = {}\n", error_mode_str(cfg)));
    out.push_str(&format!("  output.out = {}\n", cfg.output.out));
    out.push('\n');
    out.push_str(&format!("stages ({}):\n", stages.len()));
    for stage in stages {
        out.push_str(&format!("  - {stage}\n"));
    }
    out
}

fn error_mode_str(cfg: &Config) -> &'static str {
    if cfg.errors.fail_fast() { "fail-fast" } else { "keep-going" }
}
