// src/stages/shell_exec.rs

use std::path::PathBuf;
use std::time::Duration;

use crate::config::ShellConfig;
use crate::engine::{Deps, StageContext, StageFuture, Step, map_records};
use crate::envelope::{Envelope, Record};
use crate::exec::{CommandSpec, render_args, run_command};
use crate::stages::names;

fn working_dir(root: PathBuf, shell: &ShellConfig) -> PathBuf {
    if shell.working_dir.trim().is_empty() {
        root
    } else {
        root.join(&shell.working_dir)
    }
}

/// Run `shell.program` once per record with the rendered argument template.
///
/// A timeout or a start/wait failure is a record-local failure; the record
/// still carries its `shell` result.
pub fn shell_exec(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let shell = env.meta.shell_policy();
        if !shell.enabled {
            return Ok(env);
        }

        let base = CommandSpec {
            program: shell.program.clone(),
            args: Vec::new(),
            working_dir: Some(working_dir(env.meta.root(), &shell)),
            env: shell.env.clone(),
            timeout: Duration::from_millis(shell.timeout_ms),
            capture: shell.capture.clone(),
            kill_process_group: shell.kill_process_group,
            term_grace: Duration::from_millis(shell.term_grace_ms),
        };
        let template = shell.args_template.clone();
        let strict = shell.strict_templating;
        let cancel = ctx.cancel.clone();

        map_records(names::SHELL_EXEC, &ctx, env, move |mut record: Record| {
            let rendered = render_args(&template, record.mapped.as_ref(), strict);
            let mut spec = base.clone();
            let cancel = cancel.clone();
            async move {
                spec.args = match rendered {
                    Ok(args) => args,
                    Err(msg) => return Step::Fail(record, msg),
                };
                let result = run_command(&spec, &cancel).await;
                let failure = if result.timed_out {
                    Some("timeout".to_string())
                } else {
                    result.error.clone()
                };
                record.shell = Some(result);
                match failure {
                    Some(msg) => Step::Fail(record, msg),
                    None => Step::Keep(record),
                }
            }
        })
        .await
    })
}
