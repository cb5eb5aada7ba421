// src/stages/output.rs

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use crate::engine::{Deps, FailurePolicy, StageContext, StageFuture};
use crate::envelope::{Envelope, Record};
use crate::errors::Result;
use crate::stages::names;

/// Render the envelope (or the record stream) to `output.out`.
pub fn write_output(_ctx: StageContext, env: Envelope, deps: Deps) -> StageFuture {
    Box::pin(run(env, deps))
}

async fn run(mut env: Envelope, deps: Deps) -> Result<Envelope> {
    let failures = FailurePolicy::for_envelope(names::WRITE_OUTPUT, &env);
    let opts = env.meta.output_options();
    let embed = env.meta.error_policy().embed_errors;

    env.stamp(names::WRITE_OUTPUT);
    env.sort_errors();

    let bytes = if opts.lines {
        render_lines(&env.records)?
    } else {
        let limit = env.meta.limits_or_default().max_records_in_memory;
        if env.records.len() > limit {
            return Err(failures.fatal(&format!(
                "{} records exceed limits.maxRecordsInMemory ({limit}); set output.lines=true to stream records",
                env.records.len()
            )));
        }
        render_envelope(&env, embed, opts.pretty)?
    };

    if opts.out == "-" {
        deps.write_stdout(&bytes)?;
    } else {
        let path = PathBuf::from(&opts.out);
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| failures.fatal(&format!("output writer failed: {e}")))?
            .map_err(|e| failures.fatal(&format!("cannot write output: {e}")))?;
    }

    info!(
        stage = names::WRITE_OUTPUT,
        records = env.records.len(),
        errors = env.errors.len(),
        lines = opts.lines,
        out = %opts.out,
        "output written"
    );
    Ok(env)
}

/// One compact record per line. Errored records never reach the stream;
/// they stay on the returned envelope and count towards the exit status.
fn render_lines(records: &[Record]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records.iter().filter(|r| !r.has_error()) {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

fn render_envelope(env: &Envelope, embed: bool, pretty: bool) -> Result<Vec<u8>> {
    let stripped;
    let view = if embed {
        env
    } else {
        let mut copy = env.clone();
        for record in copy.records.iter_mut() {
            record.error = None;
        }
        stripped = copy;
        &stripped
    };

    let mut out = if pretty {
        serde_json::to_vec_pretty(view)?
    } else {
        serde_json::to_vec(view)?
    };
    out.push(b'\n');
    Ok(out)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let mut tmp = NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
