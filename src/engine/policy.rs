// src/engine/policy.rs

//! Error-mode handling for per-record stages.
//!
//! A per-record step returns a [`Step`]; [`map_records`] fans the steps out
//! over the worker pool and folds them back into the envelope according to
//! `errors.mode`:
//! - `fail-fast`: the first failure (by record index) becomes the stage's
//!   fatal error and the pool is cancelled
//! - `keep-going`: the record keeps an embedded `error`, the envelope gets a
//!   sorted `{stage, locator, message}` entry, and the stage carries on

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::context::StageContext;
use crate::engine::parallel::run_indexed;
use crate::envelope::{Envelope, EnvelopeError, Record};
use crate::errors::{ErrorKind, Result, ThothError, sanitize_message};

/// Outcome of one per-record step.
#[derive(Debug)]
pub enum Step {
    /// Success; the (possibly updated) record stays.
    Keep(Record),
    /// The record is filtered out.
    Drop,
    /// Record-local failure.
    Fail(Record, String),
}

impl Step {
    fn failed(&self) -> bool {
        matches!(self, Step::Fail(..))
    }
}

/// Failure bookkeeping shared by parallel and sequential stages.
#[derive(Debug, Clone)]
pub struct FailurePolicy {
    pub stage: &'static str,
    pub fail_fast: bool,
    root: std::path::PathBuf,
}

impl FailurePolicy {
    pub fn for_envelope(stage: &'static str, env: &Envelope) -> Self {
        Self {
            stage,
            fail_fast: env.meta.error_policy().fail_fast(),
            root: env.meta.root(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path-free single-line message.
    pub fn clean(&self, message: &str) -> String {
        sanitize_message(message, &self.root)
    }

    pub fn fatal(&self, message: &str) -> ThothError {
        ThothError::stage(self.stage, self.clean(message))
    }

    /// Record a record-local failure on the record and the envelope.
    ///
    /// Returns the fatal error instead under `fail-fast`.
    pub fn record_failure(&self, env: &mut Envelope, mut record: Record, message: &str) -> Result<Record> {
        let message = self.clean(message);
        if self.fail_fast {
            return Err(ThothError::stage(self.stage, message));
        }
        debug!(
            stage = self.stage,
            kind = ErrorKind::classify(self.stage, &message).as_str(),
            locator = %record.locator,
            %message,
            "record failed"
        );
        env.push_error(EnvelopeError::new(self.stage, Some(record.locator.as_str()), &message));
        record.set_error(self.stage, message);
        Ok(record)
    }

    /// Record an envelope-level failure not tied to one record.
    pub fn envelope_failure(&self, env: &mut Envelope, locator: Option<&str>, message: &str) -> Result<()> {
        let message = self.clean(message);
        if self.fail_fast {
            return Err(ThothError::stage(self.stage, message));
        }
        warn!(
            stage = self.stage,
            kind = ErrorKind::classify(self.stage, &message).as_str(),
            %message,
            "stage error recorded"
        );
        env.push_error(EnvelopeError::new(self.stage, locator, &message));
        Ok(())
    }
}

/// Apply `step` to every record in parallel, preserving order.
///
/// Records that already carry an error pass through untouched.
pub async fn map_records<F, Fut>(
    stage: &'static str,
    ctx: &StageContext,
    mut env: Envelope,
    step: F,
) -> Result<Envelope>
where
    F: Fn(Record) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Step> + Send + 'static,
{
    let policy = FailurePolicy::for_envelope(stage, &env);
    let workers = env.meta.worker_count();
    let records = std::mem::take(&mut env.records);
    let total = records.len();

    info!(stage, records = total, workers, "stage started");
    ctx.progress_begin(stage, total);

    let step = Arc::new(step);
    let progress = ctx.clone();
    let fail_fast = policy.fail_fast;

    let results = run_indexed(
        records,
        workers,
        &ctx.cancel,
        move |_, record: Record| {
            let step = step.clone();
            let progress = progress.clone();
            async move {
                let out = if record.has_error() {
                    Step::Keep(record)
                } else {
                    step(record).await
                };
                progress.progress_tick(out.failed());
                out
            }
        },
        move |out: &Step| fail_fast && out.failed(),
    )
    .await;

    let mut kept = Vec::with_capacity(total);
    let mut missing = false;
    for slot in results {
        match slot {
            Some(Step::Keep(record)) => kept.push(record),
            Some(Step::Drop) => {}
            Some(Step::Fail(record, message)) => {
                kept.push(policy.record_failure(&mut env, record, &message)?);
            }
            None => missing = true,
        }
    }
    if missing {
        return Err(policy.fatal("cancelled"));
    }

    env.records = kept;
    info!(
        stage,
        records = env.records.len(),
        errors = env.errors.len(),
        "stage finished"
    );
    Ok(env)
}
