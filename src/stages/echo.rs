// src/stages/echo.rs

use tracing::debug;

use crate::config::validate_config as check_config;
use crate::engine::{Deps, StageContext, StageFuture};
use crate::envelope::Envelope;
use crate::errors::ThothError;
use crate::stages::names;

/// Identity stage.
pub fn echo(_ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        debug!(records = env.records.len(), "echo");
        Ok(env)
    })
}

/// Re-validate the configuration snapshot carried on the envelope.
pub fn validate_config(_ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let cfg = env.meta.to_config();
        check_config(&cfg).map_err(|err| match err {
            ThothError::Config(msg) => ThothError::stage(names::VALIDATE_CONFIG, msg),
            other => ThothError::stage(names::VALIDATE_CONFIG, other.to_string()),
        })?;
        Ok(env)
    })
}
