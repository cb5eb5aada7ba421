// src/engine/registry.rs

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

use tracing::debug;

use crate::engine::context::{Deps, StageContext};
use crate::envelope::Envelope;
use crate::errors::{Result, ThothError};

/// Future returned by a stage runner.
pub type StageFuture = Pin<Box<dyn Future<Output = Result<Envelope>> + Send>>;

/// A stage runner: `(context, envelope, deps) -> envelope | fatal`.
pub type StageFn = fn(StageContext, Envelope, Deps) -> StageFuture;

/// Name → runner table.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    stages: BTreeMap<&'static str, StageFn>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry, populated on first use.
pub fn registry() -> &'static Registry {
    GLOBAL.get_or_init(crate::stages::bootstrap)
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, runner: StageFn) {
        self.stages.insert(name, runner);
    }

    pub fn get(&self, name: &str) -> Option<StageFn> {
        self.stages.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.keys().copied()
    }

    /// Run a stage by name and stamp the result.
    pub async fn run(&self, name: &str, ctx: StageContext, env: Envelope, deps: Deps) -> Result<Envelope> {
        let runner = self
            .get(name)
            .ok_or_else(|| ThothError::stage(name, "unknown stage"))?;
        debug!(stage = name, "running stage");
        let mut out = runner(ctx, env, deps).await?;
        out.stamp(name);
        out.sort_errors();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(_ctx: StageContext, mut env: Envelope, _deps: Deps) -> StageFuture {
        Box::pin(async move {
            env.meta.reduced = Some(serde_json::json!("tagged"));
            Ok(env)
        })
    }

    #[tokio::test]
    async fn run_stamps_stage_and_contract() {
        let mut reg = Registry::new();
        reg.register("tag", tag);
        let mut env = Envelope::new();
        env.meta.contract_version = String::new();
        let out = reg.run("tag", StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert_eq!(out.meta.stage.as_deref(), Some("tag"));
        assert_eq!(out.meta.contract_version, "1");
        assert_eq!(out.meta.reduced, Some(serde_json::json!("tagged")));
    }

    #[tokio::test]
    async fn unknown_stage_is_an_error() {
        let reg = Registry::new();
        let err = reg
            .run("nope", StageContext::new(), Envelope::new(), Deps::stdio())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "nope: unknown stage");
    }

    #[test]
    fn global_registry_knows_the_catalog() {
        let names: Vec<_> = registry().names().collect();
        assert_eq!(names.len(), 19);
        assert!(registry().contains("write-output"));
    }
}
