// src/stages/lua.rs

//! The four script stages plus the shared `expectedLua` evaluator.

use serde_json::{Map, Value};
use tracing::info;

use crate::config::{SandboxPolicy, inline_code};
use crate::engine::{CancelToken, Deps, FailurePolicy, StageContext, StageFuture, Step, map_records};
use crate::envelope::{Envelope, Record};
use crate::sandbox::{ScriptCall, run_script};
use crate::stages::names;

const DEFAULT_MAP: &str = "return {locator=locator, meta=meta}";

/// Lua truthiness after conversion: only `nil` and `false` are false.
fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn non_null(value: Value) -> Option<Value> {
    if value.is_null() { None } else { Some(value) }
}

pub fn lua_filter(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let Some(code) = inline_code(&env.meta.filter).map(str::to_string) else {
            return Ok(env);
        };
        let policy = env.meta.sandbox_policy();
        let cancel = ctx.cancel.clone();

        map_records(names::LUA_FILTER, &ctx, env, move |record: Record| {
            let call = ScriptCall::new(names::LUA_FILTER, &record.locator, &code)
                .bind("locator", Value::String(record.locator.clone()))
                .bind("meta", record.meta_value());
            let (policy, cancel) = (policy.clone(), cancel.clone());
            async move {
                match run_script(policy, call, cancel).await {
                    Ok(v) if truthy(&v) => Step::Keep(record),
                    Ok(_) => Step::Drop,
                    Err(failure) => Step::Fail(record, failure.to_string()),
                }
            }
        })
        .await
    })
}

pub fn lua_map(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let code = inline_code(&env.meta.map).unwrap_or(DEFAULT_MAP).to_string();
        let policy = env.meta.sandbox_policy();
        let cancel = ctx.cancel.clone();

        map_records(names::LUA_MAP, &ctx, env, move |mut record: Record| {
            let call = ScriptCall::new(names::LUA_MAP, &record.locator, &code)
                .bind("locator", Value::String(record.locator.clone()))
                .bind("meta", record.meta_value());
            let (policy, cancel) = (policy.clone(), cancel.clone());
            async move {
                match run_script(policy, call, cancel).await {
                    Ok(v) => {
                        record.mapped = non_null(v);
                        Step::Keep(record)
                    }
                    Err(failure) => Step::Fail(record, failure.to_string()),
                }
            }
        })
        .await
    })
}

/// `{locator, exit?}` when no postmap fragment is configured but the shell
/// ran.
fn default_post(record: &Record) -> Value {
    let mut post = Map::new();
    post.insert("locator".to_string(), Value::String(record.locator.clone()));
    if let Some(shell) = &record.shell {
        post.insert("exit".to_string(), Value::from(shell.exit_code));
    }
    Value::Object(post)
}

pub fn lua_postmap(ctx: StageContext, env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let code = inline_code(&env.meta.post_map).map(str::to_string);
        if code.is_none() && !env.meta.shell_policy().enabled {
            return Ok(env);
        }
        let policy = env.meta.sandbox_policy();
        let cancel = ctx.cancel.clone();

        map_records(names::LUA_POSTMAP, &ctx, env, move |mut record: Record| {
            let call = code.as_deref().map(|code| {
                let shell = record
                    .shell
                    .as_ref()
                    .and_then(|s| serde_json::to_value(s).ok())
                    .unwrap_or(Value::Null);
                ScriptCall::new(names::LUA_POSTMAP, &record.locator, code)
                    .bind("locator", Value::String(record.locator.clone()))
                    .bind("meta", record.meta_value())
                    .bind("mapped", record.mapped.clone().unwrap_or(Value::Null))
                    .bind("shell", shell)
            });
            let (policy, cancel) = (policy.clone(), cancel.clone());
            async move {
                let Some(call) = call else {
                    record.post = Some(default_post(&record));
                    return Step::Keep(record);
                };
                match run_script(policy, call, cancel).await {
                    Ok(v) => {
                        record.post = non_null(v);
                        Step::Keep(record)
                    }
                    Err(failure) => Step::Fail(record, failure.to_string()),
                }
            }
        })
        .await
    })
}

/// Sequential left fold over the successful records.
pub fn lua_reduce(ctx: StageContext, mut env: Envelope, _deps: Deps) -> StageFuture {
    Box::pin(async move {
        let Some(code) = inline_code(&env.meta.reduce).map(str::to_string) else {
            return Ok(env);
        };
        let failures = FailurePolicy::for_envelope(names::LUA_REDUCE, &env);
        let policy = env.meta.sandbox_policy();
        let records = std::mem::take(&mut env.records);

        info!(stage = names::LUA_REDUCE, records = records.len(), "stage started");
        ctx.progress_begin(names::LUA_REDUCE, records.len());

        let mut acc = Value::Null;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            if record.has_error() {
                out.push(record);
                continue;
            }
            if ctx.cancel.is_cancelled() {
                return Err(failures.fatal("cancelled"));
            }
            let item = record.post.clone().unwrap_or_else(|| record.structured_view());
            let call = ScriptCall::new(names::LUA_REDUCE, &record.locator, &code)
                .bind("acc", acc.clone())
                .bind("item", item)
                .bind("locator", Value::String(record.locator.clone()));
            match run_script(policy.clone(), call, ctx.cancel.clone()).await {
                Ok(next) => {
                    acc = next;
                    ctx.progress_tick(false);
                    out.push(record);
                }
                Err(failure) => {
                    ctx.progress_tick(true);
                    out.push(failures.record_failure(&mut env, record, &failure.to_string())?);
                }
            }
        }

        env.records = out;
        env.meta.reduced = non_null(acc);
        Ok(env)
    })
}

/// Evaluate an `expectedLua` fragment for one locator; it must yield a
/// mapping (`nil` counts as empty).
pub(crate) async fn expected_from_lua(
    stage: &str,
    policy: SandboxPolicy,
    code: &str,
    locator: &str,
    existing: &Map<String, Value>,
    cancel: CancelToken,
) -> Result<Map<String, Value>, String> {
    let call = ScriptCall::new(stage, locator, code)
        .bind("locator", Value::String(locator.to_string()))
        .bind("existingMeta", Value::Object(existing.clone()))
        .bind("meta", Value::Object(existing.clone()));
    match run_script(policy, call, cancel).await {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) => Err("expectedLua must return a mapping".to_string()),
        Err(failure) => Err(failure.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ErrorMode, ErrorPolicy, InlineScript, ShellConfig};
    use crate::envelope::ShellResult;
    use serde_json::json;

    fn script(code: &str) -> Option<InlineScript> {
        Some(InlineScript {
            inline: code.to_string(),
        })
    }

    fn record(locator: &str, meta: Value) -> Record {
        match meta {
            Value::Object(m) => Record::with_meta(locator, m),
            _ => Record::new(locator),
        }
    }

    fn env_with(cfg: Config, records: Vec<Record>) -> Envelope {
        Envelope::from_config(&cfg).with_records(records)
    }

    #[tokio::test]
    async fn filter_keeps_truthy_records() {
        let cfg = Config {
            filter: script("meta.enabled"),
            ..Config::default()
        };
        let env = env_with(
            cfg,
            vec![
                record("a", json!({"enabled": true})),
                record("b", json!({"enabled": false})),
                record("c", json!({})),
            ],
        );
        let out = lua_filter(StageContext::new(), env, Deps::stdio()).await.unwrap();
        let locs: Vec<_> = out.records.iter().map(|r| r.locator.as_str()).collect();
        assert_eq!(locs, vec!["a"]);
    }

    #[tokio::test]
    async fn map_defaults_to_locator_and_meta() {
        let env = env_with(Config::default(), vec![record("a", json!({"x": 1}))]);
        let out = lua_map(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert_eq!(out.records[0].mapped, Some(json!({"locator": "a", "meta": {"x": 1}})));
    }

    #[tokio::test]
    async fn map_nil_leaves_mapped_absent() {
        let cfg = Config {
            map: script("return nil"),
            ..Config::default()
        };
        let env = env_with(cfg, vec![Record::new("a")]);
        let out = lua_map(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert!(out.records[0].mapped.is_none());
    }

    #[tokio::test]
    async fn map_runtime_errors_follow_the_mode() {
        let cfg = Config {
            map: script("return error('nope')"),
            errors: ErrorPolicy {
                mode: ErrorMode::KeepGoing,
                embed_errors: true,
            },
            ..Config::default()
        };
        let env = env_with(cfg, vec![Record::new("a")]);
        let out = lua_map(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].message, "nope");
        assert_eq!(out.records[0].error.as_ref().map(|e| e.stage.as_str()), Some("lua-map"));
    }

    #[tokio::test]
    async fn postmap_default_carries_exit_code() {
        let mut with_shell = Record::new("a");
        with_shell.shell = Some(ShellResult {
            exit_code: 3,
            ..ShellResult::default()
        });
        let cfg = Config {
            shell: ShellConfig {
                enabled: true,
                program: "true".to_string(),
                ..ShellConfig::default()
            },
            ..Config::default()
        };
        let env = env_with(cfg, vec![with_shell, Record::new("b")]);
        let out = lua_postmap(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert_eq!(out.records[0].post, Some(json!({"locator": "a", "exit": 3})));
        assert_eq!(out.records[1].post, Some(json!({"locator": "b"})));
    }

    #[tokio::test]
    async fn postmap_without_fragment_or_shell_is_a_no_op() {
        let env = env_with(Config::default(), vec![Record::new("a")]);
        let out = lua_postmap(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert!(out.records[0].post.is_none());
    }

    #[tokio::test]
    async fn postmap_sees_mapped_and_shell() {
        let cfg = Config {
            post_map: script("return {m = mapped.n, code = shell.exitCode}"),
            ..Config::default()
        };
        let mut r = Record::new("a");
        r.mapped = Some(json!({"n": 7}));
        r.shell = Some(ShellResult::default());
        let out = lua_postmap(StageContext::new(), env_with(cfg, vec![r]), Deps::stdio())
            .await
            .unwrap();
        assert_eq!(out.records[0].post, Some(json!({"m": 7, "code": 0})));
    }

    #[tokio::test]
    async fn reduce_folds_in_order() {
        let cfg = Config {
            reduce: script("return (acc or '') .. item.locator"),
            ..Config::default()
        };
        let mut errored = Record::new("x");
        errored.set_error("earlier", "bad");
        let records = vec![Record::new("a"), errored, Record::new("b"), Record::new("c")];
        let out = lua_reduce(StageContext::new(), env_with(cfg, records), Deps::stdio())
            .await
            .unwrap();
        assert_eq!(out.meta.reduced, Some(json!("abc")));
        assert_eq!(out.records.len(), 4);
    }

    #[tokio::test]
    async fn reduce_without_fragment_is_a_no_op() {
        let env = env_with(Config::default(), vec![Record::new("a")]);
        let out = lua_reduce(StageContext::new(), env, Deps::stdio()).await.unwrap();
        assert!(out.meta.reduced.is_none());
    }

    #[tokio::test]
    async fn expected_lua_must_yield_a_mapping() {
        let existing = Map::new();
        let policy = SandboxPolicy::default();
        let ok = expected_from_lua("merge-meta", policy.clone(), "return {seen = locator}", "a", &existing, CancelToken::new())
            .await
            .unwrap();
        assert_eq!(Value::Object(ok), json!({"seen": "a"}));

        let err = expected_from_lua("merge-meta", policy, "return 5", "a", &existing, CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, "expectedLua must return a mapping");
    }
}
