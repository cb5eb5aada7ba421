// src/sandbox/runtime.rs

//! One sandboxed script evaluation.
//!
//! Every call gets a fresh Lua state: only the allowlisted libraries are
//! opened, the loader and GC entry points are removed, allocations are capped
//! and an instruction hook enforces the wall-clock deadline.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use mlua::{HookTriggers, Lua, LuaOptions, StdLib, Value as LuaValue, Variadic, VmState};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::config::SandboxPolicy;
use crate::engine::context::CancelToken;
use crate::errors::collapse_whitespace;
use crate::sandbox::convert::{from_lua, to_lua};
use crate::sandbox::policy::{Violation, estimate_instructions, measure_value, wrap_fragment};
use crate::sandbox::rng::ScriptRng;

/// `<chunk>:<line>: ` prefix Lua puts on runtime errors; the stage name is
/// already carried next to the message.
static CHUNK_POSITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s:]+:\d+:\s*").expect("chunk position regex is valid"));

/// Instructions between two deadline checks.
const HOOK_EVERY_N: u32 = 1_000;

/// Globals that are never reachable from a script.
const ALWAYS_REMOVED: &[&str] = &["dofile", "loadfile", "load", "require", "collectgarbage"];

/// Base-library globals dropped when `libs.base = false`.
const BASE_GLOBALS: &[&str] = &[
    "assert",
    "error",
    "getmetatable",
    "ipairs",
    "next",
    "pairs",
    "pcall",
    "print",
    "rawequal",
    "rawget",
    "rawlen",
    "rawset",
    "select",
    "setmetatable",
    "tonumber",
    "tostring",
    "type",
    "warn",
    "xpcall",
];

/// Why a script did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxFailure {
    /// A resource bound was hit.
    Violation(Violation),
    /// The script raised an error (or returned something unconvertible).
    Runtime(String),
}

impl fmt::Display for SandboxFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxFailure::Violation(v) => f.write_str(v.as_str()),
            SandboxFailure::Runtime(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for SandboxFailure {}

/// Inputs of one evaluation.
#[derive(Debug, Clone)]
pub struct ScriptCall {
    /// Stage name; seeds the RNG and names the chunk.
    pub stage: String,
    pub locator: String,
    /// The inline fragment as configured.
    pub fragment: String,
    /// Globals bound before the chunk runs.
    pub globals: Vec<(String, Value)>,
}

impl ScriptCall {
    pub fn new(stage: &str, locator: &str, fragment: &str) -> Self {
        Self {
            stage: stage.to_string(),
            locator: locator.to_string(),
            fragment: fragment.to_string(),
            globals: Vec::new(),
        }
    }

    pub fn bind(mut self, name: &str, value: Value) -> Self {
        self.globals.push((name.to_string(), value));
        self
    }
}

/// Run a script on the blocking pool.
pub async fn run_script(
    policy: SandboxPolicy,
    call: ScriptCall,
    cancel: CancelToken,
) -> Result<Value, SandboxFailure> {
    if cancel.is_cancelled() {
        return Err(SandboxFailure::Runtime("cancelled".to_string()));
    }
    tokio::task::spawn_blocking(move || evaluate(&policy, &call, &cancel))
        .await
        .unwrap_or_else(|e| Err(SandboxFailure::Runtime(format!("sandbox worker failed: {e}"))))
}

/// Run a script on the current thread.
pub fn evaluate(
    policy: &SandboxPolicy,
    call: &ScriptCall,
    cancel: &CancelToken,
) -> Result<Value, SandboxFailure> {
    if estimate_instructions(&call.fragment) > policy.instruction_limit {
        return Err(SandboxFailure::Violation(Violation::InstructionLimit));
    }

    let lua = open_state(policy).map_err(classify)?;
    harden(&lua, policy, call).map_err(classify)?;

    let ceiling = lua
        .used_memory()
        .saturating_add(usize::try_from(policy.memory_limit_bytes).unwrap_or(usize::MAX));
    lua.set_memory_limit(ceiling).map_err(classify)?;

    let globals = lua.globals();
    for (name, value) in &call.globals {
        let lv = to_lua(&lua, value).map_err(classify)?;
        globals.set(name.as_str(), lv).map_err(classify)?;
    }

    let timed_out = Arc::new(AtomicBool::new(false));
    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let deadline = Instant::now() + Duration::from_millis(policy.timeout_ms);
        let timed_out = timed_out.clone();
        let cancelled = cancelled.clone();
        let cancel = cancel.clone();
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_EVERY_N),
            move |_lua, _debug| {
                if cancel.is_cancelled() {
                    cancelled.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::runtime("cancelled"));
                }
                if Instant::now() >= deadline {
                    timed_out.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::runtime(Violation::Timeout.as_str()));
                }
                Ok(VmState::Continue)
            },
        );
    }

    let chunk_name = format!("={}", call.stage);
    let wrapped = wrap_fragment(&call.fragment);
    let function = match lua.load(wrapped.as_str()).set_name(chunk_name.clone()).into_function() {
        Ok(f) => f,
        // Statement fragments (`while true do end`) are not expressions.
        Err(mlua::Error::SyntaxError { .. }) if wrapped != call.fragment => lua
            .load(call.fragment.as_str())
            .set_name(chunk_name)
            .into_function()
            .map_err(classify)?,
        Err(e) => return Err(classify(e)),
    };
    let result = function.call::<LuaValue>(());

    let value = match result {
        Ok(v) => v,
        Err(_) if timed_out.load(Ordering::Relaxed) => {
            return Err(SandboxFailure::Violation(Violation::Timeout));
        }
        Err(_) if cancelled.load(Ordering::Relaxed) => {
            return Err(SandboxFailure::Runtime("cancelled".to_string()));
        }
        Err(e) => return Err(classify(e)),
    };

    let out = from_lua(&value).map_err(SandboxFailure::Runtime)?;
    if measure_value(&out) > policy.memory_limit_bytes {
        return Err(SandboxFailure::Violation(Violation::MemoryLimit));
    }
    Ok(out)
}

fn open_state(policy: &SandboxPolicy) -> mlua::Result<Lua> {
    let mut libs = StdLib::NONE;
    if policy.libs.table {
        libs = libs | StdLib::TABLE;
    }
    if policy.libs.string {
        libs = libs | StdLib::STRING;
    }
    if policy.libs.math {
        libs = libs | StdLib::MATH;
    }
    Lua::new_with(libs, LuaOptions::new())
}

fn harden(lua: &Lua, policy: &SandboxPolicy, call: &ScriptCall) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in ALWAYS_REMOVED {
        globals.set(*name, LuaValue::Nil)?;
    }

    if policy.libs.base {
        // `print` would write into the envelope stream; route it to the log.
        let stage = call.stage.clone();
        let locator = call.locator.clone();
        let print = lua.create_function(move |_, args: Variadic<LuaValue>| {
            let parts: Vec<String> = args.iter().map(describe).collect();
            debug!(stage = %stage, locator = %locator, "lua print: {}", parts.join("\t"));
            Ok(())
        })?;
        globals.set("print", print)?;
    } else {
        for name in BASE_GLOBALS {
            globals.set(*name, LuaValue::Nil)?;
        }
    }

    if policy.deterministic_random && policy.libs.math {
        install_rng(lua, call)?;
    }
    Ok(())
}

fn install_rng(lua: &Lua, call: &ScriptCall) -> mlua::Result<()> {
    let rng = Arc::new(Mutex::new(ScriptRng::new(&call.stage, &call.locator)));
    let math: mlua::Table = lua.globals().get("math")?;

    let random = lua.create_function(move |_, (m, n): (Option<i64>, Option<i64>)| {
        let mut rng = rng
            .lock()
            .map_err(|_| mlua::Error::runtime("random generator unavailable"))?;
        match (m, n) {
            (None, _) => Ok(LuaValue::Number(rng.unit())),
            (Some(m), None) => rng.between(1, m).map(LuaValue::Integer).map_err(mlua::Error::runtime),
            (Some(m), Some(n)) => rng.between(m, n).map(LuaValue::Integer).map_err(mlua::Error::runtime),
        }
    })?;
    let randomseed = lua.create_function(|_, _: mlua::MultiValue| Ok(()))?;

    math.set("random", random)?;
    math.set("randomseed", randomseed)?;
    Ok(())
}

fn describe(v: &LuaValue) -> String {
    match from_lua(v) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => v.type_name().to_string(),
    }
}

fn is_memory_error(e: &mlua::Error) -> bool {
    match e {
        mlua::Error::MemoryError(_) => true,
        mlua::Error::CallbackError { cause, .. } => is_memory_error(cause),
        other => other.to_string().contains("not enough memory"),
    }
}

fn error_text(e: &mlua::Error) -> String {
    match e {
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => error_text(cause),
        other => other.to_string(),
    }
}

fn classify(e: mlua::Error) -> SandboxFailure {
    if is_memory_error(&e) {
        return SandboxFailure::Violation(Violation::MemoryLimit);
    }
    let text = error_text(&e);
    let first = text.split("\nstack traceback").next().unwrap_or(&text);
    let bare = CHUNK_POSITION.replace(first, "");
    SandboxFailure::Runtime(collapse_whitespace(&bare))
}
