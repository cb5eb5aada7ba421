// src/logging.rs

//! Diagnostics for `thoth` go to stderr only.
//!
//! stdout belongs to the envelope (or the NDJSON stream) and has to stay
//! parseable, so the subscriber never writes there. The filter comes from
//! `--log-level` when given, otherwise from `THOTH_LOG`, which takes any
//! `EnvFilter` directive string (`debug`, `thoth::sandbox=trace,warn`).
//! Anything missing or unparsable falls back to `warn`.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "THOTH_LOG";

const FALLBACK_DIRECTIVE: &str = "warn";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    fmt()
        .with_env_filter(resolve_filter(cli_level, env.as_deref()))
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("logging already initialised: {e}"))
}

fn resolve_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(directive(level));
    }
    env.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(FALLBACK_DIRECTIVE))
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    fn hint(cli: Option<LogLevel>, env: Option<&str>) -> Option<LevelFilter> {
        resolve_filter(cli, env).max_level_hint()
    }

    #[test]
    fn flag_beats_environment() {
        assert_eq!(hint(Some(LogLevel::Error), Some("trace")), Some(LevelFilter::ERROR));
    }

    #[test]
    fn environment_accepts_directives() {
        assert_eq!(hint(None, Some(" debug ")), Some(LevelFilter::DEBUG));
        assert_eq!(hint(None, Some("thoth::sandbox=trace,warn")), Some(LevelFilter::TRACE));
    }

    #[test]
    fn missing_or_bad_environment_falls_back_to_warn() {
        assert_eq!(hint(None, None), Some(LevelFilter::WARN));
        assert_eq!(hint(None, Some("  ")), Some(LevelFilter::WARN));
        assert_eq!(hint(None, Some("thoth=loud")), Some(LevelFilter::WARN));
    }
}
