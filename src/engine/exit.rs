// src/engine/exit.rs

use std::fmt;

use crate::config::{Action, ErrorMode};
use crate::envelope::Envelope;
use crate::errors::ThothError;

/// Final process status of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    /// A stage returned a fatal error, or the configuration was rejected.
    Fatal,
    /// `keep-going` with nothing to show, or diff-meta with execution errors.
    ExecError,
    /// diff-meta found changes under `failOnChange`.
    Drift,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::ExecError => 2,
            ExitStatus::Drift => 3,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitStatus::Success => "success",
            ExitStatus::Fatal => "fatal",
            ExitStatus::ExecError => "exec error",
            ExitStatus::Drift => "drift",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitDecision {
    pub status: ExitStatus,
    /// Line for stderr, when the status needs explaining.
    pub message: Option<String>,
}

impl ExitDecision {
    fn success() -> Self {
        Self {
            status: ExitStatus::Success,
            message: None,
        }
    }

    fn with(status: ExitStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }

    pub fn code(&self) -> i32 {
        self.status.code()
    }
}

/// Map the final envelope (and the fatal error, if any) to an exit status.
pub fn evaluate(env: &Envelope, fatal: Option<&ThothError>) -> ExitDecision {
    if let Some(err) = fatal {
        return ExitDecision::with(ExitStatus::Fatal, err.to_string());
    }

    let action = env.meta.action().unwrap_or_default();
    let has_exec_errors = !env.errors.is_empty() || env.records.iter().any(|r| r.has_error());

    if action == Action::DiffMeta {
        let fail_on_change = env.meta.diff_meta.as_ref().is_some_and(|d| d.fail_on_change);
        if fail_on_change {
            if has_exec_errors {
                return ExitDecision::with(ExitStatus::ExecError, "execution errors");
            }
            if env.meta.diff_report.as_ref().is_some_and(|r| r.has_changes()) {
                return ExitDecision::with(ExitStatus::Drift, "drift detected");
            }
            return ExitDecision::success();
        }
    }

    if env.meta.error_policy().mode == ErrorMode::KeepGoing {
        if env.successful_records() > 0 {
            return ExitDecision::success();
        }
        if action == Action::DiffMeta && env.meta.diff_report.is_some() {
            return ExitDecision::success();
        }
        if env.records.is_empty() && env.errors.is_empty() {
            return ExitDecision::success();
        }
        return ExitDecision::with(ExitStatus::ExecError, "no successful records");
    }

    ExitDecision::success()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DiffFormat, DiffMetaConfig, DiffOnly, ErrorPolicy};
    use crate::envelope::{EnvelopeError, Record};
    use crate::metafile::diff::{DiffReport, ValueDiff};
    use serde_json::json;

    fn env_for(cfg: Config) -> Envelope {
        Envelope::from_config(&cfg)
    }

    fn keep_going() -> ErrorPolicy {
        ErrorPolicy {
            mode: ErrorMode::KeepGoing,
            embed_errors: true,
        }
    }

    #[test]
    fn fatal_wins() {
        let env = env_for(Config::default());
        let err = ThothError::stage("lua-map", "sandbox timeout");
        let d = evaluate(&env, Some(&err));
        assert_eq!(d.status, ExitStatus::Fatal);
        assert_eq!(d.code(), 1);
        assert_eq!(d.message.as_deref(), Some("lua-map: sandbox timeout"));
    }

    #[test]
    fn keep_going_needs_a_successful_record() {
        let cfg = Config {
            errors: keep_going(),
            ..Config::default()
        };
        let mut env = env_for(cfg);
        let mut bad = Record::new("a");
        bad.set_error("lua-map", "boom");
        env.records.push(bad);
        env.push_error(EnvelopeError::new("lua-map", Some("a"), "boom"));
        let d = evaluate(&env, None);
        assert_eq!(d.status, ExitStatus::ExecError);
        assert_eq!(d.code(), 2);

        env.records.push(Record::new("b"));
        assert_eq!(evaluate(&env, None).status, ExitStatus::Success);
    }

    #[test]
    fn keep_going_with_nothing_at_all_is_success() {
        let cfg = Config {
            errors: keep_going(),
            ..Config::default()
        };
        assert_eq!(evaluate(&env_for(cfg), None).status, ExitStatus::Success);
    }

    fn drift_env(errors: bool) -> Envelope {
        let cfg = Config {
            action: Action::DiffMeta,
            errors: keep_going(),
            diff_meta: Some(DiffMetaConfig {
                fail_on_change: true,
                ..DiffMetaConfig::default()
            }),
            ..Config::default()
        };
        let mut env = env_for(cfg);
        let detail = ValueDiff::compute(&json!({"x": 1}), &json!({"x": 2})).into_detail(
            "a",
            "a.thoth.yaml",
            DiffFormat::Summary,
        );
        env.meta.diff_report = Some(DiffReport::build(
            DiffFormat::Summary,
            DiffOnly::All,
            1,
            1,
            vec![detail],
            vec![],
        ));
        if errors {
            env.push_error(EnvelopeError::new("parse-validate-yaml", Some("b.thoth.yaml"), "bad"));
        }
        env
    }

    #[test]
    fn drift_and_exec_errors_under_fail_on_change() {
        let d = evaluate(&drift_env(false), None);
        assert_eq!(d.status, ExitStatus::Drift);
        assert_eq!(d.code(), 3);

        let d = evaluate(&drift_env(true), None);
        assert_eq!(d.status, ExitStatus::ExecError);
        assert_eq!(d.message.as_deref(), Some("execution errors"));
    }
}
