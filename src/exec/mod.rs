// src/exec/mod.rs

//! Per-record subprocess execution.
//!
//! - [`template`] renders `argsTemplate` with the `{json}` placeholder.
//! - [`shell`] runs the process with capture caps, timeout escalation and
//!   optional process-group kill, using `tokio::process::Command`.

pub mod shell;
pub mod template;

pub use shell::{CommandSpec, EXIT_START_FAILED, EXIT_TIMED_OUT, run_command};
pub use template::render_args;
