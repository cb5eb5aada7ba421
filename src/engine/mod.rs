// src/engine/mod.rs

//! Stage runtime for thoth.
//!
//! This module ties together:
//! - the ambient context handed to stages (cancellation, progress, deps)
//! - the process-wide stage registry
//! - the bounded, order-preserving worker pool
//! - the error-mode policy for per-record stages
//! - the driver that plans and runs an action
//! - the exit-rule evaluator

pub mod context;
pub mod driver;
pub mod exit;
pub mod parallel;
pub mod policy;
pub mod registry;

pub use context::{CancelToken, Deps, ProgressReporter, SharedWriter, StageContext};
pub use driver::{RunOutcome, plan, plan_for, run_pipeline};
pub use exit::{ExitDecision, ExitStatus, evaluate};
pub use parallel::run_indexed;
pub use policy::{FailurePolicy, Step, map_records};
pub use registry::{Registry, StageFn, StageFuture, registry};
