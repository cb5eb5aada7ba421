// src/sandbox/mod.rs

//! Embedded Lua sandbox for inline scripts.
//!
//! - [`policy`]: violation tokens, the static cost estimate, result sizing
//!   and fragment wrapping.
//! - [`convert`]: host ↔ Lua value translation.
//! - [`rng`]: per-locator deterministic `math.random`.
//! - [`runtime`]: one bounded evaluation in a fresh state.

pub mod convert;
pub mod policy;
pub mod rng;
pub mod runtime;

pub use policy::{Violation, wrap_fragment};
pub use runtime::{SandboxFailure, ScriptCall, evaluate, run_script};
