//! # storyloop-core
//!
//! Iteration semantics for the Storyloop runner.
//!
//! This crate provides:
//! - Error classification of combined CLI output into a retry taxonomy
//! - The retry policy (per-kind ceilings and cooldowns) and explicit
//!   retry state threaded through the iteration driver
//! - Completion/blocked signal detection on assistant output
//! - Runner configuration loaded from JSON over defaults
//! - The single-iteration runner wiring the PTY pipeline end to end

mod classify;
mod config;
mod iteration;
mod policy;
mod signals;

pub use classify::{ErrorKind, classify};
pub use config::{ConfigError, RetrySettings, RunnerConfig};
pub use iteration::{IterationError, IterationReport, IterationRunner};
pub use policy::{RetryDecision, RetryPolicy, RetryState};
pub use signals::{
    OutputSignal, has_all_blocked_promise, has_blocked_signal, has_complete_promise,
    has_completion_signal,
};
