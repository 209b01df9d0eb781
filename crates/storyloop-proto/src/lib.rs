//! # storyloop-proto
//!
//! Shared types and pipeline primitives for the Storyloop runner.
//!
//! This crate provides the foundational abstractions used across all
//! Storyloop crates, including:
//! - ANSI classification (`strip_ansi`/`has_ansi`) for dual-output handling
//! - The structured `PtyEvent` type consumed by UI and logging collaborators
//! - The channel-based `EventEmitter` that broadcasts events in order
//! - Common error types

mod ansi;
mod emitter;
mod error;
mod event;

pub use ansi::{has_ansi, strip_ansi};
pub use emitter::EventEmitter;
pub use error::{Error, Result};
pub use event::{PtyEvent, PtyEventKind};
