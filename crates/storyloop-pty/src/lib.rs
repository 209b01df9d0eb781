//! # storyloop-pty
//!
//! Process hosting for the Storyloop runner.
//!
//! This crate owns the only subsystem with real concurrency in Storyloop:
//! - `process` spawns a command under a pseudo-terminal and multiplexes its
//!   byte stream to subscribers, preserving rich TUI output (colors,
//!   spinners) from the hosted CLI.
//! - `splitter` forks that stream into a display channel (ANSI preserved)
//!   and a file channel (ANSI stripped).
//! - `shutdown` terminates the child deterministically under signal
//!   pressure: graceful signal, bounded grace period, SIGKILL escalation,
//!   then stream closure, without losing buffered output.

mod process;
mod shutdown;
mod splitter;

pub use process::{ProcessEvent, PtyController, PtyProcess, SignalKind, SpawnOptions};
pub use shutdown::{ProcessControl, ShutdownConfig, ShutdownPhase, ShutdownResult, SignalCoordinator};
pub use splitter::DualOutputSplitter;
