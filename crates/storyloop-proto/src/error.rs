//! Common error types for the Storyloop crates.

use thiserror::Error;

/// Errors surfaced by the PTY pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// PTY allocation failed before a child existed.
    #[error("failed to open pty: {0}")]
    PtyOpen(String),

    /// The command could not be spawned (not found, permission denied).
    /// This occurs instead of, not in addition to, a normal exit.
    #[error("failed to spawn command: {0}")]
    Spawn(String),

    /// Writing input to the child failed.
    #[error("failed to write to pty: {0}")]
    Write(#[from] std::io::Error),

    /// Resizing the terminal failed.
    #[error("failed to resize pty: {0}")]
    Resize(String),

    /// Delivering a signal to the child failed.
    #[error("failed to signal process: {0}")]
    Signal(String),

    /// The child exited before the operation could complete.
    #[error("process has already exited")]
    ProcessExited,
}

/// Convenience alias used across the Storyloop crates.
pub type Result<T> = std::result::Result<T, Error>;
