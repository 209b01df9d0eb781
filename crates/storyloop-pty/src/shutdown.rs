//! Signal-driven shutdown coordination.
//!
//! Terminating a hosted CLI has to be deterministic under signal pressure:
//! forward the signal, give the child a bounded grace period to exit on its
//! own, escalate to SIGKILL if it does not, and only then seal the output
//! streams so no buffered chunk is lost to the close. The whole sequence is
//! a small state machine:
//!
//! ```text
//! Running -> SignalSent -> (GracefulExit | ForceKillSent -> ForcedExit)
//!         -> StreamsClosing -> Closed
//! ```
//!
//! The grace period is an explicit race between the exit watch and a timer;
//! whichever resolves first wins and the loser is irrelevant.

use crate::process::{PtyController, SignalKind};
use crate::splitter::DualOutputSplitter;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use storyloop_proto::Result;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Control surface the coordinator needs from a process: signal delivery
/// and exit observation. `PtyController` implements it for real children;
/// tests substitute fakes.
pub trait ProcessControl {
    /// Delivers a signal to the process.
    fn deliver(&self, signal: SignalKind) -> Result<()>;

    /// Watch channel resolving to the exit code once the process is gone.
    fn exit_watch(&self) -> watch::Receiver<Option<i32>>;
}

impl ProcessControl for PtyController {
    fn deliver(&self, signal: SignalKind) -> Result<()> {
        self.send_signal(signal)
    }

    fn exit_watch(&self) -> watch::Receiver<Option<i32>> {
        PtyController::exit_watch(self)
    }
}

/// Bounds for the shutdown sequence.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// How long a signaled child may take to exit voluntarily.
    pub grace_period: Duration,
    /// Secondary bound after SIGKILL. If the child is still unreaped after
    /// this, shutdown resolves with `success = false` rather than hanging.
    pub kill_wait: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(2),
            kill_wait: Duration::from_secs(1),
        }
    }
}

/// Observable state of a shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// No termination requested yet.
    Running,
    /// Graceful signal delivered; grace period running.
    SignalSent,
    /// The child exited within the grace period.
    GracefulExit,
    /// Grace period expired (or SIGKILL was requested directly).
    ForceKillSent,
    /// Exit observed after the forceful kill.
    ForcedExit,
    /// Output streams are being sealed.
    StreamsClosing,
    /// Shutdown complete.
    Closed,
}

/// Outcome of one shutdown sequence, produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ShutdownResult {
    /// Whether the process exited at all. `false` means even SIGKILL did
    /// not produce an observable exit within bounds - fatal to the
    /// iteration, surfaced to the caller, never swallowed.
    pub success: bool,
    /// Exit code, when an exit was observed.
    pub exit_code: Option<i32>,
    /// True iff the child exited within the grace period without a
    /// forceful kill. A direct SIGKILL request is never graceful.
    pub graceful: bool,
    /// Whether both output channels were sealed.
    pub streams_closed: bool,
}

/// Drives the shutdown state machine for one process.
///
/// The coordinator exclusively owns the kill handle for the process's
/// lifetime; no other component delivers signals once it exists.
pub struct SignalCoordinator<P: ProcessControl> {
    process: P,
    splitter: Arc<Mutex<DualOutputSplitter>>,
    config: ShutdownConfig,
    phase: ShutdownPhase,
}

impl<P: ProcessControl> SignalCoordinator<P> {
    /// Creates a coordinator over a process and the splitter it must seal.
    pub fn new(process: P, splitter: Arc<Mutex<DualOutputSplitter>>) -> Self {
        Self::with_config(process, splitter, ShutdownConfig::default())
    }

    /// Creates a coordinator with explicit bounds.
    pub fn with_config(
        process: P,
        splitter: Arc<Mutex<DualOutputSplitter>>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            process,
            splitter,
            config,
            phase: ShutdownPhase::Running,
        }
    }

    /// Current state of the shutdown sequence.
    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    /// Runs the full shutdown sequence for `signal`.
    ///
    /// A graceful signal starts the grace-period race; SIGKILL skips the
    /// grace wait entirely so forced termination stays fast and
    /// predictable. Resolves within `grace_period + kill_wait` in the worst
    /// case - never hangs on a process that refuses to die.
    pub async fn send_signal(&mut self, signal: SignalKind) -> ShutdownResult {
        let mut exit_rx = self.process.exit_watch();

        if let Err(e) = self.process.deliver(signal) {
            warn!(signal = %signal, error = %e, "signal delivery failed");
        }

        let (exit_code, graceful) = if signal.is_forceful() {
            self.phase = ShutdownPhase::ForceKillSent;
            let code = wait_for_exit(&mut exit_rx, self.config.kill_wait).await;
            if code.is_some() {
                self.phase = ShutdownPhase::ForcedExit;
            }
            (code, false)
        } else {
            self.phase = ShutdownPhase::SignalSent;
            match wait_for_exit(&mut exit_rx, self.config.grace_period).await {
                Some(code) => {
                    debug!(exit_code = code, "child exited within grace period");
                    self.phase = ShutdownPhase::GracefulExit;
                    (Some(code), true)
                }
                None => {
                    debug!(grace_ms = self.config.grace_period.as_millis() as u64,
                        "grace period expired, escalating to SIGKILL");
                    self.phase = ShutdownPhase::ForceKillSent;
                    if let Err(e) = self.process.deliver(SignalKind::Kill) {
                        warn!(error = %e, "force kill delivery failed");
                    }
                    let code = wait_for_exit(&mut exit_rx, self.config.kill_wait).await;
                    if code.is_some() {
                        self.phase = ShutdownPhase::ForcedExit;
                    }
                    (code, false)
                }
            }
        };

        if exit_code.is_none() {
            warn!("process did not exit even after forced kill");
        }

        self.phase = ShutdownPhase::StreamsClosing;
        let streams_closed = self.close_streams();
        self.phase = ShutdownPhase::Closed;

        ShutdownResult {
            success: exit_code.is_some(),
            exit_code,
            graceful,
            streams_closed,
        }
    }

    /// Seals both output channels. Closing an already-closed splitter is a
    /// safe no-op; the close itself is synchronous and cannot hang.
    fn close_streams(&self) -> bool {
        let mut splitter = self
            .splitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        splitter.close();
        splitter.is_closed()
    }
}

/// Races the exit watch against a timer; first to resolve wins.
async fn wait_for_exit(
    exit_rx: &mut watch::Receiver<Option<i32>>,
    limit: Duration,
) -> Option<i32> {
    if let Some(code) = *exit_rx.borrow() {
        return Some(code);
    }
    let timer = tokio::time::sleep(limit);
    tokio::pin!(timer);
    loop {
        tokio::select! {
            () = &mut timer => return None,
            changed = exit_rx.changed() => match changed {
                Ok(()) => {
                    if let Some(code) = *exit_rx.borrow() {
                        return Some(code);
                    }
                }
                // Watch sender gone without an exit; only the timer remains.
                Err(_) => {
                    timer.as_mut().await;
                    return None;
                }
            },
        }
    }
}
