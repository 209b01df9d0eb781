//! Single-iteration execution.
//!
//! One iteration is the end-to-end life of one hosted CLI invocation:
//! spawn under a PTY, fan output through the dual-output splitter and the
//! event emitter, wait for exit (or enforce the iteration timeout through
//! the shutdown coordinator), then classify the clean output. Iterations
//! are strictly sequential - one runner hosts one child, and the driver
//! decides whether to spawn another.

use crate::classify::{ErrorKind, classify};
use crate::config::RunnerConfig;
use crate::signals::OutputSignal;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use storyloop_proto::{EventEmitter, PtyEvent};
use storyloop_pty::{
    DualOutputSplitter, ProcessEvent, PtyProcess, ShutdownConfig, ShutdownResult,
    SignalCoordinator, SignalKind, SpawnOptions,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Errors fatal to an iteration before any output existed.
#[derive(Debug, Error)]
pub enum IterationError {
    /// The command never started. Not retried here - whether to retry the
    /// whole iteration is the driver's call.
    #[error(transparent)]
    Spawn(#[from] storyloop_proto::Error),
}

/// Everything the driver needs to schedule the next iteration.
#[derive(Debug)]
pub struct IterationReport {
    /// Exit code, when an exit was observed.
    pub exit_code: Option<i32>,
    /// Clean exit (code zero, no timeout).
    pub success: bool,
    /// Raw output with ANSI preserved, as the display channel saw it.
    pub display_output: String,
    /// ANSI-stripped output, as the file channel saw it.
    pub clean_output: String,
    /// Classified failure, derived from the clean output of a failed run.
    pub error: Option<ErrorKind>,
    /// Completion/blocked signal detected in the clean output.
    pub signal: OutputSignal,
    /// Whether the iteration timeout fired.
    pub timed_out: bool,
    /// Shutdown outcome, present when the coordinator had to run.
    pub shutdown: Option<ShutdownResult>,
    /// Wall-clock duration of the iteration.
    pub duration: Duration,
}

/// Hosts one CLI invocation and runs its output pipeline.
///
/// Subscribers for events and output channels attach before
/// [`run`](Self::run); the runner is consumed by the run, one child per
/// runner.
pub struct IterationRunner {
    options: SpawnOptions,
    shutdown_config: ShutdownConfig,
    timeout: Option<Duration>,
    emitter: EventEmitter,
    splitter: Arc<Mutex<DualOutputSplitter>>,
}

impl IterationRunner {
    /// Creates a runner for `options` with default bounds.
    pub fn new(options: SpawnOptions) -> Self {
        Self {
            options,
            shutdown_config: ShutdownConfig::default(),
            timeout: None,
            emitter: EventEmitter::new(),
            splitter: Arc::new(Mutex::new(DualOutputSplitter::new())),
        }
    }

    /// Creates a runner with geometry, timeout, and shutdown bounds taken
    /// from `config`.
    pub fn from_config(options: SpawnOptions, config: &RunnerConfig) -> Self {
        let options = SpawnOptions {
            cols: config.cols,
            rows: config.rows,
            term: config.term.clone(),
            ..options
        };
        Self {
            options,
            shutdown_config: config.shutdown_config(),
            timeout: config.iteration_timeout(),
            emitter: EventEmitter::new(),
            splitter: Arc::new(Mutex::new(DualOutputSplitter::new())),
        }
    }

    /// Overrides the iteration timeout.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Subscribes to structured PTY events (consumed by UI and logging).
    pub fn events(&mut self) -> mpsc::UnboundedReceiver<PtyEvent> {
        self.emitter.subscribe()
    }

    /// Subscribes to the raw display channel.
    pub fn display_stream(&mut self) -> mpsc::UnboundedReceiver<String> {
        self.splitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe_display()
    }

    /// Subscribes to the ANSI-stripped file channel.
    pub fn file_stream(&mut self) -> mpsc::UnboundedReceiver<String> {
        self.splitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe_file()
    }

    /// Runs the iteration to completion.
    ///
    /// `interrupt` carries externally requested termination (Ctrl+C at the
    /// top level); when it fires, the child is shut down through the
    /// coordinator with the given signal.
    pub async fn run(
        mut self,
        mut interrupt: tokio::sync::watch::Receiver<Option<SignalKind>>,
    ) -> Result<IterationReport, IterationError> {
        let started = Instant::now();

        // Internal taps on both channels feed the report's output fields.
        let mut display_rx = self.display_stream();
        let mut file_rx = self.file_stream();

        let (process, mut events) = match PtyProcess::spawn(&self.options) {
            Ok(spawned) => spawned,
            Err(e) => {
                // Spawn failure is an error event, never a fake exit.
                self.emitter.emit_error(&e.to_string());
                return Err(e.into());
            }
        };
        info!(command = %self.options.command, pid = ?process.pid(), "iteration started");
        let mut coordinator = SignalCoordinator::with_config(
            process.controller(),
            Arc::clone(&self.splitter),
            self.shutdown_config.clone(),
        );

        let timeout_limit = self.timeout;
        let timeout = async move {
            match timeout_limit {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout);

        let mut stream = StreamState::default();
        let mut timed_out = false;
        let mut shutdown: Option<ShutdownResult> = None;
        let mut interrupt_open = true;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        match &event {
                            ProcessEvent::Data(bytes) => {
                                let text = String::from_utf8_lossy(bytes);
                                self.splitter
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .push(&text);
                                self.emitter.emit_data(&text);
                            }
                            ProcessEvent::Error(message) => {
                                warn!(error = %message, "pty stream error");
                                self.emitter.emit_error(message);
                            }
                            ProcessEvent::Eof | ProcessEvent::Exit(_) => {}
                        }
                        if stream.observe(&event) {
                            if let Some(code) = stream.exit_code {
                                self.emitter.emit_exit(code, None);
                            }
                            break;
                        }
                    }
                    None => break,
                },
                () = &mut timeout => {
                    warn!(
                        timeout_secs = timeout_limit.map_or(0, |d| d.as_secs()),
                        "iteration timeout, terminating child"
                    );
                    timed_out = true;
                    let result = coordinator.send_signal(SignalKind::Terminate).await;
                    stream.exit_code = result.exit_code;
                    shutdown = Some(result);
                    drain_after_shutdown(&mut events, &mut self, &mut stream.exit_code).await;
                    break;
                }
                changed = interrupt.changed(), if interrupt_open => match changed {
                    Ok(()) => {
                        if let Some(signal) = *interrupt.borrow() {
                            info!(signal = %signal, "interrupt requested, shutting down child");
                            let result = coordinator.send_signal(signal).await;
                            stream.exit_code = result.exit_code;
                            shutdown = Some(result);
                            drain_after_shutdown(&mut events, &mut self, &mut stream.exit_code).await;
                            break;
                        }
                    }
                    Err(_) => interrupt_open = false,
                },
            }
        }

        // Seal the splitter so the taps observe end-of-stream. A no-op when
        // the coordinator already closed it.
        self.splitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();

        let display_output = drain_text(&mut display_rx);
        let clean_output = drain_text(&mut file_rx);

        let exit_code = stream.exit_code;
        let success = exit_code == Some(0) && !timed_out;
        // The generic "error" fallback is too eager on prose, so only
        // failed runs are classified - same gate the exit status gives the
        // original behavior.
        let error = if success { None } else { classify(&clean_output) };
        let signal = OutputSignal::detect(&clean_output);

        debug!(
            exit_code,
            success,
            timed_out,
            error = error.map(|k| k.to_string()),
            "iteration finished"
        );

        Ok(IterationReport {
            exit_code,
            success,
            display_output,
            clean_output,
            error,
            signal,
            timed_out,
            shutdown,
            duration: started.elapsed(),
        })
    }
}

/// Tracks end-of-stream for one child across its two producer threads
/// (reader and waiter). The pump is done when the exit code is known and
/// the reader has ended, or when the surviving producers can no longer
/// deliver either of those.
#[derive(Debug, Default)]
struct StreamState {
    exit_code: Option<i32>,
    eof: bool,
    failed: bool,
}

impl StreamState {
    /// Records `event` and returns whether the event stream is finished.
    ///
    /// Each producer thread ends with exactly one terminal event: the
    /// reader with `Eof` or `Error`, the waiter with `Exit` or `Error`. An
    /// `Error` paired with `Eof` therefore means the waiter is gone and no
    /// exit code will ever arrive; two `Error`s mean both producers died.
    /// Waiting past either point would pend forever.
    fn observe(&mut self, event: &ProcessEvent) -> bool {
        match event {
            ProcessEvent::Data(_) => {}
            ProcessEvent::Eof => self.eof = true,
            ProcessEvent::Exit(code) => self.exit_code = Some(*code),
            ProcessEvent::Error(_) => {
                if self.failed {
                    return true;
                }
                self.failed = true;
            }
        }
        (self.eof || self.failed) && (self.exit_code.is_some() || (self.eof && self.failed))
    }
}

/// Overall bound on the post-shutdown drain. Keeps `run` from being held
/// open by a child that survived SIGKILL and is still writing.
const SHUTDOWN_DRAIN_LIMIT: Duration = Duration::from_millis(500);

/// After the coordinator ran, the event channel may still hold buffered
/// chunks and the exit notification; drain them briefly so no output is
/// lost to the shutdown. The splitter is already sealed, so pushes are
/// no-ops - chunks go straight to the emitter for subscribers.
async fn drain_after_shutdown(
    events: &mut mpsc::UnboundedReceiver<ProcessEvent>,
    runner: &mut IterationRunner,
    exit_code: &mut Option<i32>,
) {
    let mut trailing = String::new();
    let _ = tokio::time::timeout(SHUTDOWN_DRAIN_LIMIT, async {
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Data(bytes) => {
                    trailing.push_str(&String::from_utf8_lossy(&bytes));
                }
                ProcessEvent::Exit(code) => {
                    *exit_code = Some(code);
                }
                ProcessEvent::Eof | ProcessEvent::Error(_) => break,
            }
        }
    })
    .await;
    if let Some(code) = *exit_code {
        let final_text = (!trailing.is_empty()).then_some(trailing);
        runner.emitter.emit_exit(code, final_text);
    }
}

/// Drains everything currently buffered on a text channel.
fn drain_text(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    let mut out = String::new();
    while let Ok(chunk) = rx.try_recv() {
        out.push_str(&chunk);
    }
    out
}
