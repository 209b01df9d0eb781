//! PTY process hosting.
//!
//! Spawns a command under a pseudo-terminal via `portable-pty`, so the
//! hosted CLI keeps its rich terminal behavior (colors, spinners, cursor
//! animation), and multiplexes the PTY byte stream to any number of
//! subscribers as a tagged event union.
//!
//! Architecture:
//! - A blocking reader thread drains the PTY master and forwards chunks.
//! - A wait thread polls `try_wait` and publishes the exit code, both to
//!   subscribers and to a `watch` channel that shutdown logic can race
//!   against a timer.
//! - Signals are delivered by pid via `nix`, never through the reader.

// Exit codes and PIDs are always within i32 range in practice
#![allow(clippy::cast_possible_wrap)]

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use storyloop_proto::{Error, Result};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Signals the runner knows how to deliver to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Interrupt (Ctrl+C), exit code 130 by convention.
    Interrupt,
    /// Termination request, exit code 143 by convention. The default.
    Terminate,
    /// Forceful kill, exit code 137 by convention. Cannot be trapped.
    Kill,
    /// Hangup.
    Hangup,
}

impl SignalKind {
    /// True for signals the child cannot catch; these skip any grace wait.
    pub fn is_forceful(self) -> bool {
        matches!(self, SignalKind::Kill)
    }

    fn as_nix(self) -> Signal {
        match self {
            SignalKind::Interrupt => Signal::SIGINT,
            SignalKind::Terminate => Signal::SIGTERM,
            SignalKind::Kill => Signal::SIGKILL,
            SignalKind::Hangup => Signal::SIGHUP,
        }
    }
}

impl Default for SignalKind {
    fn default() -> Self {
        SignalKind::Terminate
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SignalKind::Interrupt => "SIGINT",
            SignalKind::Terminate => "SIGTERM",
            SignalKind::Kill => "SIGKILL",
            SignalKind::Hangup => "SIGHUP",
        };
        f.write_str(name)
    }
}

/// Options for spawning a command under a PTY.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Executable to run.
    pub command: String,
    /// Argument list.
    pub args: Vec<String>,
    /// Working directory; inherits the current directory when `None`.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables, applied over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Terminal width.
    pub cols: u16,
    /// Terminal height.
    pub rows: u16,
    /// Terminal type advertised to the child via `TERM`.
    pub term: String,
}

impl SpawnOptions {
    /// Creates options for `command` with default terminal geometry (80x30).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            cols: 80,
            rows: 30,
            term: "xterm-256color".to_string(),
        }
    }

    /// Sets the argument list.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the terminal size.
    pub fn size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }
}

/// Raw notifications from a hosted process, delivered to every subscriber.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Output chunk read from the PTY. No boundary guarantees; a chunk is
    /// whatever one read returned.
    Data(Vec<u8>),
    /// The PTY reached end of stream; no further `Data` will follow.
    /// Consumers that need the exit code keep waiting for `Exit`.
    Eof,
    /// The child exited with this code.
    Exit(i32),
    /// Reading from the PTY failed.
    Error(String),
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<ProcessEvent>>>>;

fn fan_out(subscribers: &Subscribers, event: &ProcessEvent) {
    let mut subs = subscribers
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    subs.retain(|tx| tx.send(event.clone()).is_ok());
}

/// A command running under a pseudo-terminal.
///
/// Owns the child for its lifetime; exactly one process per instance.
/// Output and exit notifications reach subscribers registered via
/// [`subscribe`](Self::subscribe); termination goes through
/// [`send_signal`](Self::send_signal) or a [`PtyController`].
pub struct PtyProcess {
    master: Box<dyn portable_pty::MasterPty + Send>,
    writer: Mutex<Box<dyn Write + Send>>,
    pid: Option<u32>,
    subscribers: Subscribers,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl PtyProcess {
    /// Spawns `options.command` under a fresh PTY.
    ///
    /// Returns the process together with its primary event subscription,
    /// registered before the reader starts so the very first chunk cannot
    /// be missed. Spawn failures (command not found, permission denied)
    /// surface as an `Err` here - there is no exit event for an invocation
    /// that never started.
    pub fn spawn(options: &SpawnOptions) -> Result<(Self, mpsc::UnboundedReceiver<ProcessEvent>)> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::PtyOpen(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&options.command);
        cmd.args(&options.args);
        cmd.env("TERM", &options.term);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = options.cwd {
            cmd.cwd(dir);
        } else {
            let cwd = std::env::current_dir().map_err(|e| Error::Spawn(e.to_string()))?;
            cmd.cwd(&cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Spawn(e.to_string()))?;
        let pid = child.process_id();
        debug!(command = %options.command, pid, "spawned pty child");

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::PtyOpen(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::PtyOpen(e.to_string()))?;

        // Drop the slave to signal EOF when the master closes
        drop(pair.slave);

        let (primary_tx, primary_rx) = mpsc::unbounded_channel();
        let subscribers: Subscribers = Arc::new(Mutex::new(vec![primary_tx]));
        let (exit_tx, exit_rx) = watch::channel(None);

        Self::start_reader(reader, Arc::clone(&subscribers));
        Self::start_waiter(child, Arc::clone(&subscribers), exit_tx);

        Ok((
            Self {
                master: pair.master,
                writer: Mutex::new(writer),
                pid,
                subscribers,
                exit_rx,
            },
            primary_rx,
        ))
    }

    /// Blocking reader thread draining the PTY master.
    fn start_reader(mut reader: Box<dyn Read + Send>, subscribers: Subscribers) {
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("pty reader: EOF");
                        fan_out(&subscribers, &ProcessEvent::Eof);
                        break;
                    }
                    Ok(n) => {
                        fan_out(&subscribers, &ProcessEvent::Data(buf[..n].to_vec()));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        warn!(error = %e, "pty reader error");
                        fan_out(&subscribers, &ProcessEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
        });
    }

    /// Wait thread polling for child exit.
    fn start_waiter(
        mut child: Box<dyn portable_pty::Child + Send>,
        subscribers: Subscribers,
        exit_tx: watch::Sender<Option<i32>>,
    ) {
        std::thread::spawn(move || {
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        let code = status.exit_code() as i32;
                        debug!(exit_code = code, "pty child exited");
                        // Publish to the watch first so shutdown races see the
                        // exit no later than event subscribers do.
                        let _ = exit_tx.send(Some(code));
                        fan_out(&subscribers, &ProcessEvent::Exit(code));
                        break;
                    }
                    Ok(None) => {
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    Err(e) => {
                        warn!(error = %e, "try_wait failed");
                        fan_out(&subscribers, &ProcessEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
        });
    }

    /// Registers a subscriber for process events.
    ///
    /// Every subscriber receives every event from registration onward, in
    /// the order the underlying callbacks fired.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProcessEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Injects input (including control characters) into the child's tty.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Resizes the pseudo-terminal.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Resize(e.to_string()))
    }

    /// Delivers a signal to the child.
    ///
    /// May be called repeatedly; the effect observed is that of the last
    /// signal delivered (a SIGKILL after a SIGINT supersedes it). Signaling
    /// an already-reaped process is a no-op.
    pub fn send_signal(&self, signal: SignalKind) -> Result<()> {
        deliver_signal(self.pid, signal)
    }

    /// OS process id of the child, when the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Watch channel that resolves to the exit code once the child is gone.
    pub fn exit_watch(&self) -> watch::Receiver<Option<i32>> {
        self.exit_rx.clone()
    }

    /// Detaches a clonable control handle (signal delivery + exit watch)
    /// for the shutdown coordinator.
    pub fn controller(&self) -> PtyController {
        PtyController {
            pid: self.pid,
            exit_rx: self.exit_rx.clone(),
        }
    }
}

/// Clonable control surface for a [`PtyProcess`]: signal delivery and exit
/// observation, without ownership of the streams.
#[derive(Clone)]
pub struct PtyController {
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl PtyController {
    /// Delivers a signal to the child. Same semantics as
    /// [`PtyProcess::send_signal`].
    pub fn send_signal(&self, signal: SignalKind) -> Result<()> {
        deliver_signal(self.pid, signal)
    }

    /// Watch channel carrying the exit code once known.
    pub fn exit_watch(&self) -> watch::Receiver<Option<i32>> {
        self.exit_rx.clone()
    }
}

fn deliver_signal(pid: Option<u32>, signal: SignalKind) -> Result<()> {
    let Some(pid) = pid else {
        return Err(Error::ProcessExited);
    };
    debug!(pid, signal = %signal, "delivering signal");
    match kill(Pid::from_raw(pid as i32), signal.as_nix()) {
        Ok(()) => Ok(()),
        // Already gone: the exit watch will carry the real exit code.
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::Signal(e.to_string())),
    }
}
