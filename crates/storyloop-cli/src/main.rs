//! # storyloop-cli
//!
//! Binary entry point for the Storyloop runner.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Application initialization and configuration
//! - The outer iteration loop with retry and signal handling

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{IsTerminal, Write, stdout};
use std::path::PathBuf;
use std::time::Instant;
use storyloop_core::{IterationRunner, OutputSignal, RetryDecision, RetryState, RunnerConfig};
use storyloop_pty::{SignalKind, SpawnOptions};
use tokio::sync::watch;
use tracing::{debug, info, warn};

// Unix-specific process management for process group leadership
#[cfg(unix)]
mod process_management {
    use nix::unistd::{Pid, setpgid};
    use tracing::debug;

    /// Sets up process group leadership so spawned CLI children belong to
    /// our group and cannot be orphaned by an outer kill.
    pub fn setup_process_group() {
        let pid = Pid::this();
        if let Err(e) = setpgid(pid, pid) {
            // EPERM means we already lead a group (e.g. started from a shell)
            if e != nix::errno::Errno::EPERM {
                debug!("Note: Could not set process group ({}), continuing anyway", e);
            }
        }
        debug!("Process group initialized: PID {}", pid);
    }
}

#[cfg(not(unix))]
mod process_management {
    /// No-op on non-Unix platforms.
    pub fn setup_process_group() {}
}

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Returns true if colors should be used based on mode and terminal detection.
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// ANSI color codes for terminal output.
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
}

/// Storyloop - PTY-backed iteration runner for autonomous coding loops
#[derive(Parser, Debug)]
#[command(name = "storyloop", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "storyloop.json", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command in iterations until it signals completion
    Run(RunArgs),
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug)]
struct RunArgs {
    /// Command to run, with its arguments (everything after `--`)
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,

    /// Maximum number of iterations before giving up
    #[arg(long, default_value_t = 100)]
    max_iterations: u32,

    /// Override the per-iteration timeout in seconds (0 disables it)
    #[arg(long)]
    timeout: Option<u64>,

    /// Append structured events to this file as JSON lines
    #[arg(long)]
    events_file: Option<PathBuf>,

    /// Working directory for the command
    #[arg(long)]
    cwd: Option<PathBuf>,
}

/// Why the iteration loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopOutcome {
    /// Completion signal detected in the output.
    Completed,
    /// Blocked signal detected; manual intervention needed.
    Blocked,
    /// Retry ceiling reached for a recurring error.
    RetriesExhausted,
    /// Iteration budget spent without a completion signal.
    MaxIterations,
    /// Interrupted by signal (Ctrl+C, SIGTERM, SIGHUP).
    Interrupted,
}

impl LoopOutcome {
    fn exit_code(self) -> i32 {
        match self {
            LoopOutcome::Completed => 0,
            LoopOutcome::Blocked | LoopOutcome::RetriesExhausted | LoopOutcome::MaxIterations => 1,
            LoopOutcome::Interrupted => 130,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run(args) => {
            let outcome = run_command(cli.config, cli.color, args).await?;
            let exit_code = outcome.exit_code();
            // Use explicit exit for non-zero codes to ensure proper exit status
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
            Ok(())
        }
    }
}

async fn run_command(config_path: PathBuf, color_mode: ColorMode, args: RunArgs) -> Result<LoopOutcome> {
    // Children belong to our process group so signals fan out to them
    process_management::setup_process_group();

    let mut config = RunnerConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Apply CLI overrides after loading so they take final precedence
    if let Some(timeout) = args.timeout {
        config.iteration_timeout_secs = timeout;
    }

    let use_colors = color_mode.should_use_colors();
    let policy = config.retry_policy();

    // Signal handling: the watch carries the signal to forward to the
    // child; the iteration runner drives the shutdown sequence with it.
    let (interrupt_tx, interrupt_rx) = watch::channel(None::<SignalKind>);
    spawn_signal_listeners(&interrupt_tx);

    let (program, program_args) = args
        .command
        .split_first()
        .context("No command given")?;

    let mut events_log = match args.events_file {
        Some(ref path) => Some(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open events file {:?}", path))?,
        ),
        None => None,
    };

    info!(command = %program, max_iterations = args.max_iterations, "starting iteration loop");

    let started = Instant::now();
    let mut retry_state = RetryState::new();

    for iteration in 1..=args.max_iterations {
        print_iteration_separator(iteration, args.max_iterations, started.elapsed(), use_colors);

        let mut options = SpawnOptions::new(program.clone()).args(program_args.iter().cloned());
        if let Some(ref dir) = args.cwd {
            options = options.cwd(dir.clone());
        }

        let mut runner = IterationRunner::from_config(options, &config);

        // Mirror the raw display stream to our stdout as it arrives
        let mut display_rx = runner.display_stream();
        let echo = tokio::spawn(async move {
            let mut out = stdout();
            while let Some(chunk) = display_rx.recv().await {
                let _ = out.write_all(chunk.as_bytes());
                let _ = out.flush();
            }
        });

        // Structured events go to the JSONL file when requested
        let mut events_rx = runner.events();
        let event_sink = events_log.take().map(|mut file| {
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(line) => {
                            if let Err(e) = writeln!(file, "{line}") {
                                warn!("Failed to write event: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to serialize event: {}", e),
                    }
                }
                file
            })
        });

        let report = runner.run(interrupt_rx.clone()).await?;

        let _ = echo.await;
        if let Some(sink) = event_sink {
            if let Ok(file) = sink.await {
                events_log = Some(file);
            }
        }

        debug!(
            iteration,
            exit_code = report.exit_code,
            success = report.success,
            duration_ms = report.duration.as_millis() as u64,
            "iteration finished"
        );

        // An interrupt that reached the runner ends the loop outright
        if interrupt_rx.borrow().is_some() {
            print_outcome(LoopOutcome::Interrupted, iteration, started.elapsed(), use_colors);
            return Ok(LoopOutcome::Interrupted);
        }

        match report.signal {
            OutputSignal::Blocked => {
                print_outcome(LoopOutcome::Blocked, iteration, started.elapsed(), use_colors);
                return Ok(LoopOutcome::Blocked);
            }
            OutputSignal::Completed => {
                info!("Completion signal detected at iteration {}", iteration);
                print_outcome(LoopOutcome::Completed, iteration, started.elapsed(), use_colors);
                return Ok(LoopOutcome::Completed);
            }
            OutputSignal::None => {}
        }

        if report.success {
            retry_state.record_success();
            continue;
        }

        // Failed iteration: classify and consult the retry policy
        let Some(kind) = report.error else {
            // Failure with no recognizable error text; treat as one more
            // iteration rather than a retry of a known condition
            retry_state.record_success();
            continue;
        };

        match retry_state.record_failure(kind, &policy) {
            RetryDecision::Retry { cooldown } => {
                warn!(
                    error = %kind,
                    attempt = retry_state.attempts(),
                    cooldown_secs = cooldown.as_secs(),
                    "iteration failed, retrying after cooldown"
                );
                tokio::time::sleep(cooldown).await;
            }
            RetryDecision::GiveUp => {
                warn!(error = %kind, attempts = retry_state.attempts(), "retry ceiling reached");
                print_outcome(LoopOutcome::RetriesExhausted, iteration, started.elapsed(), use_colors);
                return Ok(LoopOutcome::RetriesExhausted);
            }
        }
    }

    print_outcome(
        LoopOutcome::MaxIterations,
        args.max_iterations,
        started.elapsed(),
        use_colors,
    );
    Ok(LoopOutcome::MaxIterations)
}

/// Registers the signal listeners. SIGINT and SIGTERM forward a graceful
/// signal to the child through the watch; SIGHUP forwards SIGHUP.
fn spawn_signal_listeners(interrupt_tx: &watch::Sender<Option<SignalKind>>) {
    let tx = interrupt_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received (SIGINT), shutting down child...");
            let _ = tx.send(Some(SignalKind::Interrupt));
        }
    });

    #[cfg(unix)]
    {
        let tx = interrupt_tx.clone();
        tokio::spawn(async move {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
            sigterm.recv().await;
            warn!("SIGTERM received, shutting down child...");
            let _ = tx.send(Some(SignalKind::Terminate));
        });

        let tx = interrupt_tx.clone();
        tokio::spawn(async move {
            let mut sighup =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to register SIGHUP handler: {}", e);
                        return;
                    }
                };
            sighup.recv().await;
            warn!("SIGHUP received (terminal closed), shutting down child...");
            let _ = tx.send(Some(SignalKind::Hangup));
        });
    }
}

/// Prints the iteration demarcation separator so users can visually
/// distinguish where one iteration ends and another begins.
fn print_iteration_separator(
    iteration: u32,
    max_iterations: u32,
    elapsed: std::time::Duration,
    use_colors: bool,
) {
    use colors::*;

    let content = format!(
        " ITERATION {} │ {} elapsed │ {}/{}",
        iteration,
        format_elapsed(elapsed),
        iteration,
        max_iterations
    );
    let separator = "═".repeat(79);

    if use_colors {
        println!("\n{BOLD}{CYAN}{separator}{RESET}");
        println!("{BOLD}{CYAN}{content}{RESET}");
        println!("{BOLD}{CYAN}{separator}{RESET}");
    } else {
        println!("\n{separator}");
        println!("{content}");
        println!("{separator}");
    }
}

fn print_outcome(
    outcome: LoopOutcome,
    iterations: u32,
    elapsed: std::time::Duration,
    use_colors: bool,
) {
    use colors::*;

    let (color, icon, label) = match outcome {
        LoopOutcome::Completed => (GREEN, "✓", "Completion signal detected"),
        LoopOutcome::Blocked => (RED, "✗", "Blocked; manual intervention needed"),
        LoopOutcome::RetriesExhausted => (RED, "✗", "Retry ceiling reached"),
        LoopOutcome::MaxIterations => (YELLOW, "⚠", "Maximum iterations reached"),
        LoopOutcome::Interrupted => (YELLOW, "⚡", "Interrupted by signal"),
    };

    let separator = "─".repeat(58);

    if use_colors {
        println!("\n{BOLD}┌{separator}┐{RESET}");
        println!("{BOLD}│{RESET} {color}{BOLD}{icon}{RESET} Loop terminated: {color}{label}{RESET}");
        println!("{BOLD}├{separator}┤{RESET}");
        println!("{BOLD}│{RESET}   Iterations:  {CYAN}{}{RESET}", iterations);
        println!(
            "{BOLD}│{RESET}   Elapsed:     {CYAN}{}{RESET}",
            format_elapsed(elapsed)
        );
        println!("{BOLD}└{separator}┘{RESET}");
    } else {
        println!("\n+{}+", "-".repeat(58));
        println!("| {icon} Loop terminated: {label}");
        println!("+{}+", "-".repeat(58));
        println!("|   Iterations:  {}", iterations);
        println!("|   Elapsed:     {}", format_elapsed(elapsed));
        println!("+{}+", "-".repeat(58));
    }
}

/// Formats elapsed duration as human-readable string.
fn format_elapsed(d: std::time::Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
