//! End-to-end iteration tests against real `/bin/sh` children.

#![cfg(unix)]

use std::time::Duration;
use storyloop_core::{ErrorKind, IterationRunner, OutputSignal};
use storyloop_proto::PtyEventKind;
use storyloop_pty::{SignalKind, SpawnOptions};
use tokio::sync::watch;

fn sh(script: &str) -> SpawnOptions {
    SpawnOptions::new("/bin/sh").args(["-c", script])
}

fn no_interrupt() -> (
    watch::Sender<Option<SignalKind>>,
    watch::Receiver<Option<SignalKind>>,
) {
    watch::channel(None)
}

#[tokio::test]
async fn test_successful_iteration_splits_output() {
    let mut runner = IterationRunner::new(sh(r"printf '\033[32mall tests pass\033[0m'; exit 0"));
    let mut display = runner.display_stream();
    let (_tx, rx) = no_interrupt();

    let report = runner.run(rx).await.expect("run");

    assert_eq!(report.exit_code, Some(0));
    assert!(report.success);
    assert!(!report.timed_out);
    assert!(report.error.is_none());
    assert_eq!(report.signal, OutputSignal::None);

    assert!(report.display_output.contains("\x1b[32m"));
    assert!(!report.clean_output.contains('\x1b'));
    assert!(report.clean_output.contains("all tests pass"));

    // External display subscribers see the same raw chunks
    let mut streamed = String::new();
    while let Ok(chunk) = display.try_recv() {
        streamed.push_str(&chunk);
    }
    assert_eq!(streamed, report.display_output);
}

#[tokio::test]
async fn test_completion_promise_detected() {
    let mut runner = IterationRunner::new(sh("echo '<promise>COMPLETE</promise>'; exit 0"));
    let (_tx, rx) = no_interrupt();

    let report = runner.run(rx).await.expect("run");

    assert!(report.success);
    assert_eq!(report.signal, OutputSignal::Completed);
}

#[tokio::test]
async fn test_blocked_wins_over_completion() {
    let mut runner = IterationRunner::new(sh(
        "echo 'story complete but BLOCKED: cannot proceed without credentials'; exit 0",
    ));
    let (_tx, rx) = no_interrupt();

    let report = runner.run(rx).await.expect("run");

    assert_eq!(report.signal, OutputSignal::Blocked);
}

#[tokio::test]
async fn test_failed_run_is_classified() {
    let mut runner = IterationRunner::new(sh("echo 'Error: 503 upstream unavailable'; exit 1"));
    let (_tx, rx) = no_interrupt();

    let report = runner.run(rx).await.expect("run");

    assert_eq!(report.exit_code, Some(1));
    assert!(!report.success);
    assert_eq!(report.error, Some(ErrorKind::ServerError));
}

#[tokio::test]
async fn test_successful_run_is_never_classified() {
    // "rate limit" appears in prose but the run succeeded
    let mut runner = IterationRunner::new(sh("echo 'documented the rate limit handling'; exit 0"));
    let (_tx, rx) = no_interrupt();

    let report = runner.run(rx).await.expect("run");

    assert!(report.success);
    assert!(report.error.is_none());
}

#[tokio::test]
async fn test_event_stream_shape_and_ordering() {
    let mut runner = IterationRunner::new(sh(r"printf '\033[31mred\033[0m'; exit 4"));
    let mut events = runner.events();
    let (_tx, rx) = no_interrupt();

    let report = runner.run(rx).await.expect("run");
    assert_eq!(report.exit_code, Some(4));

    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    assert!(collected.len() >= 2, "expected data + exit, got {collected:?}");

    let first = &collected[0];
    assert_eq!(first.kind, PtyEventKind::Data);
    assert_eq!(first.ansi, Some(true));
    assert!(first.data.as_deref().is_some_and(|d| d.contains("red")));

    let last = collected.last().expect("non-empty");
    assert_eq!(last.kind, PtyEventKind::Exit);
    assert_eq!(last.exit_code, Some(4));

    // RFC 3339 with fixed precision orders lexically
    for pair in collected.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn test_iteration_timeout_terminates_child() {
    let mut runner =
        IterationRunner::new(sh("while :; do sleep 0.1; done")).timeout(Some(Duration::from_millis(500)));
    let (_tx, rx) = no_interrupt();

    let report = runner.run(rx).await.expect("run");

    assert!(report.timed_out);
    assert!(!report.success);
    let shutdown = report.shutdown.expect("shutdown ran");
    assert!(shutdown.success, "child must be gone after escalation");
    assert!(shutdown.streams_closed);
}

#[tokio::test]
async fn test_interrupt_shuts_down_child() {
    let mut runner = IterationRunner::new(sh("while :; do sleep 0.1; done"));
    let (tx, rx) = no_interrupt();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = tx.send(Some(SignalKind::Terminate));
    });

    let report = runner.run(rx).await.expect("run");

    assert!(!report.success);
    assert!(!report.timed_out);
    let shutdown = report.shutdown.expect("shutdown ran");
    assert!(shutdown.success);
    // A default shell dies to SIGTERM within the grace period
    assert!(shutdown.graceful);
}
