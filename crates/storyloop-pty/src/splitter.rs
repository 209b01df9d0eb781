//! Dual-output stream splitting.
//!
//! A single PTY output stream feeds two classes of consumers: the terminal
//! display wants the raw bytes with ANSI styling intact, while log files
//! want clean text. `DualOutputSplitter` fans each pushed chunk out to both
//! sides, stripping ANSI on the file side only, with chunk order preserved
//! on both.

use storyloop_proto::strip_ansi;
use tokio::sync::mpsc;
use tracing::debug;

/// Forks one logical output stream into display and file channels.
///
/// Every chunk pushed arrives at every subscriber: verbatim on the display
/// side, ANSI-stripped on the file side. Subscribers consume over unbounded
/// channels, so `push` never blocks on a slow consumer, and per-channel FIFO
/// ordering gives both sides the same relative chunk order.
#[derive(Default)]
pub struct DualOutputSplitter {
    display: Vec<mpsc::UnboundedSender<String>>,
    file: Vec<mpsc::UnboundedSender<String>>,
    closed: bool,
}

impl DualOutputSplitter {
    /// Creates a splitter with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the display channel (raw chunks, ANSI preserved).
    pub fn subscribe_display(&mut self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.display.push(tx);
        rx
    }

    /// Subscribes to the file channel (ANSI stripped).
    pub fn subscribe_file(&mut self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.file.push(tx);
        rx
    }

    /// Fans a chunk out to all subscribers.
    ///
    /// After [`close`](Self::close), pushes are silently dropped - a final
    /// in-flight write racing shutdown must not error.
    pub fn push(&mut self, chunk: &str) {
        if self.closed {
            debug!(len = chunk.len(), "chunk pushed after close, dropping");
            return;
        }
        self.display.retain(|tx| tx.send(chunk.to_string()).is_ok());
        if !self.file.is_empty() {
            let stripped = strip_ansi(chunk);
            self.file.retain(|tx| tx.send(stripped.clone()).is_ok());
        }
    }

    /// Seals the splitter. Idempotent; subsequent pushes are no-ops.
    ///
    /// Dropping the senders lets subscriber receivers observe end-of-stream
    /// once they have drained what was already delivered.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.display.clear();
        self.file.clear();
        debug!("dual-output splitter closed");
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
