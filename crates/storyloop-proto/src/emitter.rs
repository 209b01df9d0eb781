//! Event emission and fan-out.
//!
//! `EventEmitter` converts raw PTY callbacks into structured [`PtyEvent`]s
//! and broadcasts them over unbounded channels, one per subscriber. Every
//! subscriber receives every event in emission order; nothing is dropped or
//! coalesced here (batching, if wanted, belongs to the UI layer).

use crate::ansi::has_ansi;
use crate::event::PtyEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::mpsc;

/// Broadcasts structured PTY events to all subscribers.
///
/// Timestamps are monotonically non-decreasing across events from a single
/// emitter instance; ties are permitted when events fire back to back.
#[derive(Default)]
pub struct EventEmitter {
    subscribers: Vec<mpsc::UnboundedSender<PtyEvent>>,
    last_stamp: Option<DateTime<Utc>>,
}

impl EventEmitter {
    /// Creates an emitter with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns its receiving end.
    ///
    /// Subscribers registered before an emit call observe that event;
    /// there is no replay for late subscribers.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PtyEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Emits a `data` event, computing the ANSI flag from the text.
    pub fn emit_data(&mut self, text: &str) {
        let ansi = has_ansi(text);
        let event = PtyEvent::data(self.next_timestamp(), text.to_string(), ansi);
        self.broadcast(event);
    }

    /// Emits an `exit` event. `final_text` carries any trailing output
    /// flushed at process end.
    pub fn emit_exit(&mut self, code: i32, final_text: Option<String>) {
        let event = PtyEvent::exit(self.next_timestamp(), code, final_text);
        self.broadcast(event);
    }

    /// Emits an `error` event.
    pub fn emit_error(&mut self, message: &str) {
        let event = PtyEvent::error(self.next_timestamp(), message.to_string());
        self.broadcast(event);
    }

    /// Issues the next timestamp, clamped so the sequence never decreases
    /// even if the wall clock steps backwards.
    fn next_timestamp(&mut self) -> String {
        let mut now = Utc::now();
        if let Some(last) = self.last_stamp
            && now < last
        {
            now = last;
        }
        self.last_stamp = Some(now);
        now.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn broadcast(&mut self, event: PtyEvent) {
        // Disconnected subscribers are pruned rather than treated as errors.
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PtyEventKind;

    fn drain(rx: &mut mpsc::UnboundedReceiver<PtyEvent>) -> Vec<PtyEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_data_event_sets_ansi_flag() {
        let mut emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();

        emitter.emit_data("\x1b[32mgreen\x1b[0m");
        emitter.emit_data("plain text");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].ansi, Some(true));
        assert_eq!(events[1].ansi, Some(false));
    }

    #[test]
    fn test_all_subscribers_receive_every_event() {
        let mut emitter = EventEmitter::new();
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit_data("one");
        emitter.emit_exit(0, None);

        for rx in [&mut rx1, &mut rx2] {
            let events = drain(rx);
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].kind, PtyEventKind::Data);
            assert_eq!(events[1].kind, PtyEventKind::Exit);
        }
    }

    #[test]
    fn test_emission_order_preserved() {
        let mut emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();

        for i in 0..10 {
            emitter.emit_data(&format!("chunk {i}"));
        }

        let events = drain(&mut rx);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.data.as_deref(), Some(format!("chunk {i}").as_str()));
        }
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let mut emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();

        for _ in 0..50 {
            emitter.emit_data("x");
        }

        let events = drain(&mut rx);
        for pair in events.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_timestamp_is_iso8601_utc() {
        let mut emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();
        emitter.emit_error("boom");

        let events = drain(&mut rx);
        let ts = &events[0].timestamp;
        assert!(ts.ends_with('Z'), "expected UTC Z suffix, got {ts}");
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_dropped_subscriber_does_not_block_others() {
        let mut emitter = EventEmitter::new();
        let rx_dropped = emitter.subscribe();
        let mut rx_live = emitter.subscribe();
        drop(rx_dropped);

        emitter.emit_data("still delivered");

        let events = drain(&mut rx_live);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_exit_event_carries_final_text() {
        let mut emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();
        emitter.emit_exit(143, Some("trailing".into()));

        let events = drain(&mut rx);
        assert_eq!(events[0].exit_code, Some(143));
        assert_eq!(events[0].data.as_deref(), Some("trailing"));
    }
}
