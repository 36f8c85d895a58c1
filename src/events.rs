// =============================================================================
// Event Sink
// =============================================================================
//
// Append-only ring buffer of engine events the dashboard polls/streams.
// Separate from the tracing log: these are domain events meant for the
// operator UI, not diagnostics.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::Signal;

const MAX_EVENTS: usize = 500;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    SignalProposed { signal: Signal },
    SignalRejected { symbol: String, strategy: String, reason: String },
    PositionOpened { ticket: String, symbol: String },
    PositionClosed { ticket: String, symbol: String, realized_pnl: f64, reason: String },
    StopAdjusted { ticket: String, new_stop: f64, stage: String },
    RiskHalted { reason: String },
    RiskResumed,
    BrokerError { symbol: String, message: String },
    NewsBlackoutEntered,
    NewsBlackoutExited,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

pub struct EventSink {
    events: RwLock<VecDeque<EventRecord>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self { events: RwLock::new(VecDeque::with_capacity(MAX_EVENTS)) }
    }

    pub fn push(&self, event: Event) {
        let mut events = self.events.write();
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(EventRecord { at: Utc::now(), event });
    }

    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        let events = self.events.read();
        let start = events.len().saturating_sub(limit);
        events.iter().skip(start).cloned().collect()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_recent_preserve_order() {
        let sink = EventSink::new();
        sink.push(Event::RiskHalted { reason: "max_drawdown".into() });
        sink.push(Event::RiskResumed);
        let recent = sink.recent(10);
        assert_eq!(recent.len(), 2);
        assert!(matches!(recent[0].event, Event::RiskHalted { .. }));
        assert!(matches!(recent[1].event, Event::RiskResumed));
    }

    #[test]
    fn ring_buffer_drops_oldest_beyond_capacity() {
        let sink = EventSink::new();
        for i in 0..MAX_EVENTS + 10 {
            sink.push(Event::BrokerError { symbol: "EURUSD".into(), message: format!("err{i}") });
        }
        let recent = sink.recent(MAX_EVENTS + 10);
        assert_eq!(recent.len(), MAX_EVENTS);
    }
}
