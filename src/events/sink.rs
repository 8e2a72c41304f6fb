//! Event sinks: the observer interface passed into the risk core at construction.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

use super::types::{ActionOrigin, RiskAction, RiskEvent};
use crate::helpers::now_ms;

/// Consumer of risk events and actions.
///
/// Implementations must not block: emission happens on the monitoring tick.
pub trait RiskEventSink: Send + Sync {
    fn emit(&self, event: RiskEvent);

    /// Emit an event stamped by the caller's clock. The risk core always
    /// emits through this with its tick time.
    fn emit_at(&self, event: RiskEvent, _timestamp_ms: u64) {
        self.emit(event);
    }

    /// Hand a risk action to the dispatcher.
    fn dispatch(&self, action: RiskAction, origin: ActionOrigin) {
        self.emit(RiskEvent::ActionDispatched { action, origin });
    }

    fn dispatch_at(&self, action: RiskAction, origin: ActionOrigin, timestamp_ms: u64) {
        self.emit_at(RiskEvent::ActionDispatched { action, origin }, timestamp_ms);
    }
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn RiskEventSink>;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RiskEventSink for NullSink {
    fn emit(&self, _event: RiskEvent) {}
}

/// Forwards events to an async consumer over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RiskEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<RiskEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RiskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RiskEventSink for ChannelSink {
    fn emit(&self, event: RiskEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(event = e.0.name(), "Event dispatcher gone, dropping event");
        }
    }
}

/// Keeps every event in memory. Mostly useful in tests and offline tooling.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RiskEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RiskEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Events with the given wire name.
    pub fn named(&self, name: &str) -> Vec<RiskEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }

    /// Dispatched actions, in order.
    pub fn actions(&self) -> Vec<RiskAction> {
        self.events()
            .iter()
            .filter_map(|e| e.dispatched_action().cloned())
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl RiskEventSink for RecordingSink {
    fn emit(&self, event: RiskEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// A timestamped history entry.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedEvent {
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub event: RiskEvent,
}

/// Bounded in-process event history.
///
/// Records every event it sees and forwards it to an optional inner sink,
/// so it can be layered in front of the real dispatcher.
pub struct EventLog {
    capacity: usize,
    entries: Mutex<VecDeque<LoggedEvent>>,
    inner: Option<SharedSink>,
}

impl EventLog {
    /// Default number of retained events.
    pub const DEFAULT_CAPACITY: usize = 500;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            inner: None,
        }
    }

    /// Record and forward to `inner`.
    pub fn wrapping(capacity: usize, inner: SharedSink) -> Self {
        Self {
            inner: Some(inner),
            ..Self::new(capacity)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries stamped at or after `since_ms`, oldest first.
    pub fn since(&self, since_ms: u64) -> Vec<LoggedEvent> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.timestamp_ms >= since_ms)
            .cloned()
            .collect()
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LoggedEvent> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    fn record(&self, timestamp_ms: u64, event: RiskEvent) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LoggedEvent {
            timestamp_ms,
            event,
        });
    }
}

impl RiskEventSink for EventLog {
    /// Unstamped events get wall-clock time.
    fn emit(&self, event: RiskEvent) {
        self.emit_at(event, now_ms());
    }

    fn emit_at(&self, event: RiskEvent, timestamp_ms: u64) {
        self.record(timestamp_ms, event.clone());
        if let Some(inner) = &self.inner {
            inner.emit_at(event, timestamp_ms);
        }
    }
}
