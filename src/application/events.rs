//! Event emission system for external collaborators
//!
//! Centralized fan-out of engine events to whatever is listening: the
//! operator UI, the tray notifier, a test harness. Emission is
//! fire-and-forget over a broadcast channel; a consumer that lags or
//! disappears never disturbs the engine.

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::call::CallRecord;
use crate::domain::events::WatcherEvent;
use crate::domain::history::HistoryEntry;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event emitter for sending real-time updates to collaborators.
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<WatcherEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe a new collaborator to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Having zero subscribers is a normal condition, not
    /// an error; the engine runs the same with nobody listening.
    pub fn emit(&self, event: WatcherEvent) {
        let name = event.event_name();
        match self.sender.send(event) {
            Ok(receivers) => debug!("Emitted {} to {} subscriber(s)", name, receivers),
            Err(_) => debug!("Emitted {} with no subscribers", name),
        }
    }

    pub fn emit_call_observed(&self, record: Option<CallRecord>) {
        self.emit(WatcherEvent::CallObserved(record));
    }

    pub fn emit_notify_new_call(&self, record: CallRecord) {
        self.emit(WatcherEvent::NotifyNewCall(record));
    }

    pub fn emit_history_changed(&self, entries: Vec<HistoryEntry>) {
        self.emit(WatcherEvent::HistoryChanged(entries));
    }

    pub fn emit_bulk_progress(&self, count: usize) {
        self.emit(WatcherEvent::BulkProgress(count));
    }

    pub fn emit_login_status(&self, logged_in: bool) {
        self.emit(WatcherEvent::LoginStatusChanged(logged_in));
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
