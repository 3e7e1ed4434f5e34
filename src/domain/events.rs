//! Events produced for external collaborators (UI, tray, notifier).

use serde::{Deserialize, Serialize};

use super::call::CallRecord;
use super::history::HistoryEntry;

/// Everything the engine reports to the outside world. Consumers subscribe
/// through the `EventEmitter`; emission is fire-and-forget and never feeds
/// back into engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WatcherEvent {
    /// Current-call slot changed (or cleared) after a poll.
    CallObserved(Option<CallRecord>),
    /// A call crossed the notification gate for the first time.
    NotifyNewCall(CallRecord),
    /// History snapshot after a structural change, newest first.
    HistoryChanged(Vec<HistoryEntry>),
    /// Cumulative record count after each bulk-fetch batch.
    BulkProgress(usize),
    /// Portal auth state flipped (always emitted once on the first poll).
    LoginStatusChanged(bool),
}

impl WatcherEvent {
    /// Stable name for logging and consumer routing.
    pub fn event_name(&self) -> &'static str {
        match self {
            WatcherEvent::CallObserved(_) => "call-observed",
            WatcherEvent::NotifyNewCall(_) => "notify-new-call",
            WatcherEvent::HistoryChanged(_) => "history-changed",
            WatcherEvent::BulkProgress(_) => "bulk-progress",
            WatcherEvent::LoginStatusChanged(_) => "login-status-changed",
        }
    }
}
