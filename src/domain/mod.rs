//! Domain module - Core business logic and entities
//!
//! Call records as recovered from portal markup, the workflow metadata
//! wrapped around them, and the events the engine reports outward.

pub mod call;
pub mod events;
pub mod history;

// Re-export commonly used items
pub use call::{CallRecord, SuggestedClient, PORTAL_TIMESTAMP_FORMAT};
pub use events::WatcherEvent;
pub use history::{CallStatus, ClientAssociation, HistoryEntry, TicketDraft, HISTORY_RETENTION};
