//! Callwatch - portal call detection and ticket lifecycle engine
//!
//! Watches a web portal that exposes no API for live and historical phone
//! calls, recovers structured call records from its server-rendered HTML,
//! and tracks each call through the operator workflow (seen, skipped,
//! ticket created). UI, audio playback and ticket form submission are
//! external collaborators fed through the event bus.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export the engine surface
pub use application::{BulkHistoryFetcher, CallLifecycleStore, EventEmitter, Poller};
pub use domain::{CallRecord, CallStatus, HistoryEntry, SuggestedClient, TicketDraft, WatcherEvent};
pub use infrastructure::{AppConfig, CallExtractor, ConfigManager, PortalClient, StateStorage};
