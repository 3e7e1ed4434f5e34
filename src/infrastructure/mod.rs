//! Infrastructure layer for portal access, extraction, and persistence
//!
//! Everything that touches the outside world: the portal HTTP client and
//! its markup contract, the HTML-to-record extractor, persisted state,
//! configuration, and logging.

pub mod config;
pub mod extractor;
pub mod http_client;
pub mod logging;
pub mod portal;
pub mod storage;

// Re-export commonly used items
pub use config::{AppConfig, BulkConfig, ConfigManager, HistoryConfig, LoggingConfig, PortalConfig};
pub use extractor::CallExtractor;
pub use http_client::{FetchOutcome, PageFetch, PortalClient};
pub use storage::{StateStorage, StorageError};
