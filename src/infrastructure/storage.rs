//! Persisted operator state
//!
//! Two small documents own everything that survives a restart: the bounded
//! call history and the phone-to-client associations. Each is a single
//! newline-free JSON line with a schema-version field, written under the
//! platform config directory. Writes are best-effort: a failed write is
//! logged and forgotten, the in-memory store stays the source of truth for
//! the running session.
//!
//! History writes are debounced: rapid successive snapshots (keystroke-
//! driven draft saves) coalesce into one write after a quiet period.
//! `flush` exists so tests and shutdown paths can force the pending write
//! deterministically instead of waiting out the timer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::history::{ClientAssociation, HistoryEntry};

/// Version stamped into both persisted documents.
pub const SCHEMA_VERSION: u32 = 1;

const HISTORY_FILE: &str = "history.json";
const ASSOCIATIONS_FILE: &str = "associations.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedHistory {
    schema_version: u32,
    entries: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedAssociations {
    schema_version: u32,
    associations: HashMap<String, ClientAssociation>,
}

/// File-backed state storage with a debounced history writer.
pub struct StateStorage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    history_path: PathBuf,
    associations_path: PathBuf,
    debounce: Duration,
    pending_history: Mutex<Option<Vec<HistoryEntry>>>,
    flush_scheduled: AtomicBool,
}

impl StateStorage {
    pub fn new(data_dir: PathBuf, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                history_path: data_dir.join(HISTORY_FILE),
                associations_path: data_dir.join(ASSOCIATIONS_FILE),
                debounce,
                pending_history: Mutex::new(None),
                flush_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// Load persisted history, newest first. Missing file means a fresh
    /// install; an unreadable or version-mismatched file is discarded.
    pub async fn load_history(&self) -> Vec<HistoryEntry> {
        match self.inner.read_history().await {
            Ok(entries) => {
                info!("Loaded {} persisted history entries", entries.len());
                entries
            }
            Err(e) => {
                warn!("History load failed, starting empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Load persisted phone-to-client associations.
    pub async fn load_associations(&self) -> HashMap<String, ClientAssociation> {
        match self.inner.read_associations().await {
            Ok(associations) => associations,
            Err(e) => {
                warn!("Associations load failed, starting empty: {}", e);
                HashMap::new()
            }
        }
    }

    /// Queue a history snapshot for writing after the quiet period. The
    /// newest snapshot wins; earlier pending ones are dropped unseen.
    pub async fn schedule_history_save(&self, entries: Vec<HistoryEntry>) {
        *self.inner.pending_history.lock().await = Some(entries);

        if !self.inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.debounce).await;
                inner.flush().await;
            });
        }
    }

    /// Write the pending history snapshot now, if any.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    /// Associations are tiny and change rarely; they are written
    /// immediately, still best-effort.
    pub async fn save_associations(&self, associations: &HashMap<String, ClientAssociation>) {
        if let Err(e) = self.inner.write_associations(associations).await {
            warn!("Association persistence failed (ignored): {}", e);
        }
    }
}

impl StorageInner {
    async fn flush(&self) {
        self.flush_scheduled.store(false, Ordering::SeqCst);
        let pending = self.pending_history.lock().await.take();
        if let Some(entries) = pending {
            if let Err(e) = self.write_history(&entries).await {
                warn!("History persistence failed (ignored): {}", e);
            } else {
                debug!("Persisted {} history entries", entries.len());
            }
        }
    }

    async fn read_history(&self) -> Result<Vec<HistoryEntry>, StorageError> {
        if !self.history_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.history_path).await?;
        let persisted: PersistedHistory = serde_json::from_str(&content)?;
        if persisted.schema_version != SCHEMA_VERSION {
            return Err(StorageError::UnsupportedVersion(persisted.schema_version));
        }
        Ok(persisted.entries)
    }

    async fn write_history(&self, entries: &[HistoryEntry]) -> Result<(), StorageError> {
        self.ensure_dir().await?;
        let document = PersistedHistory {
            schema_version: SCHEMA_VERSION,
            entries: entries.to_vec(),
        };
        fs::write(&self.history_path, serde_json::to_string(&document)?).await?;
        Ok(())
    }

    async fn read_associations(&self) -> Result<HashMap<String, ClientAssociation>, StorageError> {
        if !self.associations_path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.associations_path).await?;
        let persisted: PersistedAssociations = serde_json::from_str(&content)?;
        if persisted.schema_version != SCHEMA_VERSION {
            return Err(StorageError::UnsupportedVersion(persisted.schema_version));
        }
        Ok(persisted.associations)
    }

    async fn write_associations(
        &self,
        associations: &HashMap<String, ClientAssociation>,
    ) -> Result<(), StorageError> {
        self.ensure_dir().await?;
        let document = PersistedAssociations {
            schema_version: SCHEMA_VERSION,
            associations: associations.clone(),
        };
        fs::write(&self.associations_path, serde_json::to_string(&document)?).await?;
        Ok(())
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.history_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}
