//! Call lifecycle store
//!
//! Reconciles the polled "current call" against operator activity and the
//! bounded history log. All mutable engine state lives behind one lock:
//! the current-call slot, the history keyed by call id, the single global
//! lock id, and the set of calls already surfaced. Mutations arrive from
//! the poller's completion path and from operator action handlers, which
//! are sequential with respect to the store: `observe` reads and writes
//! several fields that must move together with the lock state.
//!
//! No operation here fails: unknown ids are no-ops and persistence errors
//! are logged and swallowed. The in-memory store is the source of truth
//! for the running session.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::application::events::EventEmitter;
use crate::domain::call::{CallRecord, SuggestedClient};
use crate::domain::history::{
    CallStatus, ClientAssociation, HistoryEntry, TicketDraft, HISTORY_RETENTION,
};
use crate::infrastructure::storage::StateStorage;

struct LifecycleState {
    current_call: Option<CallRecord>,
    /// Newest first, unique by non-empty call id.
    history: Vec<HistoryEntry>,
    locked_call_id: Option<String>,
    /// Calls already surfaced as a notification or already terminal.
    shown_ids: HashSet<String>,
    first_poll_done: bool,
    associations: HashMap<String, ClientAssociation>,
}

impl LifecycleState {
    fn entry_index(&self, id: &str) -> Option<usize> {
        if id.is_empty() {
            return None;
        }
        self.history.iter().position(|e| e.id() == id)
    }
}

/// Process-wide store for the call workflow.
pub struct CallLifecycleStore {
    state: Mutex<LifecycleState>,
    emitter: EventEmitter,
    storage: Arc<StateStorage>,
    retention: usize,
}

impl CallLifecycleStore {
    pub fn new(emitter: EventEmitter, storage: Arc<StateStorage>) -> Self {
        Self::with_retention(emitter, storage, HISTORY_RETENTION)
    }

    pub fn with_retention(
        emitter: EventEmitter,
        storage: Arc<StateStorage>,
        retention: usize,
    ) -> Self {
        Self {
            state: Mutex::new(LifecycleState {
                current_call: None,
                history: Vec::new(),
                locked_call_id: None,
                shown_ids: HashSet::new(),
                first_poll_done: false,
                associations: HashMap::new(),
            }),
            emitter,
            storage,
            retention,
        }
    }

    /// Seed the store from persisted state. Entries that already left the
    /// Unprocessed state count as shown and are never re-notified.
    pub async fn hydrate(
        &self,
        entries: Vec<HistoryEntry>,
        associations: HashMap<String, ClientAssociation>,
    ) {
        let mut st = self.state.lock().await;
        for entry in &entries {
            if entry.status != CallStatus::Unprocessed && !entry.id().is_empty() {
                st.shown_ids.insert(entry.id().to_string());
            }
        }
        info!("Hydrated {} history entries", entries.len());
        st.history = entries;
        st.history.truncate(self.retention);
        st.associations = associations;
    }

    /// Feed one poll result into the store.
    ///
    /// An absent record clears the current-call slot unless a call is
    /// locked. A present record ensures a history entry, updates the slot
    /// under the lock/skip rules, and crosses the notification gate at
    /// most once per call id. The first successful poll after startup
    /// pre-seeds `shown_ids` instead of notifying; those calls are
    /// pre-existing, not new.
    pub async fn observe(&self, record: Option<CallRecord>) {
        let mut st = self.state.lock().await;
        let first_poll = !st.first_poll_done;
        st.first_poll_done = true;

        let Some(record) = record else {
            if st.locked_call_id.is_none() && st.current_call.is_some() {
                st.current_call = None;
                self.emitter.emit_call_observed(None);
            }
            return;
        };

        let id = record.id.clone();
        let mut history_changed = false;

        // Calls without an id cannot be tracked through history; they only
        // pass through the live slot.
        let status = if id.is_empty() {
            None
        } else {
            match st.entry_index(&id) {
                Some(i) => Some(st.history[i].status),
                None => {
                    let mut entry = HistoryEntry::new(record.clone());
                    entry.associated_client = st
                        .associations
                        .get(&record.phone)
                        .map(ClientAssociation::client);
                    st.history.insert(0, entry);
                    st.history.truncate(self.retention);
                    history_changed = true;
                    Some(CallStatus::Unprocessed)
                }
            }
        };

        let locked_here = st.locked_call_id.as_deref() == Some(id.as_str());
        let skipped = status == Some(CallStatus::Skipped);

        if locked_here {
            // Operator is editing this call; the portal's view stays
            // authoritative for the record itself.
            st.current_call = Some(record.clone());
            self.emitter.emit_call_observed(Some(record.clone()));
        } else if st.locked_call_id.is_none() && !skipped {
            if st.current_call.as_ref() != Some(&record) {
                st.current_call = Some(record.clone());
                self.emitter.emit_call_observed(Some(record.clone()));
            }
        }

        if !id.is_empty() {
            if first_poll || skipped {
                // Pre-existing or dismissed; counts as shown either way.
                st.shown_ids.insert(id.clone());
            } else if st.shown_ids.insert(id.clone()) {
                debug!(id = %id, "notifying new call");
                self.emitter.emit_notify_new_call(record.clone());
            }
        }

        if history_changed {
            self.emitter.emit_history_changed(st.history.clone());
            self.persist(&st).await;
        }
    }

    /// Pin the current-call slot to one id while the operator edits.
    pub async fn lock(&self, id: &str) {
        let mut st = self.state.lock().await;
        st.locked_call_id = Some(id.to_string());
    }

    pub async fn unlock(&self) {
        let mut st = self.state.lock().await;
        st.locked_call_id = None;
    }

    /// Mark a call skipped. No-op when the entry is unknown or already
    /// terminal; a matching lock is cleared either way.
    pub async fn skip(&self, id: &str) {
        let mut st = self.state.lock().await;
        let Some(i) = st.entry_index(id) else {
            return;
        };
        if st.locked_call_id.as_deref() == Some(id) {
            st.locked_call_id = None;
        }
        st.shown_ids.insert(id.to_string());

        if !st.history[i].status.can_transition_to(CallStatus::Skipped) {
            return;
        }
        st.history[i].status = CallStatus::Skipped;
        st.history[i].updated_at = Utc::now();
        self.emitter.emit_history_changed(st.history.clone());
        self.persist(&st).await;
    }

    /// Skip whatever currently occupies the live slot.
    pub async fn skip_current(&self) {
        let id = {
            let st = self.state.lock().await;
            st.current_call.as_ref().map(|r| r.id.clone())
        };
        if let Some(id) = id {
            self.skip(&id).await;
        }
    }

    /// Record a created ticket. Overrides Skipped (a ticket created after
    /// a skip wins) and is terminal afterwards.
    pub async fn mark_created(&self, id: &str, ticket_url: Option<String>) {
        let mut st = self.state.lock().await;
        let Some(i) = st.entry_index(id) else {
            return;
        };
        if st.locked_call_id.as_deref() == Some(id) {
            st.locked_call_id = None;
        }
        st.shown_ids.insert(id.to_string());

        st.history[i].status = CallStatus::Created;
        st.history[i].ticket_url = ticket_url;
        st.history[i].updated_at = Utc::now();
        self.emitter.emit_history_changed(st.history.clone());
        self.persist(&st).await;
    }

    /// Attach in-progress ticket data. Persistence is debounced in the
    /// storage layer; rapid keystroke-driven saves coalesce there.
    pub async fn save_draft(&self, id: &str, draft: TicketDraft) {
        let mut st = self.state.lock().await;
        let Some(i) = st.entry_index(id) else {
            return;
        };
        st.history[i].draft = Some(draft);
        st.history[i].updated_at = Utc::now();
        self.persist(&st).await;
    }

    /// Remember a client for a phone number, last-write-wins, and reflect
    /// it on matching history entries.
    pub async fn associate_client(&self, phone: &str, client: SuggestedClient) {
        let mut st = self.state.lock().await;
        st.associations.insert(
            phone.to_string(),
            ClientAssociation {
                phone: phone.to_string(),
                client_id: client.id.clone(),
                client_name: client.name.clone(),
                updated_at: Utc::now(),
            },
        );
        for entry in st.history.iter_mut().filter(|e| e.record.phone == phone) {
            entry.associated_client = Some(client.clone());
        }
        self.storage.save_associations(&st.associations).await;
        self.emitter.emit_history_changed(st.history.clone());
    }

    /// Remembered client for a phone number, if any.
    pub async fn association_for(&self, phone: &str) -> Option<SuggestedClient> {
        let st = self.state.lock().await;
        st.associations.get(phone).map(ClientAssociation::client)
    }

    /// Login-time reconciliation: merge server history into the log.
    /// Unseen ids are appended at the tail as Unprocessed and pre-seeded
    /// as shown; history recovered at login is pre-existing by
    /// definition. Existing entries keep their first-extracted fields.
    pub async fn merge_history(&self, records: Vec<CallRecord>) {
        let mut st = self.state.lock().await;
        let mut changed = false;

        for record in records {
            if record.id.is_empty() || st.entry_index(&record.id).is_some() {
                continue;
            }
            st.shown_ids.insert(record.id.clone());
            let mut entry = HistoryEntry::new(record);
            entry.associated_client = st
                .associations
                .get(&entry.record.phone)
                .map(ClientAssociation::client);
            st.history.push(entry);
            changed = true;
        }

        if changed {
            st.history.truncate(self.retention);
            self.emitter.emit_history_changed(st.history.clone());
            self.persist(&st).await;
        }
    }

    /// Explicitly wipe the history log. Shown ids are kept so already
    /// surfaced calls are not re-notified.
    pub async fn clear_history(&self) {
        let mut st = self.state.lock().await;
        if st.history.is_empty() {
            return;
        }
        st.history.clear();
        self.emitter.emit_history_changed(Vec::new());
        self.persist(&st).await;
    }

    pub async fn current_call(&self) -> Option<CallRecord> {
        self.state.lock().await.current_call.clone()
    }

    pub async fn locked_call_id(&self) -> Option<String> {
        self.state.lock().await.locked_call_id.clone()
    }

    /// History snapshot, newest first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().await.history.clone()
    }

    pub async fn entry(&self, id: &str) -> Option<HistoryEntry> {
        let st = self.state.lock().await;
        st.entry_index(id).map(|i| st.history[i].clone())
    }

    /// Force the pending persisted write out, for shutdown and tests.
    pub async fn flush_persistence(&self) {
        self.storage.flush().await;
    }

    async fn persist(&self, st: &LifecycleState) {
        self.storage.schedule_history_save(st.history.clone()).await;
    }
}
