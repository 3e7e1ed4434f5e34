//! Workflow state wrapped around detected calls.
//!
//! `CallRecord`s are immutable observations; a `HistoryEntry` is created
//! once per distinct call id and mutated thereafter (status, draft, ticket
//! url) until evicted by the retention cap or an explicit history clear.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::call::{CallRecord, SuggestedClient};

/// Number of history entries retained; oldest evicted first.
pub const HISTORY_RETENTION: usize = 250;

/// Workflow status of a call in the operator pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Unprocessed,
    Skipped,
    Created,
}

impl CallStatus {
    /// Legal transitions: `Unprocessed → Skipped`,
    /// `Unprocessed | Skipped → Created`. `Created` never changes.
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        match (self, next) {
            (CallStatus::Unprocessed, CallStatus::Skipped) => true,
            (CallStatus::Unprocessed, CallStatus::Created) => true,
            (CallStatus::Skipped, CallStatus::Created) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Created)
    }
}

/// Operator's in-progress ticket fields for a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketDraft {
    pub topic: String,
    pub comment: String,
    pub client: Option<SuggestedClient>,
}

/// A detected call plus its workflow metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub record: CallRecord,
    pub status: CallStatus,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub draft: Option<TicketDraft>,
    pub associated_client: Option<SuggestedClient>,
    pub ticket_url: Option<String>,
}

impl HistoryEntry {
    pub fn new(record: CallRecord) -> Self {
        let now = Utc::now();
        Self {
            record,
            status: CallStatus::Unprocessed,
            added_at: now,
            updated_at: now,
            draft: None,
            associated_client: None,
            ticket_url: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Remembered client for a phone number, last-write-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientAssociation {
    pub phone: String,
    pub client_id: String,
    pub client_name: String,
    pub updated_at: DateTime<Utc>,
}

impl ClientAssociation {
    pub fn client(&self) -> SuggestedClient {
        SuggestedClient {
            id: self.client_id.clone(),
            name: self.client_name.clone(),
        }
    }
}
