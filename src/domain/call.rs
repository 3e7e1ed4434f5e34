use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used by the portal, e.g. `03.08.2026 14:07:52`.
pub const PORTAL_TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Candidate client suggested by the portal for a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedClient {
    pub id: String,
    pub name: String,
}

/// One detected phone call, as recovered from portal markup.
///
/// Records are created fresh on every poll or page fetch and never mutated
/// in place; workflow state lives in `HistoryEntry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Portal's opaque call/recording identifier. May be empty when the
    /// portal omitted it; such records are excluded from id-keyed dedup.
    pub id: String,
    /// Raw digits as reported by the portal; may be empty.
    pub phone: String,
    /// Literal portal text in `DD.MM.YYYY HH:MM:SS` form, kept as source
    /// text and parsed on demand for ordering.
    pub timestamp: String,
    pub duration_seconds: Option<u32>,
    /// Derived from `id` when the portal exposes a recording endpoint.
    pub recording_url: Option<String>,
    /// Deduplicated by id, insertion order = first occurrence in markup.
    pub suggested_clients: Vec<SuggestedClient>,
    /// True when the page already shows a ticket link or success marker.
    pub has_open_ticket: bool,
    /// Query-string fragment the portal used to address this call; needed
    /// to replay a ticket-creation request. Absent for fallback records.
    pub source_query: Option<String>,
    /// Set when the record was recovered via the secondary row-scanning
    /// path, which has lower field confidence.
    pub fallback_recovered: bool,
}

impl CallRecord {
    /// Parse the portal timestamp for ordering. The stored text is never
    /// normalized; unparseable values simply yield `None`.
    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(self.timestamp.trim(), PORTAL_TIMESTAMP_FORMAT).ok()
    }

    /// Append a suggestion unless its id is already present, preserving
    /// first-seen order.
    pub fn push_suggestion(&mut self, client: SuggestedClient) {
        if !self.suggested_clients.iter().any(|c| c.id == client.id) {
            self.suggested_clients.push(client);
        }
    }
}

impl Default for CallRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            phone: String::new(),
            timestamp: String::new(),
            duration_seconds: None,
            recording_url: None,
            suggested_clients: Vec::new(),
            has_open_ticket: false,
            source_query: None,
            fallback_recovered: false,
        }
    }
}
