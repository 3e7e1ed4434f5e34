//! Portal contract constants
//!
//! Everything the engine knows about the target portal's URLs and markup
//! lives here: query-string keys on call anchors, the markers that betray a
//! login page, and the deterministic recording-URL template. The markup is
//! not under our control, so these are best-effort fingerprints rather than
//! a schema.

/// Base URL for the portal
pub const BASE_URL: &str = "https://portal.telefon-crm.ru";

/// Query-string keys carried by call-defining anchors
pub mod query_keys {
    /// Phone number key. The misspelling is the portal's, not ours.
    pub const PHONE: &str = "selectedPhoneNuber";

    /// Linked call/recording identifier
    pub const LINKED_ID: &str = "linkedId";

    /// Call timestamp, `DD.MM.YYYY HH:MM:SS`
    pub const DATE: &str = "selectedPhoneDate";

    /// Call duration in seconds
    pub const DURATION: &str = "selectedPhoneDuration";

    /// Client id key; present on suggestion anchors, absent on the
    /// defining anchor of a call block
    pub const CLIENT_ID: &str = "id";
}

/// Class marker carried by client-suggestion anchors
pub const SUGGESTION_CLASS_MARKER: &str = "dropdown-item";

/// Path fragment of client-suggestion anchors (`.../Create?id=<digits>`)
pub const SUGGESTION_HREF_FRAGMENT: &str = "/Create?id=";

/// Path fragment signalling an already-created ticket for a call
pub const TICKET_DETAILS_FRAGMENT: &str = "/Tickets/Details";

/// Success-style class that also signals an existing ticket
pub const TICKET_SUCCESS_CLASS: &str = "text-success";

/// Path fragment of recording links on history rows
pub const RECORDING_PATH_FRAGMENT: &str = "/Calls/Record/";

/// Literal substrings whose presence identifies a login page. The portal
/// serves localized and non-localized variants of the form.
pub const LOGIN_PAGE_MARKERS: &[&str] = &[
    "type=\"password\"",
    "Войти",
    "Log in",
    "Remember me",
];

/// Derive the recording URL for a call id. The portal exposes recordings
/// at a fixed endpoint keyed by the linked id.
pub fn recording_url(id: &str) -> String {
    format!("{}{}{}", BASE_URL, RECORDING_PATH_FRAGMENT, id)
}

/// True when the body looks like the portal's login page.
pub fn is_login_page(body: &str) -> bool {
    LOGIN_PAGE_MARKERS.iter().any(|marker| body.contains(marker))
}
