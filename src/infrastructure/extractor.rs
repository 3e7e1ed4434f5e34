//! HTML scanning and call extraction for portal pages
//!
//! The portal renders calls for human browsing, not machine consumption, so
//! extraction is boundary scanning over raw markup plus per-field regex
//! chains; no DOM tree, no CSS selectors. Two layouts are understood: the
//! anchor-based call blocks of the live page (primary path) and the legacy
//! history rows that only carry a recording link (fallback path). Absence
//! of expected markup is never an error; it degrades to "no record".

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;
use url::form_urlencoded;

use crate::domain::call::{CallRecord, SuggestedClient};
use crate::infrastructure::portal;

/// Window searched around a recording link when the enclosing row tags
/// cannot be found.
const ROW_SCAN_WINDOW: usize = 2000;

/// Anchors whose query string names the phone number. Defining anchors and
/// client-suggestion anchors both match; they are told apart by the
/// presence of the client-id key.
static CALL_ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"<a\s[^>]*href\s*=\s*"([^"]*{}=[^"]*)""#,
        portal::query_keys::PHONE
    ))
    .expect("call anchor pattern")
});

/// Any anchor with its attribute blob and inner markup.
static ANY_ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<a\s+([^>]*)>(.*?)</a>").expect("anchor pattern"));

/// Client id inside a suggestion anchor's href.
static SUGGESTION_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/Create\?id=(\d+)").expect("suggestion id pattern"));

/// Recording links on legacy history rows.
static RECORDING_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{}(\d+)", regex::escape(portal::RECORDING_PATH_FRAGMENT)))
        .expect("recording link pattern")
});

/// Table cells of a row, inner markup captured.
static TD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<td[^>]*>(.*?)</td>").expect("td pattern"));

/// Internal extension-style token: a bare 2-4 digit value in the second
/// column marks the row as a non-billable internal call artifact.
static INTERNAL_EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2,4}$").expect("extension pattern"));

/// Literal `DD.MM.YYYY HH:MM:SS` timestamp as the portal prints it.
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{2}\.\d{2}\.\d{4} \d{2}:\d{2}:\d{2})\b").expect("date pattern")
});

type PhoneExtract = fn(&Captures) -> String;

/// Phone recovery chain, first match wins. Every variant normalizes to a
/// canonical `7xxxxxxxxxx` digit string.
static PHONE_CHAIN: Lazy<Vec<(Regex, PhoneExtract)>> = Lazy::new(|| {
    vec![
        // percent-encoded "+7 (xxx) xxx-xx-xx" as it appears inside hrefs
        (
            Regex::new(r"%2B7%20%28(\d{3})%29%20(\d{3})-(\d{2})-(\d{2})").expect("phone pattern"),
            phone_from_groups as PhoneExtract,
        ),
        // literal "+7 (xxx) xxx-xx-xx"
        (
            Regex::new(r"\+7\s*\((\d{3})\)\s*(\d{3})-(\d{2})-(\d{2})").expect("phone pattern"),
            phone_from_groups,
        ),
        // bare 7 followed by ten digits
        (
            Regex::new(r"\b(7\d{10})\b").expect("phone pattern"),
            phone_verbatim,
        ),
        // spaced digit groups, "+7 912 345 67 89"
        (
            Regex::new(r"\+?7\s+(\d{3})\s+(\d{3})\s+(\d{2})\s+(\d{2})").expect("phone pattern"),
            phone_from_groups,
        ),
    ]
});

fn phone_from_groups(caps: &Captures) -> String {
    format!("7{}{}{}{}", &caps[1], &caps[2], &caps[3], &caps[4])
}

fn phone_verbatim(caps: &Captures) -> String {
    caps[1].to_string()
}

type DurationExtract = fn(&Captures) -> Option<u32>;

/// Duration recovery chain, first match stops the chain: "N мин M сек",
/// then "N сек", then "N мин".
static DURATION_CHAIN: Lazy<Vec<(Regex, DurationExtract)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(\d+)\s*мин\.?\s*(\d+)\s*сек").expect("duration pattern"),
            duration_min_sec as DurationExtract,
        ),
        (
            Regex::new(r"(\d+)\s*сек").expect("duration pattern"),
            duration_sec,
        ),
        (
            Regex::new(r"(\d+)\s*мин").expect("duration pattern"),
            duration_min,
        ),
    ]
});

fn duration_min_sec(caps: &Captures) -> Option<u32> {
    let minutes: u32 = caps[1].parse().ok()?;
    let seconds: u32 = caps[2].parse().ok()?;
    Some(minutes * 60 + seconds)
}

fn duration_sec(caps: &Captures) -> Option<u32> {
    caps[1].parse().ok()
}

fn duration_min(caps: &Captures) -> Option<u32> {
    caps[1].parse::<u32>().ok().map(|m| m * 60)
}

/// Recover a phone number from row text, normalized to `7xxxxxxxxxx`.
pub(crate) fn recover_phone(text: &str) -> Option<String> {
    PHONE_CHAIN
        .iter()
        .find_map(|(re, extract)| re.captures(text).map(|caps| extract(&caps)))
}

/// Recover the literal portal timestamp from row text.
pub(crate) fn recover_date(text: &str) -> Option<String> {
    DATE_RE.captures(text).map(|caps| caps[1].to_string())
}

/// Recover a duration in seconds from row text.
pub(crate) fn recover_duration(text: &str) -> Option<u32> {
    DURATION_CHAIN
        .iter()
        .find_map(|(re, extract)| re.captures(text).and_then(|caps| extract(&caps)))
}

/// Extractor over the portal's two known page shapes. Pure and
/// deterministic: raw HTML in, zero or more `CallRecord` drafts out.
#[derive(Debug, Default)]
pub struct CallExtractor;

impl CallExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the live/most-recent call: the first surviving call block,
    /// or `None` when the page shows no call markup.
    pub fn extract_current_call(&self, html: &str) -> Option<CallRecord> {
        self.extract_blocks(html).into_iter().next()
    }

    /// Extract every call on the page: anchor-based blocks first, then
    /// fallback row scanning for recording links no block claimed.
    pub fn extract_all_calls(&self, html: &str) -> Vec<CallRecord> {
        let mut records = self.extract_blocks(html);

        let mut claimed: HashSet<String> = records
            .iter()
            .filter(|r| !r.id.is_empty())
            .map(|r| r.id.clone())
            .collect();

        for caps in RECORDING_LINK_RE.captures_iter(html) {
            let id = caps[1].to_string();
            if !claimed.insert(id.clone()) {
                continue;
            }
            let link_pos = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (row_start, row_end) = locate_row(html, link_pos);
            let row = &html[row_start..row_end];
            if row_is_internal(row) {
                debug!(id = %id, "fallback row discarded by noise filter");
                continue;
            }
            records.push(Self::record_from_row(id, row));
        }

        records
    }

    /// Primary path: call blocks delimited by defining anchors.
    fn extract_blocks(&self, html: &str) -> Vec<CallRecord> {
        let defining: Vec<(usize, AnchorFields)> = CALL_ANCHOR_RE
            .captures_iter(html)
            .filter_map(|caps| {
                let start = caps.get(0)?.start();
                let fields = AnchorFields::parse(&caps[1])?;
                // Suggestion anchors carry a client id; only id-less
                // anchors open a call block.
                if fields.client_id.is_some() {
                    None
                } else {
                    Some((start, fields))
                }
            })
            .collect();

        let mut records = Vec::with_capacity(defining.len());
        for (i, (start, fields)) in defining.iter().enumerate() {
            let block_end = defining
                .get(i + 1)
                .map(|(next_start, _)| *next_start)
                .unwrap_or(html.len());
            let block = &html[*start..block_end];

            let (row_start, row_end) = locate_row(html, *start);
            let row = &html[row_start..row_end];
            if row_is_internal(row) {
                debug!(phone = %fields.phone, "call block discarded by noise filter");
                continue;
            }

            records.push(CallRecord {
                recording_url: derived_recording_url(&fields.linked_id),
                id: fields.linked_id.clone(),
                phone: fields.phone.clone(),
                timestamp: fields.date.clone(),
                duration_seconds: fields.duration_seconds,
                suggested_clients: collect_suggestions(block),
                has_open_ticket: has_open_ticket(row) || has_open_ticket(block),
                source_query: Some(fields.raw_query.clone()),
                fallback_recovered: false,
            });
        }
        records
    }

    /// Fallback path: rebuild a record from an unclaimed recording link's
    /// enclosing row. Lower confidence, no replayable source query.
    fn record_from_row(id: String, row: &str) -> CallRecord {
        CallRecord {
            phone: recover_phone(row).unwrap_or_default(),
            timestamp: recover_date(row).unwrap_or_default(),
            duration_seconds: recover_duration(row),
            has_open_ticket: has_open_ticket(row),
            source_query: None,
            fallback_recovered: true,
            recording_url: derived_recording_url(&id),
            id,
            ..Default::default()
        }
    }
}

/// The portal exposes recordings at a deterministic endpoint keyed by the
/// linked id; no id, no URL.
fn derived_recording_url(id: &str) -> Option<String> {
    (!id.is_empty()).then(|| portal::recording_url(id))
}

/// Fields parsed from a call-defining anchor's query string.
struct AnchorFields {
    raw_query: String,
    phone: String,
    linked_id: String,
    date: String,
    duration_seconds: Option<u32>,
    client_id: Option<String>,
}

impl AnchorFields {
    fn parse(href: &str) -> Option<Self> {
        let href = unescape_entities(href);
        let raw_query = href.split_once('?')?.1.to_string();

        let mut phone = String::new();
        let mut linked_id = String::new();
        let mut date = String::new();
        let mut duration_seconds = None;
        let mut client_id = None;

        for (key, value) in form_urlencoded::parse(raw_query.as_bytes()) {
            match key.as_ref() {
                k if k == portal::query_keys::PHONE => phone = value.into_owned(),
                k if k == portal::query_keys::LINKED_ID => linked_id = value.into_owned(),
                k if k == portal::query_keys::DATE => date = value.into_owned(),
                k if k == portal::query_keys::DURATION => {
                    duration_seconds = value.parse().ok();
                }
                k if k == portal::query_keys::CLIENT_ID => client_id = Some(value.into_owned()),
                _ => {}
            }
        }

        Some(Self {
            raw_query,
            phone,
            linked_id,
            date,
            duration_seconds,
            client_id,
        })
    }
}

/// Client suggestions inside a block: `dropdown-item` anchors pointing at
/// the client-create endpoint. Dedup by id, first-seen order.
fn collect_suggestions(block: &str) -> Vec<SuggestedClient> {
    let mut suggestions: Vec<SuggestedClient> = Vec::new();
    for caps in ANY_ANCHOR_RE.captures_iter(block) {
        let attrs = &caps[1];
        if !attrs.contains(portal::SUGGESTION_CLASS_MARKER) {
            continue;
        }
        let Some(id_caps) = SUGGESTION_ID_RE.captures(attrs) else {
            continue;
        };
        let id = id_caps[1].to_string();
        if suggestions.iter().any(|s| s.id == id) {
            continue;
        }
        suggestions.push(SuggestedClient {
            id,
            name: strip_tags(&caps[2]),
        });
    }
    suggestions
}

/// Existing-ticket marker: details link or success-style class.
fn has_open_ticket(fragment: &str) -> bool {
    fragment.contains(portal::TICKET_DETAILS_FRAGMENT)
        || fragment.contains(portal::TICKET_SUCCESS_CLASS)
}

/// True when the row's second column holds a bare internal-extension token.
fn row_is_internal(row: &str) -> bool {
    let mut cells = TD_RE.captures_iter(row);
    let Some(second) = cells.nth(1) else {
        return false;
    };
    INTERNAL_EXTENSION_RE.is_match(strip_tags(&second[1]).trim())
}

/// Locate the row enclosing `pos`: nearest preceding `<tr` and following
/// `</tr>`, degrading to a bounded window when the tags are missing.
fn locate_row(html: &str, pos: usize) -> (usize, usize) {
    let start = html[..pos]
        .rfind("<tr")
        .unwrap_or_else(|| floor_char_boundary(html, pos.saturating_sub(ROW_SCAN_WINDOW)));
    let end = html[pos..]
        .find("</tr>")
        .map(|i| pos + i + "</tr>".len())
        .unwrap_or_else(|| ceil_char_boundary(html, (pos + ROW_SCAN_WINDOW).min(html.len())));
    (start, end)
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Minimal entity handling: hrefs in served markup separate query pairs
/// with `&amp;`.
fn unescape_entities(s: &str) -> String {
    s.replace("&amp;", "&")
}

/// Drop tags and collapse whitespace; suggestion names arrive with inner
/// markup like `<b>` highlights.
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn defining_anchor(phone: &str, id: &str, date_encoded: &str, duration: u32) -> String {
        format!(
            r#"<a href="/Tickets/Create?selectedPhoneNuber={phone}&amp;linkedId={id}&amp;selectedPhoneDate={date_encoded}&amp;selectedPhoneDuration={duration}">Создать обращение</a>"#
        )
    }

    fn suggestion_anchor(client_id: &str, name: &str) -> String {
        format!(
            r#"<a class="dropdown-item" href="/Clients/Create?id={client_id}&amp;selectedPhoneNuber=79120000000">{name}</a>"#
        )
    }

    fn call_row(second_cell: &str, block: &str) -> String {
        format!("<tr><td>04.08.2026</td><td>{second_cell}</td><td>{block}</td></tr>")
    }

    #[test]
    fn no_call_markup_yields_nothing() {
        let extractor = CallExtractor::new();
        let html = "<html><body><p>Ничего нет</p></body></html>";
        assert!(extractor.extract_current_call(html).is_none());
        assert!(extractor.extract_all_calls(html).is_empty());
    }

    #[test]
    fn current_call_parses_defining_anchor_fields() {
        let extractor = CallExtractor::new();
        let html = call_row(
            "+7 (912) 345-67-89",
            &defining_anchor("79123456789", "8841", "03.08.2026%2014:07:52", 125),
        );

        let record = extractor.extract_current_call(&html).unwrap();
        assert_eq!(record.id, "8841");
        assert_eq!(record.phone, "79123456789");
        assert_eq!(record.timestamp, "03.08.2026 14:07:52");
        assert_eq!(record.duration_seconds, Some(125));
        assert!(record.recording_url.unwrap().ends_with("/Calls/Record/8841"));
        assert!(!record.fallback_recovered);
        assert!(record.source_query.unwrap().contains("linkedId=8841"));
    }

    #[test]
    fn two_blocks_become_two_records_with_distinct_source_queries() {
        let extractor = CallExtractor::new();
        let html = format!(
            "{}{}",
            call_row(
                "+7 (912) 345-67-89",
                &defining_anchor("79123456789", "1", "03.08.2026%2010:00:00", 10)
            ),
            call_row(
                "+7 (900) 111-22-33",
                &defining_anchor("79001112233", "2", "03.08.2026%2011:00:00", 20)
            ),
        );

        let records = extractor.extract_all_calls(&html);
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].source_query, records[1].source_query);
        assert_eq!(records[0].id, "1");
        assert_eq!(records[1].id, "2");
    }

    #[test]
    fn suggestions_dedup_by_id_in_first_seen_order() {
        let extractor = CallExtractor::new();
        let block = format!(
            "{}{}{}{}",
            defining_anchor("79123456789", "5", "03.08.2026%2010:00:00", 30),
            suggestion_anchor("101", "ООО <b>Ромашка</b>"),
            suggestion_anchor("202", "ИП Иванов"),
            suggestion_anchor("101", "ООО Ромашка (дубль)"),
        );
        let html = call_row("+7 (912) 345-67-89", &block);

        let record = extractor.extract_current_call(&html).unwrap();
        let ids: Vec<_> = record.suggested_clients.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["101", "202"]);
        assert_eq!(record.suggested_clients[0].name, "ООО Ромашка");
    }

    #[test]
    fn internal_extension_row_is_discarded() {
        let extractor = CallExtractor::new();
        let internal = call_row(
            "123",
            &defining_anchor("104", "9", "03.08.2026%2010:00:00", 5),
        );
        assert!(extractor.extract_all_calls(&internal).is_empty());

        let external = call_row(
            "+7 912 345 67 89",
            &defining_anchor("79123456789", "10", "03.08.2026%2010:00:00", 5),
        );
        assert_eq!(extractor.extract_all_calls(&external).len(), 1);
    }

    #[test]
    fn noise_filtered_first_block_does_not_mask_second() {
        let extractor = CallExtractor::new();
        let html = format!(
            "{}{}",
            call_row("211", &defining_anchor("211", "1", "03.08.2026%2010:00:00", 5)),
            call_row(
                "+7 (900) 111-22-33",
                &defining_anchor("79001112233", "2", "03.08.2026%2011:00:00", 20)
            ),
        );
        let record = extractor.extract_current_call(&html).unwrap();
        assert_eq!(record.id, "2");
    }

    #[test]
    fn open_ticket_detected_from_details_link() {
        let extractor = CallExtractor::new();
        let block = format!(
            r#"{}<a href="/Tickets/Details/77">обращение</a>"#,
            defining_anchor("79123456789", "5", "03.08.2026%2010:00:00", 30),
        );
        let html = call_row("+7 (912) 345-67-89", &block);
        assert!(extractor.extract_current_call(&html).unwrap().has_open_ticket);
    }

    #[test]
    fn fallback_row_recovers_fields_and_is_marked() {
        let extractor = CallExtractor::new();
        let html = format!(
            r#"<table><tr><td>03.08.2026 09:15:00</td><td>+7 (912) 345-67-89</td><td>2 мин 5 сек</td><td><a href="{}7731">слушать</a></td></tr></table>"#,
            portal::RECORDING_PATH_FRAGMENT,
        );

        let records = extractor.extract_all_calls(&html);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.fallback_recovered);
        assert_eq!(record.id, "7731");
        assert_eq!(record.phone, "79123456789");
        assert_eq!(record.timestamp, "03.08.2026 09:15:00");
        assert_eq!(record.duration_seconds, Some(125));
        assert!(record.source_query.is_none());
    }

    #[test]
    fn fallback_skips_ids_claimed_by_blocks() {
        let extractor = CallExtractor::new();
        let html = format!(
            r#"{}<tr><td>x</td><td>+7 (912) 345-67-89</td><td><a href="{}42">запись</a></td></tr>"#,
            call_row(
                "+7 (912) 345-67-89",
                &defining_anchor("79123456789", "42", "03.08.2026%2010:00:00", 30)
            ),
            portal::RECORDING_PATH_FRAGMENT,
        );

        let records = extractor.extract_all_calls(&html);
        assert_eq!(records.len(), 1);
        assert!(!records[0].fallback_recovered);
    }

    #[test]
    fn fallback_row_without_tr_tags_uses_bounded_window() {
        let extractor = CallExtractor::new();
        let html = format!(
            r#"<div>+7 (912) 345-67-89 03.08.2026 09:15:00 40 сек <a href="{}99">запись</a></div>"#,
            portal::RECORDING_PATH_FRAGMENT,
        );

        let records = extractor.extract_all_calls(&html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].phone, "79123456789");
        assert_eq!(records[0].duration_seconds, Some(40));
    }

    #[rstest]
    #[case("звонок 2 мин 5 сек", Some(125))]
    #[case("длительность 40 сек", Some(40))]
    #[case("3 мин", Some(180))]
    #[case("без длительности", None)]
    fn duration_chain_precedence(#[case] text: &str, #[case] expected: Option<u32>) {
        assert_eq!(recover_duration(text), expected);
    }

    #[rstest]
    #[case("href=...%2B7%20%28912%29%20345-67-89...", Some("79123456789"))]
    #[case("+7 (912) 345-67-89", Some("79123456789"))]
    #[case("абонент 79123456789 позвонил", Some("79123456789"))]
    #[case("+7 912 345 67 89", Some("79123456789"))]
    #[case("внутренний 104", None)]
    fn phone_chain_normalizes(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(recover_phone(text).as_deref(), expected);
    }

    #[test]
    fn date_recovery_takes_literal_portal_format() {
        assert_eq!(
            recover_date("принят 03.08.2026 14:07:52 оператором").as_deref(),
            Some("03.08.2026 14:07:52")
        );
        assert!(recover_date("2026-08-03T14:07:52Z").is_none());
    }

    #[test]
    fn strip_tags_collapses_whitespace() {
        assert_eq!(strip_tags("  ООО <b>Ромашка</b>\n  "), "ООО Ромашка");
    }
}
