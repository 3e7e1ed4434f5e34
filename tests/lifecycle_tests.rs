//! Cross-component tests for the call lifecycle store: retention, the
//! status state machine, notification gating and persistence.

use std::sync::Arc;
use std::time::Duration;

use callwatch_lib::application::{CallLifecycleStore, EventEmitter};
use callwatch_lib::domain::{CallRecord, CallStatus, TicketDraft, WatcherEvent};
use callwatch_lib::infrastructure::StateStorage;

fn record(id: &str) -> CallRecord {
    CallRecord {
        id: id.to_string(),
        phone: "79123456789".to_string(),
        timestamp: "03.08.2026 10:00:00".to_string(),
        ..Default::default()
    }
}

fn build_store() -> (Arc<CallLifecycleStore>, EventEmitter, Arc<StateStorage>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let emitter = EventEmitter::new();
    let storage = Arc::new(StateStorage::new(
        dir.path().to_path_buf(),
        Duration::from_secs(60),
    ));
    let store = Arc::new(CallLifecycleStore::new(emitter.clone(), Arc::clone(&storage)));
    (store, emitter, storage, dir)
}

fn drain_notifications(rx: &mut tokio::sync::broadcast::Receiver<WatcherEvent>) -> Vec<String> {
    let mut ids = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let WatcherEvent::NotifyNewCall(record) = event {
            ids.push(record.id);
        }
    }
    ids
}

#[tokio::test]
async fn retention_keeps_the_newest_250_entries() {
    let (store, _emitter, _storage, _dir) = build_store();

    for i in 1..=260 {
        store.observe(Some(record(&i.to_string()))).await;
    }

    let history = store.history().await;
    assert_eq!(history.len(), 250);
    // Newest first; the oldest ten were evicted.
    assert_eq!(history[0].id(), "260");
    assert_eq!(history[249].id(), "11");
    assert!(store.entry("10").await.is_none());
    assert!(store.entry("11").await.is_some());
}

#[tokio::test]
async fn skip_then_create_ends_created() {
    let (store, _emitter, _storage, _dir) = build_store();
    store.observe(Some(record("a"))).await;

    store.skip("a").await;
    assert_eq!(store.entry("a").await.unwrap().status, CallStatus::Skipped);

    store.mark_created("a", Some("https://portal.example/Tickets/Details/9".into())).await;
    let entry = store.entry("a").await.unwrap();
    assert_eq!(entry.status, CallStatus::Created);
    assert!(entry.ticket_url.is_some());
}

#[tokio::test]
async fn create_then_skip_stays_created() {
    let (store, _emitter, _storage, _dir) = build_store();
    store.observe(Some(record("a"))).await;

    store.mark_created("a", Some("https://portal.example/Tickets/Details/9".into())).await;
    store.skip("a").await;

    let entry = store.entry("a").await.unwrap();
    assert_eq!(entry.status, CallStatus::Created);
    assert_eq!(
        entry.ticket_url.as_deref(),
        Some("https://portal.example/Tickets/Details/9")
    );
}

#[tokio::test]
async fn first_poll_never_notifies_pre_existing_calls() {
    let (store, emitter, _storage, _dir) = build_store();
    store
        .hydrate(
            vec![callwatch_lib::domain::HistoryEntry::new(record("x"))],
            Default::default(),
        )
        .await;

    let mut rx = emitter.subscribe();

    // First successful poll re-observes the pre-existing call.
    store.observe(Some(record("x"))).await;
    assert!(drain_notifications(&mut rx).is_empty());

    // A genuinely new call on a later poll still notifies.
    store.observe(Some(record("y"))).await;
    assert_eq!(drain_notifications(&mut rx), vec!["y".to_string()]);
}

#[tokio::test]
async fn each_call_notifies_exactly_once() {
    let (store, emitter, _storage, _dir) = build_store();
    // Burn the first-poll seeding with an empty poll.
    store.observe(None).await;

    let mut rx = emitter.subscribe();
    store.observe(Some(record("a"))).await;
    store.observe(Some(record("a"))).await;
    store.observe(Some(record("a"))).await;

    assert_eq!(drain_notifications(&mut rx), vec!["a".to_string()]);
}

#[tokio::test]
async fn skipped_call_never_returns_to_the_live_slot() {
    let (store, emitter, _storage, _dir) = build_store();
    store.observe(None).await;

    store.observe(Some(record("a"))).await;
    store.skip("a").await;
    store.observe(None).await;
    assert!(store.current_call().await.is_none());

    let mut rx = emitter.subscribe();
    // The portal still shows the call; it must not resurrect or notify.
    store.observe(Some(record("a"))).await;
    assert!(store.current_call().await.is_none());
    assert!(drain_notifications(&mut rx).is_empty());
}

#[tokio::test]
async fn re_observation_keeps_first_extracted_fields() {
    let (store, _emitter, _storage, _dir) = build_store();
    store.observe(Some(record("a"))).await;

    let mut changed = record("a");
    changed.phone = "70000000000".to_string();
    store.observe(Some(changed.clone())).await;

    // History keeps the first extraction; the live slot shows the fresh one.
    assert_eq!(store.entry("a").await.unwrap().record.phone, record("a").phone);
    assert_eq!(store.current_call().await.unwrap().phone, changed.phone);
}

#[tokio::test]
async fn merge_history_appends_unseen_and_suppresses_notification() {
    let (store, emitter, _storage, _dir) = build_store();
    store.observe(None).await;
    store.observe(Some(record("live"))).await;

    store.merge_history(vec![record("live"), record("old1"), record("old2")]).await;

    let history = store.history().await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].id(), "live");
    assert_eq!(history[1].id(), "old1");

    let mut rx = emitter.subscribe();
    store.observe(Some(record("old1"))).await;
    assert!(drain_notifications(&mut rx).is_empty());
}

#[tokio::test]
async fn drafts_survive_a_flush_round_trip() {
    let (store, emitter, storage, _dir) = build_store();
    store.observe(Some(record("a"))).await;

    store
        .save_draft(
            "a",
            TicketDraft {
                topic: "Повторный звонок".to_string(),
                comment: "клиент просил перезвонить".to_string(),
                client: None,
            },
        )
        .await;
    store.flush_persistence().await;

    let reloaded = storage.load_history().await;
    assert_eq!(reloaded.len(), 1);
    let draft = reloaded[0].draft.as_ref().unwrap();
    assert_eq!(draft.topic, "Повторный звонок");

    // A fresh store hydrated from disk picks the entry back up.
    let store2 = CallLifecycleStore::new(emitter.clone(), Arc::clone(&storage));
    store2.hydrate(reloaded, Default::default()).await;
    assert!(store2.entry("a").await.unwrap().draft.is_some());
}

#[tokio::test]
async fn clear_history_empties_the_log() {
    let (store, _emitter, _storage, _dir) = build_store();
    store.observe(Some(record("a"))).await;
    store.observe(Some(record("b"))).await;

    store.clear_history().await;
    assert!(store.history().await.is_empty());
}
