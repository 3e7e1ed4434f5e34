//! Live-calls poller
//!
//! One serialized timed loop: a cycle completes before the timer fires the
//! next, so at most one fetch is ever in flight. Each cycle doubles as the
//! auth probe (the live page itself betrays a logged-out session through
//! the login-form markers) and feeds the extractor's result into the
//! lifecycle store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::application::events::EventEmitter;
use crate::application::store::CallLifecycleStore;
use crate::infrastructure::extractor::CallExtractor;
use crate::infrastructure::http_client::PageFetch;

pub struct Poller {
    fetcher: Arc<dyn PageFetch>,
    extractor: Arc<CallExtractor>,
    store: Arc<CallLifecycleStore>,
    emitter: EventEmitter,
    interval: Duration,
    /// None until the first poll; the first emission is unconditional so
    /// observers can initialize.
    last_login_state: Option<bool>,
}

impl Poller {
    pub fn new(
        fetcher: Arc<dyn PageFetch>,
        extractor: Arc<CallExtractor>,
        store: Arc<CallLifecycleStore>,
        emitter: EventEmitter,
        interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            store,
            emitter,
            interval,
            last_login_state: None,
        }
    }

    /// Drive the poll loop forever. Missed ticks are delayed, not bursty:
    /// a slow cycle pushes the next one back instead of piling up.
    pub async fn run(mut self) {
        info!("Poller started (interval: {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// One poll cycle: auth check, extraction, store feed.
    pub async fn poll_once(&mut self) {
        let body = match self.fetcher.fetch_live_page().await {
            Ok(outcome) if outcome.ok && !outcome.is_login_page() => Some(outcome.body),
            Ok(outcome) => {
                debug!(
                    "live page unavailable (status {}, login page: {})",
                    outcome.status,
                    outcome.is_login_page()
                );
                None
            }
            Err(e) => {
                warn!("Live page fetch failed: {}", e);
                None
            }
        };

        let logged_in = body.is_some();
        if self.last_login_state != Some(logged_in) {
            info!("Login state changed: logged_in={}", logged_in);
            self.emitter.emit_login_status(logged_in);
            self.last_login_state = Some(logged_in);
        }

        let Some(body) = body else {
            return;
        };

        let record = match self.extractor.extract_current_call(&body) {
            Some(mut record) => {
                // Remembered client for this phone number rides along with
                // the record, ahead of the portal's own suggestions.
                if let Some(client) = self.store.association_for(&record.phone).await {
                    if !record.suggested_clients.iter().any(|s| s.id == client.id) {
                        record.suggested_clients.insert(0, client);
                    }
                }
                Some(record)
            }
            None => None,
        };

        self.store.observe(record).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::SuggestedClient;
    use crate::domain::events::WatcherEvent;
    use crate::infrastructure::http_client::FetchOutcome;
    use crate::infrastructure::storage::StateStorage;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    struct ScriptedFetch {
        live_pages: Mutex<VecDeque<Result<FetchOutcome>>>,
    }

    impl ScriptedFetch {
        fn new(pages: Vec<Result<FetchOutcome>>) -> Arc<Self> {
            Arc::new(Self {
                live_pages: Mutex::new(pages.into()),
            })
        }
    }

    #[async_trait]
    impl PageFetch for ScriptedFetch {
        async fn fetch_live_page(&self) -> Result<FetchOutcome> {
            self.live_pages
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(page("")))
        }

        async fn fetch_history_page(&self, _page: u32) -> Result<FetchOutcome> {
            Ok(page(""))
        }
    }

    fn page(body: &str) -> FetchOutcome {
        FetchOutcome {
            ok: true,
            status: 200,
            final_url: "https://portal.example/Calls".into(),
            body: body.to_string(),
        }
    }

    fn call_page(phone: &str, id: &str) -> FetchOutcome {
        page(&format!(
            r#"<tr><td>x</td><td>+7 (912) 345-67-89</td><td><a href="/Tickets/Create?selectedPhoneNuber={phone}&amp;linkedId={id}&amp;selectedPhoneDate=03.08.2026%2010:00:00&amp;selectedPhoneDuration=30">звонок</a></td></tr>"#
        ))
    }

    fn login_page() -> FetchOutcome {
        page("<form><input type=\"password\"><button>Войти</button></form>")
    }

    fn poller_with(fetcher: Arc<dyn PageFetch>) -> (Poller, Arc<CallLifecycleStore>, EventEmitter) {
        let emitter = EventEmitter::new();
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(StateStorage::new(
            dir.path().to_path_buf(),
            Duration::from_secs(60),
        ));
        let store = Arc::new(CallLifecycleStore::new(emitter.clone(), storage));
        let poller = Poller::new(
            fetcher,
            Arc::new(CallExtractor::new()),
            Arc::clone(&store),
            emitter.clone(),
            Duration::from_secs(10),
        );
        (poller, store, emitter)
    }

    fn drain_login_events(rx: &mut tokio::sync::broadcast::Receiver<WatcherEvent>) -> Vec<bool> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WatcherEvent::LoginStatusChanged(state) = event {
                states.push(state);
            }
        }
        states
    }

    #[tokio::test]
    async fn first_poll_always_emits_login_state() {
        let fetcher = ScriptedFetch::new(vec![Ok(page("<table></table>"))]);
        let (mut poller, _store, emitter) = poller_with(fetcher);
        let mut rx = emitter.subscribe();

        poller.poll_once().await;
        assert_eq!(drain_login_events(&mut rx), vec![true]);
    }

    #[tokio::test]
    async fn login_state_is_edge_triggered() {
        let fetcher = ScriptedFetch::new(vec![
            Ok(page("")),
            Ok(page("")),
            Ok(login_page()),
            Ok(login_page()),
            Ok(page("")),
        ]);
        let (mut poller, _store, emitter) = poller_with(fetcher);
        let mut rx = emitter.subscribe();

        for _ in 0..5 {
            poller.poll_once().await;
        }
        assert_eq!(drain_login_events(&mut rx), vec![true, false, true]);
    }

    #[tokio::test]
    async fn fetch_failure_counts_as_logged_out() {
        let fetcher = ScriptedFetch::new(vec![Err(anyhow::anyhow!("connection refused"))]);
        let (mut poller, _store, emitter) = poller_with(fetcher);
        let mut rx = emitter.subscribe();

        poller.poll_once().await;
        assert_eq!(drain_login_events(&mut rx), vec![false]);
    }

    #[tokio::test]
    async fn observed_call_lands_in_the_store() {
        let fetcher = ScriptedFetch::new(vec![Ok(call_page("79123456789", "77"))]);
        let (mut poller, store, _emitter) = poller_with(fetcher);

        poller.poll_once().await;
        assert_eq!(store.current_call().await.unwrap().id, "77");
    }

    #[tokio::test]
    async fn remembered_client_is_merged_into_suggestions() {
        let fetcher = ScriptedFetch::new(vec![Ok(call_page("79123456789", "77"))]);
        let (mut poller, store, _emitter) = poller_with(fetcher);
        store
            .associate_client(
                "79123456789",
                SuggestedClient {
                    id: "500".into(),
                    name: "ИП Иванов".into(),
                },
            )
            .await;

        poller.poll_once().await;
        let record = store.current_call().await.unwrap();
        assert_eq!(record.suggested_clients[0].id, "500");
    }
}
