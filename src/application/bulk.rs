//! Bulk history fetcher
//!
//! Walks the portal's paginated call history in fixed-size concurrent
//! batches, runs the extractor over every page, and merges the results
//! into one deduplicated set. The fetcher owns a process-wide cache of the
//! last successful result and coalesces concurrent callers onto a single
//! shared crawl: a second `fetch_all` while one is in flight awaits the
//! same future instead of starting a duplicate walk.

use std::collections::HashSet;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::events::EventEmitter;
use crate::domain::call::CallRecord;
use crate::infrastructure::config::BulkConfig;
use crate::infrastructure::extractor::CallExtractor;
use crate::infrastructure::http_client::PageFetch;

type CrawlResult = Arc<Vec<CallRecord>>;
type SharedCrawl = Shared<BoxFuture<'static, CrawlResult>>;

#[derive(Default)]
struct BulkState {
    /// Last crawl's accumulator, successful or aborted.
    cache: Option<CrawlResult>,
    /// Shared handle to the crawl in flight, if any.
    in_flight: Option<SharedCrawl>,
}

pub struct BulkHistoryFetcher {
    fetcher: Arc<dyn PageFetch>,
    extractor: Arc<CallExtractor>,
    emitter: EventEmitter,
    config: BulkConfig,
    state: Arc<Mutex<BulkState>>,
}

impl BulkHistoryFetcher {
    pub fn new(
        fetcher: Arc<dyn PageFetch>,
        extractor: Arc<CallExtractor>,
        emitter: EventEmitter,
        config: BulkConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            emitter,
            config,
            state: Arc::new(Mutex::new(BulkState::default())),
        }
    }

    /// Fetch the full call history.
    ///
    /// `force_refresh = false` with a non-empty cache short-circuits
    /// without any network activity, the cheap path the login-time
    /// history reconciliation relies on. Concurrent callers share one
    /// crawl; a new one only starts when nothing is in flight.
    pub async fn fetch_all(&self, force_refresh: bool, emit_progress: bool) -> CrawlResult {
        let shared = {
            let mut st = self.state.lock().await;

            if !force_refresh {
                if let Some(cache) = &st.cache {
                    if !cache.is_empty() {
                        debug!("Bulk fetch served from cache ({} records)", cache.len());
                        return Arc::clone(cache);
                    }
                }
            }

            if let Some(in_flight) = &st.in_flight {
                debug!("Bulk fetch coalesced onto crawl in flight");
                in_flight.clone()
            } else {
                let fetcher = Arc::clone(&self.fetcher);
                let extractor = Arc::clone(&self.extractor);
                let emitter = self.emitter.clone();
                let config = self.config.clone();
                let state = Arc::clone(&self.state);

                let crawl = async move {
                    let records =
                        Self::crawl(fetcher, extractor, emitter, config, emit_progress).await;
                    let result: CrawlResult = Arc::new(records);
                    // Runs on every exit path of the crawl, so a failed or
                    // aborted walk can never wedge future attempts: the
                    // accumulator becomes the cache and the in-flight
                    // marker is cleared.
                    let mut st = state.lock().await;
                    st.cache = Some(Arc::clone(&result));
                    st.in_flight = None;
                    result
                }
                .boxed()
                .shared();
                st.in_flight = Some(crawl.clone());
                crawl
            }
        };

        shared.await
    }

    /// Cached result of the last crawl, if any.
    pub async fn cached(&self) -> Option<CrawlResult> {
        self.state.lock().await.cache.clone()
    }

    /// Walk history pages in concurrent batches until the page cap, an
    /// empty page ("end of history") or an unauthenticated page 1.
    async fn crawl(
        fetcher: Arc<dyn PageFetch>,
        extractor: Arc<CallExtractor>,
        emitter: EventEmitter,
        config: BulkConfig,
        emit_progress: bool,
    ) -> Vec<CallRecord> {
        let max_pages = config.max_pages.max(1);
        let batch_size = config.batch_size.max(1);

        let mut all: Vec<CallRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut next_page = 1u32;
        let mut stop = false;

        while !stop && next_page <= max_pages {
            let batch_end = (next_page + batch_size - 1).min(max_pages);
            debug!("Fetching history pages {}..={}", next_page, batch_end);

            let fetches = (next_page..=batch_end).map(|page| {
                let fetcher = Arc::clone(&fetcher);
                async move { (page, fetcher.fetch_history_page(page).await) }
            });
            let mut results = join_all(fetches).await;
            // Concurrency must not reorder the logical page sequence.
            results.sort_by_key(|(page, _)| *page);

            for (page, outcome) in results {
                let outcome = match outcome {
                    Ok(o) if o.ok && !o.is_login_page() => Some(o),
                    Ok(o) => {
                        warn!("History page {} unavailable (status {})", page, o.status);
                        None
                    }
                    Err(e) => {
                        warn!("History page {} fetch failed: {}", page, e);
                        None
                    }
                };

                let Some(outcome) = outcome else {
                    if page == 1 {
                        // Not authenticated, not end-of-data: abort before
                        // merging anything from this batch.
                        warn!("History page 1 unauthenticated, aborting crawl");
                        return all;
                    }
                    stop = true;
                    continue;
                };

                let records = extractor.extract_all_calls(&outcome.body);
                if records.is_empty() {
                    debug!("History page {} empty, end of history", page);
                    stop = true;
                    continue;
                }
                for record in records {
                    // Records without an id cannot be deduplicated and are
                    // carried through as-is.
                    if record.id.is_empty() || seen.insert(record.id.clone()) {
                        all.push(record);
                    }
                }
            }

            if emit_progress {
                emitter.emit_bulk_progress(all.len());
            }
            next_page = batch_end + 1;
        }

        info!("Bulk crawl finished with {} records", all.len());
        all
    }
}
