#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{info, warn};

use callwatch_lib::application::{BulkHistoryFetcher, CallLifecycleStore, EventEmitter, Poller};
use callwatch_lib::domain::WatcherEvent;
use callwatch_lib::infrastructure::http_client::PageFetch;
use callwatch_lib::infrastructure::{
    CallExtractor, ConfigManager, PortalClient, StateStorage, logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_manager = ConfigManager::new()?;
    let config = config_manager.load_config().await?;
    logging::init_logging_with_config(config.logging.clone())?;
    info!("🚀 Callwatch starting");

    let emitter = EventEmitter::new();
    let storage = Arc::new(StateStorage::new(
        ConfigManager::config_dir()?,
        Duration::from_millis(config.history.draft_debounce_ms),
    ));

    let store = Arc::new(CallLifecycleStore::with_retention(
        emitter.clone(),
        Arc::clone(&storage),
        config.history.retention,
    ));
    store
        .hydrate(storage.load_history().await, storage.load_associations().await)
        .await;

    let fetcher: Arc<dyn PageFetch> = Arc::new(PortalClient::new(&config.portal)?);
    let extractor = Arc::new(CallExtractor::new());

    let bulk = Arc::new(BulkHistoryFetcher::new(
        Arc::clone(&fetcher),
        Arc::clone(&extractor),
        emitter.clone(),
        config.bulk.clone(),
    ));

    // Stand-in for the UI collaborator: log surfaced events and run the
    // login-time history reconciliation off the auth edge.
    let mut events = emitter.subscribe();
    let reconcile_store = Arc::clone(&store);
    let reconcile_bulk = Arc::clone(&bulk);
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WatcherEvent::LoginStatusChanged(true)) => {
                    info!("Logged in, reconciling history with portal");
                    let records = reconcile_bulk.fetch_all(false, true).await;
                    reconcile_store.merge_history(records.as_ref().clone()).await;
                }
                Ok(WatcherEvent::LoginStatusChanged(false)) => {
                    warn!("Portal session lost, login required");
                }
                Ok(WatcherEvent::NotifyNewCall(record)) => {
                    info!("New call: {} at {}", record.phone, record.timestamp);
                }
                Ok(WatcherEvent::BulkProgress(count)) => {
                    info!("History fetch progress: {} records", count);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event consumer lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let poller = Poller::new(
        Arc::clone(&fetcher),
        extractor,
        Arc::clone(&store),
        emitter,
        Duration::from_secs(config.portal.poll_interval_seconds),
    );
    tokio::spawn(poller.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, flushing persisted state");
    store.flush_persistence().await;
    Ok(())
}
