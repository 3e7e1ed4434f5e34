//! HTTP access to the portal with session cookies
//!
//! The engine treats the network as a collaborator with a deliberately flat
//! contract: a fetch yields a `FetchOutcome` whose `ok` flag folds together
//! non-2xx statuses and login redirects. Callers never distinguish timeout
//! from error from redirect. Transport failures surface as `Err` and are
//! mapped to the same "not authenticated" / "stop crawl" signals upstream.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, warn};

use crate::infrastructure::config::PortalConfig;
use crate::infrastructure::portal;

/// Result of one portal page fetch. Mirrors what the engine needs from the
/// browser-style fetch contract: status, final URL after redirects, body.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub ok: bool,
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

impl FetchOutcome {
    /// True when the response content is the portal's login page (either
    /// served in place or reached through a redirect).
    pub fn is_login_page(&self) -> bool {
        portal::is_login_page(&self.body)
    }
}

/// Seam between the engine and the network. The poller and bulk fetcher
/// only know this trait; tests drive them with scripted pages.
#[async_trait]
pub trait PageFetch: Send + Sync {
    /// Fetch the live-calls page.
    async fn fetch_live_page(&self) -> Result<FetchOutcome>;

    /// Fetch one 1-based history page.
    async fn fetch_history_page(&self, page: u32) -> Result<FetchOutcome>;
}

/// Portal HTTP client with a persistent cookie session.
#[derive(Clone)]
pub struct PortalClient {
    client: Client,
    live_url: String,
    history_base: String,
}

impl PortalClient {
    pub fn new(config: &PortalConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(&config.user_agent)
            .cookie_store(true)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create portal HTTP client")?;

        Ok(Self {
            client,
            live_url: config.live_calls_url(),
            history_base: config.history_url_base(),
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<FetchOutcome> {
        debug!("HTTP GET: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?;

        let status = response.status();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body: {url}"))?;

        if !status.is_success() {
            warn!("HTTP {} for {}", status, url);
        }

        Ok(FetchOutcome {
            ok: status.is_success(),
            status: status.as_u16(),
            final_url,
            body,
        })
    }
}

#[async_trait]
impl PageFetch for PortalClient {
    async fn fetch_live_page(&self) -> Result<FetchOutcome> {
        self.fetch_page(&self.live_url).await
    }

    async fn fetch_history_page(&self, page: u32) -> Result<FetchOutcome> {
        let url = if page <= 1 {
            self.history_base.clone()
        } else {
            format!("{}?page={}", self.history_base, page)
        };
        self.fetch_page(&url).await
    }
}
