//! Seams to the browser automation transport and in-page collaborator.
//!
//! The crawler never talks to a real browser directly. Hosts supply these
//! two traits (a debugging-protocol transport and an injected interaction
//! script); the scheduler depends only on their contracts, which also keeps
//! the crawl loop mockable in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use url::Url;

use crate::error::TransportError;

/// A raw network event as delivered by the browser transport.
///
/// Only `request_sent` events become capture records; other kinds are
/// ignored at parse time.
#[derive(Debug, Clone)]
pub struct RawNetworkEvent {
    /// Event kind, e.g. "request_sent", "response_received"
    pub kind: String,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub post_data: Option<String>,
    pub request_id: String,
}

/// Report produced by the in-page collaborator after a scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// URL the page actually ended up on (may differ from the task URL
    /// after a server-side redirect)
    pub url: Url,
    pub dom_snapshot: String,
    /// Links found on the page, any origin; the scheduler filters
    pub links: Vec<Url>,
}

/// Navigation and traffic interception surface of the browser.
#[async_trait]
pub trait BrowserTransport: Send + Sync {
    /// Navigate the tab to `url`. Resolves when the load-complete signal
    /// arrives; the caller races this against its own timeout.
    async fn navigate(&self, url: &Url) -> Result<(), TransportError>;

    /// URL the tab is currently on.
    async fn page_url(&self) -> Result<Url, TransportError>;

    /// Take all network events observed since the previous drain.
    async fn drain_events(&self) -> Result<Vec<RawNetworkEvent>, TransportError>;
}

/// The injected page-interaction collaborator (auto-scroll, consent clicks,
/// link harvesting).
#[async_trait]
pub trait PageInteractor: Send + Sync {
    /// Run a scan of the current page and report back.
    async fn scan(&self, max_depth: u32) -> Result<ScanReport, TransportError>;

    /// Re-inject the collaborator into the page after messaging failures.
    async fn reinject(&self) -> Result<(), TransportError>;
}
