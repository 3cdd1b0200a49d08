//! Breadth-first crawl scheduler.
//!
//! Drives one browser tab through a site: dequeue, navigate, scan, harvest
//! links, capture traffic, advance. Strictly sequential; exactly one task is
//! in flight at a time because BFS ordering and the shared tab require it.
//!
//! No page is allowed to sink the crawl. Navigation errors, interactor
//! failures, and load timeouts all degrade to an empty visit record and the
//! loop advances.

use std::time::Duration;

use url::Url;

use crate::capture::{parse_network_event, CaptureStore};
use crate::session::{CrawlOutcome, CrawlSession, CrawlStatus, CrawlTask, StopFlag, VisitRecord};
use crate::transport::{BrowserTransport, PageInteractor, ScanReport};
use crate::url_norm::{is_http, normalize_url, same_origin};

const MAX_DEPTH_CEILING: u32 = 5;

/// Tunables for one crawl run.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Link-hops from the seed to follow, clamped to 0..=5
    pub max_depth: u32,
    /// Stop after this many visited pages
    pub page_limit: Option<usize>,
    /// How long to wait for a page's load-complete signal
    pub page_load_timeout: Duration,
    /// Pause after scanning so trailing requests land in the capture
    pub settle_delay: Duration,
    /// Scan attempts before a page is abandoned
    pub scan_attempts: u32,
    /// Base backoff between scan attempts
    pub scan_backoff: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            page_limit: None,
            page_load_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(400),
            scan_attempts: 3,
            scan_backoff: Duration::from_millis(500),
        }
    }
}

impl CrawlConfig {
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth.min(MAX_DEPTH_CEILING);
        self
    }

    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    pub fn with_page_load_timeout(mut self, timeout: Duration) -> Self {
        self.page_load_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// Outcome of driving one task to completion.
enum PageVisit {
    Scanned(ScanReport),
    Abandoned,
}

/// Breadth-first scheduler over an abstract browser tab.
///
/// Owns all crawl state ([`CrawlSession`]); create one instance per crawl.
pub struct CrawlScheduler<T, I, S> {
    transport: T,
    interactor: I,
    store: S,
    config: CrawlConfig,
    session: CrawlSession,
    stop: StopFlag,
    seed_origin: Option<Url>,
    had_transport_error: bool,
}

impl<T, I, S> CrawlScheduler<T, I, S>
where
    T: BrowserTransport,
    I: PageInteractor,
    S: CaptureStore,
{
    pub fn new(transport: T, interactor: I, store: S, config: CrawlConfig) -> Self {
        Self {
            transport,
            interactor,
            store,
            config: CrawlConfig {
                max_depth: config.max_depth.min(MAX_DEPTH_CEILING),
                ..config
            },
            session: CrawlSession::new(),
            stop: StopFlag::new(),
            seed_origin: None,
            had_transport_error: false,
        }
    }

    /// Handle for stopping the crawl from outside the run loop.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// State of the current (or finished) run.
    pub fn session(&self) -> &CrawlSession {
        &self.session
    }

    /// Crawl from `seed` until a termination condition is met.
    ///
    /// Resets all state and allocates a fresh session. A non-http(s) seed is
    /// a silent no-op: the outcome stays `Idle` with zero pages.
    pub async fn run(&mut self, seed: Url) -> CrawlOutcome {
        self.session = CrawlSession::new();
        self.stop.reset();
        self.had_transport_error = false;

        if !is_http(&seed) {
            tracing::debug!(url = %seed, "Ignoring non-http seed");
            return self.session.outcome(CrawlStatus::Idle);
        }

        self.session.status = CrawlStatus::Starting;
        self.seed_origin = Some(seed.clone());

        let normalized = normalize_url(&seed);
        self.session.discovered.insert(normalized);
        self.session.queue.push_back(CrawlTask {
            url: seed.clone(),
            depth: 1,
        });

        tracing::info!(
            session_id = %self.session.id,
            url = %seed,
            max_depth = self.config.max_depth,
            page_limit = ?self.config.page_limit,
            "Starting crawl"
        );

        self.session.status = CrawlStatus::Crawling;
        let status = self.crawl_loop().await;
        self.session.status = status;

        tracing::info!(
            session_id = %self.session.id,
            status = ?status,
            pages_visited = self.session.pages_visited,
            "Crawl finished"
        );

        self.session.outcome(status)
    }

    async fn crawl_loop(&mut self) -> CrawlStatus {
        loop {
            // Termination conditions, checked in order
            if self.stop.is_stopped() {
                return CrawlStatus::Stopped;
            }
            if let Some(limit) = self.config.page_limit {
                if self.session.pages_visited >= limit {
                    return self.completion_status();
                }
            }
            let Some(task) = self.session.queue.pop_front() else {
                return self.completion_status();
            };

            let normalized = normalize_url(&task.url);
            if self.session.visited.contains(&normalized) {
                continue;
            }

            tracing::debug!(
                url = %task.url,
                depth = task.depth,
                queued = self.session.queue.len(),
                "Processing page"
            );

            match self.visit_page(&task).await {
                PageVisit::Scanned(report) => self.handle_report(&task, &normalized, report).await,
                PageVisit::Abandoned => {
                    self.session
                        .record_visit(normalized.clone(), VisitRecord::empty(normalized.clone()));
                }
            }

            // Let trailing requests land before the next dequeue
            tokio::time::sleep(self.config.settle_delay).await;
            self.capture_events(&normalized).await;
        }
    }

    /// Complete, unless nothing was ever reachable.
    fn completion_status(&self) -> CrawlStatus {
        if self.session.pages_visited == 0 && self.had_transport_error {
            CrawlStatus::Failed
        } else {
            CrawlStatus::Complete
        }
    }

    /// Navigate (unless already on target) and scan, racing the load timeout.
    async fn visit_page(&mut self, task: &CrawlTask) -> PageVisit {
        let already_there = match self.transport.page_url().await {
            Ok(current) => normalize_url(&current) == normalize_url(&task.url),
            Err(_) => false,
        };

        if !already_there {
            // Race navigation against the page-load deadline. Dropping the
            // losing future means a late load-complete cannot fire anything.
            let navigated = tokio::select! {
                result = self.transport.navigate(&task.url) => Some(result),
                () = tokio::time::sleep(self.config.page_load_timeout) => None,
            };

            match navigated {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    tracing::warn!(url = %task.url, error = %e, "Navigation failed, skipping page");
                    self.had_transport_error = true;
                    return PageVisit::Abandoned;
                }
                None => {
                    tracing::warn!(
                        url = %task.url,
                        timeout_s = self.config.page_load_timeout.as_secs(),
                        "Page load timed out, skipping page"
                    );
                    return PageVisit::Abandoned;
                }
            }
        }

        match self.scan_with_retry().await {
            Ok(report) => PageVisit::Scanned(report),
            Err(e) => {
                tracing::warn!(url = %task.url, error = %e, "Scan failed, skipping page");
                self.had_transport_error = true;
                PageVisit::Abandoned
            }
        }
    }

    async fn scan_with_retry(&self) -> Result<ScanReport, crate::error::TransportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.interactor.scan(self.config.max_depth).await {
                Ok(report) => return Ok(report),
                Err(e) if attempt < self.config.scan_attempts => {
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_attempts = self.config.scan_attempts,
                        "Scan attempt failed, retrying"
                    );
                    if attempt == 2 {
                        if let Err(e) = self.interactor.reinject().await {
                            tracing::warn!(error = %e, "Re-injection failed");
                        }
                    }
                    tokio::time::sleep(self.config.scan_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record the visit and enqueue newly discovered links.
    async fn handle_report(&mut self, task: &CrawlTask, normalized: &str, report: ScanReport) {
        let Some(seed_origin) = self.seed_origin.clone() else {
            return;
        };

        // Server-side redirects land on a sibling URL; same origin means it
        // is still this page, recorded under the task's identity.
        if !same_origin(&report.url, &seed_origin) {
            tracing::warn!(
                task_url = %task.url,
                landed_on = %report.url,
                "Page left the crawl origin, recording empty visit"
            );
            self.session
                .record_visit(normalized.to_string(), VisitRecord::empty(normalized.to_string()));
            return;
        }

        let mut accepted_links = Vec::new();
        let mut enqueued = 0usize;

        for link in &report.links {
            if !is_http(link) || !same_origin(link, &seed_origin) {
                continue;
            }
            let link_normalized = normalize_url(link);
            accepted_links.push(link_normalized.clone());

            if task.depth > self.config.max_depth {
                continue;
            }
            // Discovery index is checked before the visited set, so a link
            // already sitting in the queue is never enqueued twice.
            if self.session.discovered.contains(&link_normalized)
                || self.session.visited.contains(&link_normalized)
            {
                continue;
            }
            let Ok(link_url) = Url::parse(&link_normalized) else {
                continue;
            };
            self.session.discovered.insert(link_normalized);
            self.session.queue.push_back(CrawlTask {
                url: link_url,
                depth: task.depth + 1,
            });
            enqueued += 1;
        }

        tracing::debug!(
            url = %task.url,
            links_found = report.links.len(),
            enqueued,
            "Scan complete"
        );

        self.session.record_visit(
            normalized.to_string(),
            VisitRecord {
                url: normalized.to_string(),
                dom_snapshot: Some(report.dom_snapshot),
                links: accepted_links,
                request_count: 0,
                visited_at: chrono::Utc::now(),
            },
        );
    }

    /// Drain intercepted traffic and append it to the capture store.
    async fn capture_events(&mut self, page_url: &str) {
        let events = match self.transport.drain_events().await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to drain network events");
                return;
            }
        };

        let mut recorded = 0usize;
        for event in &events {
            let Some(call) = parse_network_event(self.session.id, page_url, event) else {
                continue;
            };
            recorded += 1;
            if let Err(e) = self.store.append(call.clone()).await {
                tracing::warn!(
                    url = %call.url,
                    error = %e,
                    "Capture store append failed, keeping call in memory"
                );
                self.session.unpersisted.push(call);
            }
        }

        if let Some(visit) = self.session.visits.get_mut(page_url) {
            visit.request_count += recorded;
        }
    }
}
