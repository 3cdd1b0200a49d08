//! Per-crawl session state.
//!
//! All mutable crawl state lives in a [`CrawlSession`] owned by one scheduler
//! instance. Concurrent crawls each need their own instance; nothing here is
//! shared or global.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Identifier scoping one crawl or recording run.
///
/// All capture store, similarity index, and classification store entries are
/// keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A page queued for visiting. Created at link discovery, consumed at dequeue.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub url: Url,
    pub depth: u32,
}

/// What the scheduler learned about one visited page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRecord {
    /// Normalized URL the record is keyed by
    pub url: String,
    /// Raw DOM snapshot, absent when the page timed out or scanning failed
    pub dom_snapshot: Option<String>,
    /// Same-origin links discovered on the page
    pub links: Vec<String>,
    /// Network requests captured while on the page
    pub request_count: usize,
    pub visited_at: DateTime<Utc>,
}

impl VisitRecord {
    /// Record for a page that was abandoned before it produced anything.
    pub fn empty(url: String) -> Self {
        Self {
            url,
            dom_snapshot: None,
            links: Vec::new(),
            request_count: 0,
            visited_at: Utc::now(),
        }
    }
}

/// Crawl lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Idle,
    Starting,
    Crawling,
    Complete,
    Stopped,
    Failed,
}

/// Final report of a crawl run.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub session_id: SessionId,
    pub status: CrawlStatus,
    pub pages_visited: usize,
}

/// Cooperative stop signal shared between a scheduler and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the crawl stop at the next loop iteration.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// All mutable state for one crawl run. Single-writer by construction: only
/// the owning scheduler touches it.
#[derive(Debug)]
pub struct CrawlSession {
    pub id: SessionId,
    pub status: CrawlStatus,
    /// FIFO task queue; FIFO order plus child-append yields BFS depth order
    pub queue: VecDeque<CrawlTask>,
    /// Normalized URLs already navigated to
    pub visited: HashSet<String>,
    /// Normalized URLs ever enqueued (checked before `visited` so in-flight
    /// links are not enqueued twice)
    pub discovered: HashSet<String>,
    /// Visit records keyed by normalized URL
    pub visits: HashMap<String, VisitRecord>,
    /// Calls that could not be persisted; non-authoritative fallback only
    /// valid while the crawl is active
    pub unpersisted: Vec<crate::capture::NetworkCall>,
    pub pages_visited: usize,
}

impl CrawlSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            status: CrawlStatus::Idle,
            queue: VecDeque::new(),
            visited: HashSet::new(),
            discovered: HashSet::new(),
            visits: HashMap::new(),
            unpersisted: Vec::new(),
            pages_visited: 0,
        }
    }

    /// Mark a page visited and store its record.
    pub fn record_visit(&mut self, normalized: String, record: VisitRecord) {
        if self.visited.insert(normalized.clone()) {
            self.pages_visited += 1;
        }
        self.visits.insert(normalized, record);
    }

    pub fn outcome(&self, status: CrawlStatus) -> CrawlOutcome {
        CrawlOutcome {
            session_id: self.id,
            status,
            pages_visited: self.pages_visited,
        }
    }
}

impl Default for CrawlSession {
    fn default() -> Self {
        Self::new()
    }
}
