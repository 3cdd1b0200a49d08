//! Append-only store of intercepted network requests.
//!
//! Every request a visited page fires becomes exactly one [`NetworkCall`]
//! record, keyed by session and page. Records are never overwritten;
//! duplicate requests are only collapsed logically downstream during
//! analysis, never at write time.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::session::SessionId;
use crate::transport::RawNetworkEvent;

/// Largest POST body retained on a record, in bytes.
const POST_DATA_CAP: usize = 16 * 1024;

/// Event kind that produces a capture record.
const REQUEST_SENT: &str = "request_sent";

/// One intercepted network request. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkCall {
    pub session_id: SessionId,
    /// Page that fired the request (normalized crawl URL)
    pub page_url: String,
    pub url: String,
    pub method: String,
    pub host: String,
    pub pathname: String,
    /// Query parameters; key order is irrelevant to identity, so a sorted
    /// map keeps serializations canonical
    pub query_params: BTreeMap<String, String>,
    pub headers: HashMap<String, String>,
    /// Request body, capped at capture time
    pub post_data: Option<String>,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Parse a raw transport event into a capture record.
///
/// Returns None for event kinds other than request-sent and for URLs that
/// fail to parse; both are silently dropped.
pub fn parse_network_event(
    session_id: SessionId,
    page_url: &str,
    event: &RawNetworkEvent,
) -> Option<NetworkCall> {
    if event.kind != REQUEST_SENT {
        return None;
    }

    let url = Url::parse(&event.url).ok()?;
    let host = url.host_str()?.to_string();

    let query_params: BTreeMap<String, String> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let post_data = event.post_data.as_ref().map(|body| {
        let mut capped = body.clone();
        if capped.len() > POST_DATA_CAP {
            let mut end = POST_DATA_CAP;
            while !capped.is_char_boundary(end) && end > 0 {
                end -= 1;
            }
            capped.truncate(end);
        }
        capped
    });

    Some(NetworkCall {
        session_id,
        page_url: page_url.to_string(),
        url: event.url.clone(),
        method: event.method.clone(),
        host,
        pathname: url.path().to_string(),
        query_params,
        headers: event.headers.clone(),
        post_data,
        request_id: event.request_id.clone(),
        timestamp: Utc::now(),
    })
}

/// Everything captured for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionCaptures {
    pub flat: Vec<NetworkCall>,
    pub by_page: HashMap<String, Vec<NetworkCall>>,
}

impl SessionCaptures {
    fn from_calls(calls: Vec<NetworkCall>) -> Self {
        let mut by_page: HashMap<String, Vec<NetworkCall>> = HashMap::new();
        for call in &calls {
            by_page
                .entry(call.page_url.clone())
                .or_default()
                .push(call.clone());
        }
        Self { flat: calls, by_page }
    }
}

/// Storage trait for captured network calls.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// Durably append one record. Never overwrites.
    async fn append(&self, call: NetworkCall) -> StoreResult<()>;

    /// Full scan of a session.
    async fn get_all(&self, session_id: SessionId) -> StoreResult<SessionCaptures>;

    /// Delete all records for a session.
    async fn clear(&self, session_id: SessionId) -> StoreResult<()>;

    /// Delete every session. Invoked on browser-process-epoch restart: all
    /// prior session data is invalidated, not optionally.
    async fn clear_all(&self) -> StoreResult<()>;

    /// Sessions with at least one record.
    async fn sessions(&self) -> StoreResult<Vec<SessionId>>;
}

/// In-memory capture store, with an optional per-session capacity.
pub struct MemoryCaptureStore {
    calls: RwLock<HashMap<SessionId, Vec<NetworkCall>>>,
    capacity: Option<usize>,
}

impl MemoryCaptureStore {
    pub fn new() -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            capacity: None,
        }
    }

    /// Cap the number of records retained per session; appends past the cap
    /// fail with [`StoreError::CapacityExceeded`].
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }
}

impl Default for MemoryCaptureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureStore for MemoryCaptureStore {
    async fn append(&self, call: NetworkCall) -> StoreResult<()> {
        let mut calls = self.calls.write().unwrap();
        let session_calls = calls.entry(call.session_id).or_default();
        if let Some(cap) = self.capacity {
            if session_calls.len() >= cap {
                return Err(StoreError::CapacityExceeded);
            }
        }
        session_calls.push(call);
        Ok(())
    }

    async fn get_all(&self, session_id: SessionId) -> StoreResult<SessionCaptures> {
        let calls = self.calls.read().unwrap();
        Ok(SessionCaptures::from_calls(
            calls.get(&session_id).cloned().unwrap_or_default(),
        ))
    }

    async fn clear(&self, session_id: SessionId) -> StoreResult<()> {
        self.calls.write().unwrap().remove(&session_id);
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        self.calls.write().unwrap().clear();
        Ok(())
    }

    async fn sessions(&self) -> StoreResult<Vec<SessionId>> {
        Ok(self.calls.read().unwrap().keys().copied().collect())
    }
}

/// Capture store persisted as one JSONL file per session.
///
/// Keeps an in-memory index alongside the files. A failed file write
/// degrades to memory-only retention with a warning; the crawl never fails
/// because persistence did.
pub struct JsonlCaptureStore {
    dir: PathBuf,
    index: RwLock<HashMap<SessionId, Vec<NetworkCall>>>,
}

impl JsonlCaptureStore {
    /// Open a store rooted at `dir`, loading any session files already there.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut index: HashMap<SessionId, Vec<NetworkCall>> = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(session_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<SessionId>().ok())
            else {
                continue;
            };
            let content = tokio::fs::read_to_string(&path).await?;
            let calls: Vec<NetworkCall> = content
                .lines()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect();
            index.insert(session_id, calls);
        }

        Ok(Self {
            dir,
            index: RwLock::new(index),
        })
    }

    fn session_path(&self, session_id: SessionId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", session_id))
    }

    async fn append_line(&self, call: &NetworkCall) -> StoreResult<()> {
        use tokio::io::AsyncWriteExt;

        let line = serde_json::to_string(call)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.session_path(call.session_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[async_trait]
impl CaptureStore for JsonlCaptureStore {
    async fn append(&self, call: NetworkCall) -> StoreResult<()> {
        if let Err(e) = self.append_line(&call).await {
            tracing::warn!(
                session_id = %call.session_id,
                error = %e,
                "Capture write failed, retaining record in memory only"
            );
        }
        self.index
            .write()
            .unwrap()
            .entry(call.session_id)
            .or_default()
            .push(call);
        Ok(())
    }

    async fn get_all(&self, session_id: SessionId) -> StoreResult<SessionCaptures> {
        let index = self.index.read().unwrap();
        Ok(SessionCaptures::from_calls(
            index.get(&session_id).cloned().unwrap_or_default(),
        ))
    }

    async fn clear(&self, session_id: SessionId) -> StoreResult<()> {
        self.index.write().unwrap().remove(&session_id);
        match tokio::fs::remove_file(self.session_path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_all(&self) -> StoreResult<()> {
        let sessions: Vec<SessionId> = self.index.read().unwrap().keys().copied().collect();
        for session_id in sessions {
            self.clear(session_id).await?;
        }
        Ok(())
    }

    async fn sessions(&self) -> StoreResult<Vec<SessionId>> {
        Ok(self.index.read().unwrap().keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_sent(url: &str) -> RawNetworkEvent {
        RawNetworkEvent {
            kind: REQUEST_SENT.to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            post_data: None,
            request_id: "req-1".to_string(),
        }
    }

    #[test]
    fn test_parse_ignores_other_event_kinds() {
        let mut event = request_sent("https://example.com/a");
        event.kind = "response_received".to_string();

        assert!(parse_network_event(SessionId::new(), "https://example.com/", &event).is_none());
    }

    #[test]
    fn test_parse_ignores_unparseable_urls() {
        let event = request_sent("not a url");
        assert!(parse_network_event(SessionId::new(), "https://example.com/", &event).is_none());
    }

    #[test]
    fn test_parse_splits_url_parts() {
        let event = request_sent("https://api.example.com/v1/track?b=2&a=1");
        let call = parse_network_event(SessionId::new(), "https://example.com/", &event).unwrap();

        assert_eq!(call.host, "api.example.com");
        assert_eq!(call.pathname, "/v1/track");
        assert_eq!(call.query_params.get("a").unwrap(), "1");
        assert_eq!(call.query_params.get("b").unwrap(), "2");
    }

    #[test]
    fn test_parse_caps_post_data() {
        let mut event = request_sent("https://api.example.com/ingest");
        event.post_data = Some("x".repeat(POST_DATA_CAP * 2));

        let call = parse_network_event(SessionId::new(), "https://example.com/", &event).unwrap();
        assert_eq!(call.post_data.unwrap().len(), POST_DATA_CAP);
    }

    #[tokio::test]
    async fn test_memory_store_appends_never_overwrite() {
        let store = MemoryCaptureStore::new();
        let session = SessionId::new();

        for _ in 0..3 {
            let event = request_sent("https://api.example.com/track");
            let call = parse_network_event(session, "https://example.com/", &event).unwrap();
            store.append(call).await.unwrap();
        }

        let captures = store.get_all(session).await.unwrap();
        assert_eq!(captures.flat.len(), 3);
        assert_eq!(captures.by_page.get("https://example.com/").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_memory_store_capacity() {
        let store = MemoryCaptureStore::with_capacity(1);
        let session = SessionId::new();

        let event = request_sent("https://api.example.com/track");
        let call = parse_network_event(session, "https://example.com/", &event).unwrap();
        store.append(call.clone()).await.unwrap();

        assert!(matches!(
            store.append(call).await,
            Err(StoreError::CapacityExceeded)
        ));
    }

    #[tokio::test]
    async fn test_memory_store_clear_scoped_to_session() {
        let store = MemoryCaptureStore::new();
        let a = SessionId::new();
        let b = SessionId::new();

        let event = request_sent("https://api.example.com/track");
        store
            .append(parse_network_event(a, "https://example.com/", &event).unwrap())
            .await
            .unwrap();
        store
            .append(parse_network_event(b, "https://example.com/", &event).unwrap())
            .await
            .unwrap();

        store.clear(a).await.unwrap();

        assert!(store.get_all(a).await.unwrap().flat.is_empty());
        assert_eq!(store.get_all(b).await.unwrap().flat.len(), 1);
    }

    #[tokio::test]
    async fn test_jsonl_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionId::new();

        {
            let store = JsonlCaptureStore::open(dir.path()).await.unwrap();
            let event = request_sent("https://api.example.com/track?x=1");
            let call = parse_network_event(session, "https://example.com/", &event).unwrap();
            store.append(call).await.unwrap();
        }

        // Reopen and read back from disk
        let store = JsonlCaptureStore::open(dir.path()).await.unwrap();
        let captures = store.get_all(session).await.unwrap();
        assert_eq!(captures.flat.len(), 1);
        assert_eq!(captures.flat[0].host, "api.example.com");
    }

    #[tokio::test]
    async fn test_jsonl_store_clear_all_wipes_every_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlCaptureStore::open(dir.path()).await.unwrap();

        for _ in 0..2 {
            let session = SessionId::new();
            let event = request_sent("https://api.example.com/track");
            let call = parse_network_event(session, "https://example.com/", &event).unwrap();
            store.append(call).await.unwrap();
        }

        store.clear_all().await.unwrap();
        assert!(store.sessions().await.unwrap().is_empty());

        let reopened = JsonlCaptureStore::open(dir.path()).await.unwrap();
        assert!(reopened.sessions().await.unwrap().is_empty());
    }
}
