//! Same-origin breadth-first crawler over an abstract browser transport.
//!
//! The crawler drives a single browser tab supplied by a host (a debugging
//! protocol connection, an extension, a test double) through a site,
//! breadth-first, recording every network request each visited page fires
//! into a session-scoped capture store.

pub mod capture;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod url_norm;

pub use capture::{
    parse_network_event, CaptureStore, JsonlCaptureStore, MemoryCaptureStore, NetworkCall,
    SessionCaptures,
};
pub use error::{StoreError, TransportError};
pub use scheduler::{CrawlConfig, CrawlScheduler};
pub use session::{CrawlOutcome, CrawlSession, CrawlStatus, CrawlTask, SessionId, StopFlag, VisitRecord};
pub use transport::{BrowserTransport, PageInteractor, RawNetworkEvent, ScanReport};
pub use url_norm::{is_http, normalize_url, same_origin};
