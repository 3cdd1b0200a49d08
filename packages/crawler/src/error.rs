//! Typed errors for the crawler library.

use thiserror::Error;

/// Errors raised by the browser transport or page interactor collaborators.
///
/// All of these are treated as non-fatal by the scheduler: the offending
/// page is skipped and the crawl continues.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Navigation to a URL failed
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The browser tab could not be found or addressed
    #[error("tab lookup failed: {0}")]
    TabLookup(String),

    /// Messaging the in-page collaborator failed
    #[error("page messaging failed: {0}")]
    Messaging(String),

    /// Re-injecting the in-page collaborator failed
    #[error("injection failed: {0}")]
    Injection(String),
}

/// Errors from capture store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage capacity exceeded
    #[error("capture capacity exceeded for session")]
    CapacityExceeded,

    /// Underlying I/O failure
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record serialization failure
    #[error("storage serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
