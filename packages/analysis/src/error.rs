//! Typed errors for the analysis library.

use thiserror::Error;

/// Errors that can occur during an analysis run.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The session has no captured calls to analyze
    #[error("no captured data for session")]
    NoData,

    /// Model call failed after all retries for one batch
    #[error("model call failed for batch {batch}: {source}")]
    Model {
        batch: usize,
        #[source]
        source: ai_client::AiError,
    },

    /// Model response could not be parsed into classifications
    #[error("malformed model response: {excerpt}")]
    MalformedResponse { excerpt: String },

    /// Classification storage failed
    #[error("classification storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;
