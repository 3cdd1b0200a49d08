//! Error types for the AI client.

use thiserror::Error;

/// Result type for AI client operations.
pub type Result<T> = std::result::Result<T, AiError>;

/// AI client errors.
///
/// The `Network` variant is kept distinct from `Api` because callers apply a
/// longer retry backoff to network-class failures.
#[derive(Debug, Error)]
pub enum AiError {
    /// Configuration error (missing API key, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// API error (non-2xx response, rate limit, invalid request)
    #[error("API error: {0}")]
    Api(String),

    /// Parse error (invalid JSON, unexpected response format)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl AiError {
    /// Whether this error class warrants the longer network backoff.
    pub fn is_network(&self) -> bool {
        matches!(self, AiError::Network(_))
    }
}
