//! Huginn error types

use std::time::Duration;

/// Huginn error types
///
/// `Clone` so a single in-flight outcome can be handed to every caller that
/// joined the same cache key.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HuginnError {
    // Upstream errors
    /// The provider signalled rate limiting (HTTP 429 or equivalent).
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// No credential configured for this context (and no default).
    #[error("generation unavailable for context '{context}'")]
    Unavailable { context: String },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("LLM error: {0}")]
    Llm(String),

    // Soft errors
    #[error("empty response from model")]
    EmptyResponse,

    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    /// A write would exceed the store's byte quota.
    #[error("storage full: write of {needed} bytes exceeds capacity of {capacity} bytes")]
    StorageFull { needed: usize, capacity: usize },

    // Data errors
    #[error("JSON error: {0}")]
    Json(String),

    /// A cache key could not be built from the request (missing or malformed field).
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl HuginnError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Upstream(_))
    }

    /// Provider back-off hint carried by [`HuginnError::RateLimited`].
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether this is a storage capacity failure that a sweep may resolve.
    pub fn is_storage_full(&self) -> bool {
        matches!(self, Self::StorageFull { .. })
    }
}

impl From<serde_json::Error> for HuginnError {
    fn from(err: serde_json::Error) -> Self {
        HuginnError::Json(err.to_string())
    }
}

impl From<std::io::Error> for HuginnError {
    fn from(err: std::io::Error) -> Self {
        HuginnError::Storage(err.to_string())
    }
}

impl From<llm::error::LLMError> for HuginnError {
    fn from(err: llm::error::LLMError) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("rate limit")
            || msg.contains("429")
            || lower.contains("resource_exhausted")
            || lower.contains("quota")
        {
            HuginnError::RateLimited { retry_after: None }
        } else if lower.contains("timed out")
            || lower.contains("connection")
            || msg.contains("500")
            || msg.contains("502")
            || msg.contains("503")
        {
            HuginnError::Upstream(msg)
        } else {
            HuginnError::Llm(msg)
        }
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
