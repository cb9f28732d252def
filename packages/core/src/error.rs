//! Typed errors shared by the spider and the search service.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

/// Errors that can occur while crawling and storing pages.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// HTTP request failed
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Response carried a non-success status
    #[error("non-200 status {status} for {url}")]
    Status { url: String, status: u16 },

    /// robots.txt disallows the path
    #[error("robots.txt disallows: {url}")]
    RobotsDenied { url: String },

    /// robots.txt could not be obtained; the gate fails closed
    #[error("robots.txt unavailable for {origin}: {reason}")]
    RobotsUnavailable { origin: String, reason: String },

    /// HTML or URL parsing failed
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Relational-store operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector-store operation failed
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// Operation exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// Operation was cancelled by shutdown
    #[error("operation cancelled")]
    Cancelled,
}

/// Errors that can occur while answering a search query.
#[derive(Debug, Error)]
pub enum SearchError {
    /// LLM call failed or returned an unusable payload
    #[error("LLM error: {0}")]
    Llm(String),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector-store search failed
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// A pipeline stage exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// The session was cancelled or closed
    #[error("operation cancelled")]
    Cancelled,

    /// Malformed inbound frame or undeliverable outbound frame
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for crawl operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

/// Result type alias for search operations.
pub type SearchResult<T> = std::result::Result<T, SearchError>;
