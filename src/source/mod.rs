//! Content sources: paginated, newest-first search over a short-video API.
//!
//! The sync engine only sees the [`ContentSource`] trait. A source answers a
//! [`SearchQuery`] one page at a time and either returns the whole page or an
//! error; it never hands back partial results.
//!
//! - [`RedgifsClient`] - HTTP client for the RedGifs v2 API, including its
//!   temporary-token handshake

mod redgifs;

use async_trait::async_trait;
use thiserror::Error;

pub use redgifs::{RedgifsClient, DEFAULT_BASE_URL};

/// What to search for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Items carrying all of these tags
    Tags(Vec<String>),
    /// Items uploaded by this creator
    Creator(String),
}

/// One search result, as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    /// Stable, unique per source
    pub id: String,
    /// Playable media URL; `None` when the source exposes no usable rendition
    pub url: Option<String>,
    pub author: String,
    /// Unix seconds
    pub created_at: i64,
}

/// Errors a content source can surface for a single page request.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Payload did not match the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// Could not obtain or decode an access token
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Base URL is not HTTPS and not a loopback address
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

/// A paginated search interface returning newest-first results.
///
/// Pages are 1-based. Implementations handle their own authentication and
/// session refresh.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn search(
        &self,
        query: &SearchQuery,
        count: u32,
        page: u32,
    ) -> Result<Vec<ContentItem>, SourceError>;

    async fn search_by_tags(
        &self,
        tags: &[String],
        count: u32,
        page: u32,
    ) -> Result<Vec<ContentItem>, SourceError> {
        self.search(&SearchQuery::Tags(tags.to_vec()), count, page)
            .await
    }

    async fn search_by_creator(
        &self,
        username: &str,
        count: u32,
        page: u32,
    ) -> Result<Vec<ContentItem>, SourceError> {
        self.search(&SearchQuery::Creator(username.to_string()), count, page)
            .await
    }
}
