//! Page fetching: headers, timeouts, size caps, and content-type filtering.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use searchlight_core::error::{CrawlError, CrawlResult};

/// User agent announced to crawled sites.
pub const USER_AGENT: &str = "FroxyBot/1.0";

const ACCEPT_HEADER: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Overall per-request deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies are truncated at this size.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// URL suffixes that never contain crawlable HTML.
const BINARY_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".svg", ".pdf", ".doc", ".docx", ".xls",
    ".xlsx", ".ppt", ".pptx", ".zip", ".rar", ".tar", ".gz", ".7z", ".mp3", ".mp4", ".wav",
    ".avi", ".mov", ".wmv", ".css", ".js", ".ico", ".xml", ".json", ".php",
];

const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml", "text/plain"];

/// A fetched page body plus the response facts the extractor needs.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub status_code: u16,
    pub content_type: String,
    pub response_time_ms: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// HTTP fetcher sharing one pooled client across workers.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build the client the spider uses for page fetches, sitemaps, and
    /// robots.txt.
    pub fn build_client() -> CrawlResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CrawlError::Fetch {
                url: String::new(),
                source: Box::new(e),
            })
    }

    /// Fetch one page. Returns `Ok(None)` when the response is not HTML-like
    /// and should be silently skipped; non-200 statuses are errors.
    pub async fn fetch(&self, url: &str) -> CrawlResult<Option<FetchedPage>> {
        let start = Instant::now();

        let response = self
            .client
            .get(url)
            .header("Accept", ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| CrawlError::Fetch {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let response_time_ms = start.elapsed().as_millis() as i64;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_html_content(&content_type) {
            tracing::info!(url = %url, content_type = %content_type, "skipping non-HTML content");
            return Ok(None);
        }

        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let body = read_capped(response, url).await?;

        Ok(Some(FetchedPage {
            body,
            status_code: status.as_u16(),
            content_type,
            response_time_ms,
            last_modified,
        }))
    }
}

/// Read the response body, truncating at [`MAX_BODY_BYTES`].
async fn read_capped(mut response: reqwest::Response, url: &str) -> CrawlResult<String> {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let chunk = response.chunk().await.map_err(|e| CrawlError::Fetch {
            url: url.to_string(),
            source: Box::new(e),
        })?;
        let Some(chunk) = chunk else { break };

        if buf.len() + chunk.len() > MAX_BODY_BYTES {
            buf.extend_from_slice(&chunk[..MAX_BODY_BYTES - buf.len()]);
            tracing::warn!(url = %url, "body exceeded size cap, truncated");
            break;
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Pre-request filter: binary extensions and download-style query strings
/// never yield crawlable HTML.
pub fn should_skip_url(url: &str) -> bool {
    let lower = url.to_lowercase();

    if BINARY_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return true;
    }

    lower.contains("download=") || lower.contains("attachment=") || lower.contains("export=")
}

/// A missing Content-Type is assumed to be HTML.
pub fn is_html_content(content_type: &str) -> bool {
    if content_type.is_empty() {
        return true;
    }
    let lower = content_type.to_lowercase();
    HTML_CONTENT_TYPES.iter().any(|t| lower.contains(t))
}
