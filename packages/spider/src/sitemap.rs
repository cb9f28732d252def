//! Sitemap discovery: seeds the frontier from advertised sitemaps.

use regex::Regex;
use std::sync::Arc;

use searchlight_core::Link;

use crate::frontier::Frontier;

/// Well-known sitemap locations, tried in order.
const SITEMAP_PATHS: &[&str] = &["/sitemap.xml", "/sitemap_index.xml", "/sitemaps.xml"];

/// Nested sitemap indexes are followed this deep before giving up.
const MAX_INDEX_DEPTH: usize = 3;

/// Discovers seed URLs from a site's sitemap and enqueues them.
pub struct SitemapSeeder {
    client: reqwest::Client,
    loc_pattern: Regex,
}

enum SitemapBody {
    UrlSet(Vec<String>),
    Index(Vec<String>),
    Unrecognized,
}

impl SitemapSeeder {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            // <loc> values are plain URLs; the documents we meet in the wild
            // are too malformed for a strict parser, so mine them directly.
            loc_pattern: Regex::new(r"(?s)<loc>\s*(.*?)\s*</loc>")
                .expect("static pattern compiles"),
        }
    }

    /// Try the well-known sitemap paths under `base_url` and enqueue every
    /// page URL found. Returns the number of URLs enqueued; zero means the
    /// caller should fall back to its seed URLs.
    pub async fn seed(&self, base_url: &str, frontier: &Arc<Frontier>) -> usize {
        let base = base_url.trim_end_matches('/');
        for path in SITEMAP_PATHS {
            let sitemap_url = format!("{base}{path}");
            tracing::info!(url = %sitemap_url, "trying sitemap");

            let count = self.seed_from(&sitemap_url, frontier, 0).await;
            if count > 0 {
                return count;
            }
        }
        0
    }

    /// Fetch one sitemap document and enqueue its URLs, recursing into
    /// sitemap indexes up to [`MAX_INDEX_DEPTH`].
    fn seed_from<'a>(
        &'a self,
        sitemap_url: &'a str,
        frontier: &'a Arc<Frontier>,
        depth: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = usize> + Send + 'a>> {
        Box::pin(async move {
            if depth > MAX_INDEX_DEPTH {
                tracing::warn!(url = %sitemap_url, depth, "sitemap index too deep, skipping");
                return 0;
            }

            let body = match self.fetch(sitemap_url).await {
                Some(body) => body,
                None => return 0,
            };

            match self.classify(&body) {
                SitemapBody::UrlSet(urls) => {
                    tracing::info!(url = %sitemap_url, count = urls.len(), "sitemap found");
                    let mut enqueued = 0;
                    for url in urls {
                        frontier.enqueue(Link::bare(url));
                        enqueued += 1;
                    }
                    enqueued
                }
                SitemapBody::Index(refs) => {
                    tracing::info!(url = %sitemap_url, count = refs.len(), "sitemap index found");
                    let mut enqueued = 0;
                    for nested in refs {
                        enqueued += self.seed_from(&nested, frontier, depth + 1).await;
                    }
                    enqueued
                }
                SitemapBody::Unrecognized => {
                    tracing::debug!(url = %sitemap_url, "body is not a sitemap");
                    0
                }
            }
        })
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "sitemap fetch failed");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "sitemap not found");
            return None;
        }

        response.text().await.ok()
    }

    fn classify(&self, body: &str) -> SitemapBody {
        let locs: Vec<String> = self
            .loc_pattern
            .captures_iter(body)
            .filter_map(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|loc| !loc.is_empty())
            .collect();

        if locs.is_empty() {
            return SitemapBody::Unrecognized;
        }

        if body.contains("<sitemapindex") {
            SitemapBody::Index(locs)
        } else if body.contains("<urlset") {
            SitemapBody::UrlSet(locs)
        } else {
            SitemapBody::Unrecognized
        }
    }
}
