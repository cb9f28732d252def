//! Crawl orchestration: the worker pool, pacing, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use searchlight_core::error::{CrawlError, CrawlResult};
use searchlight_core::Link;

use crate::extractor::Extractor;
use crate::fetcher::{should_skip_url, Fetcher};
use crate::frontier::Frontier;
use crate::robots::RobotsGate;
use crate::sitemap::SitemapSeeder;
use crate::storage::{PageStore, StorageWriter};

/// Pages with less cleaned text than this are not worth embedding; storing
/// them would only degrade semantic search.
const MIN_CONTENT_LENGTH: usize = 1500;

/// Sleep between dequeue attempts on an empty frontier.
const EMPTY_QUEUE_SLEEP: Duration = Duration::from_secs(5);

/// A worker exits after this many consecutive empty dequeues.
const MAX_EMPTY_ATTEMPTS: u32 = 10;

/// Grace period between the shutdown signal and a forced exit.
const SHUTDOWN_FUSE: Duration = Duration::from_secs(10);

/// Owns the frontier and the per-page pipeline; spawns the workers.
pub struct Orchestrator<S: PageStore> {
    frontier: Arc<Frontier>,
    fetcher: Fetcher,
    extractor: Extractor,
    robots: RobotsGate,
    seeder: SitemapSeeder,
    writer: StorageWriter<S>,
    token: CancellationToken,
    pacing: Duration,
    base_domain: String,
}

impl<S: PageStore + 'static> Orchestrator<S> {
    pub fn new(
        client: reqwest::Client,
        writer: StorageWriter<S>,
        token: CancellationToken,
        pacing: Duration,
    ) -> Self {
        Self {
            frontier: Arc::new(Frontier::new()),
            fetcher: Fetcher::new(client.clone()),
            extractor: Extractor::new(),
            robots: RobotsGate::new(client.clone()),
            seeder: SitemapSeeder::new(client),
            writer,
            token,
            pacing,
            base_domain: String::new(),
        }
    }

    /// Seed the frontier and run `worker_count` workers to completion.
    pub async fn run(mut self, seed_urls: &[String], worker_count: usize) -> CrawlResult<()> {
        let Some(first_seed) = seed_urls.first() else {
            tracing::warn!("no seed URLs provided");
            return Ok(());
        };

        let parsed = Url::parse(first_seed).map_err(|_| CrawlError::InvalidUrl {
            url: first_seed.clone(),
        })?;
        self.base_domain = parsed.host_str().unwrap_or_default().to_string();
        let origin = format!("{}://{}", parsed.scheme(), self.base_domain);
        tracing::info!(base_domain = %self.base_domain, "crawl starting");

        let seeded = self.seeder.seed(&origin, &self.frontier).await;
        if seeded == 0 {
            tracing::info!("no sitemap URLs found, falling back to seed URLs");
            for url in seed_urls {
                self.frontier.enqueue(Link::bare(url.clone()));
            }
        } else {
            tracing::info!(count = seeded, "frontier seeded from sitemap");
        }

        let orchestrator = Arc::new(self);
        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let orchestrator = Arc::clone(&orchestrator);
            handles.push(tokio::spawn(async move {
                orchestrator.worker_loop(id).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker panicked");
            }
        }

        tracing::info!("all workers finished");
        Ok(())
    }

    async fn worker_loop(&self, id: usize) {
        let mut empty_attempts = 0u32;

        loop {
            if self.token.is_cancelled() {
                tracing::info!(worker = id, "shutdown signal received");
                return;
            }

            let Some(link) = self.frontier.dequeue() else {
                empty_attempts += 1;
                if empty_attempts >= MAX_EMPTY_ATTEMPTS {
                    tracing::info!(worker = id, attempts = empty_attempts, "no work, exiting");
                    return;
                }

                tokio::select! {
                    _ = self.token.cancelled() => return,
                    _ = tokio::time::sleep(EMPTY_QUEUE_SLEEP) => continue,
                }
            };
            empty_attempts = 0;

            tracing::info!(worker = id, url = %link.url, "processing");
            if let Err(e) = self.process_page(&link.url).await {
                match e {
                    CrawlError::Cancelled => return,
                    CrawlError::RobotsDenied { .. } | CrawlError::RobotsUnavailable { .. } => {
                        tracing::warn!(worker = id, url = %link.url, error = %e, "robots gate")
                    }
                    _ => tracing::warn!(worker = id, url = %link.url, error = %e, "crawl failed"),
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(self.pacing) => {}
            }
        }
    }

    /// Crawl one URL end to end. The URL ends up in `visited` whatever the
    /// outcome.
    async fn process_page(&self, url: &str) -> CrawlResult<()> {
        let result = self.crawl_inner(url).await;
        self.frontier.mark_visited(url);
        result
    }

    async fn crawl_inner(&self, url: &str) -> CrawlResult<()> {
        if self.frontier.is_visited(url) {
            tracing::debug!(url = %url, "already visited, skipping");
            return Ok(());
        }

        if should_skip_url(url) {
            tracing::debug!(url = %url, "skipping non-HTML URL");
            return Ok(());
        }

        let parsed = Url::parse(url).map_err(|_| CrawlError::InvalidUrl {
            url: url.to_string(),
        })?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        let origin = format!("{}://{}", parsed.scheme(), host);

        self.robots.check(&origin, parsed.path()).await?;

        if self.token.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }

        let Some(fetched) = self.fetcher.fetch(url).await? else {
            return Ok(());
        };

        let page = self.extractor.extract(url, &fetched)?;

        for link in &page.outbound_links {
            if let Ok(link_url) = Url::parse(&link.url) {
                let link_host = link_url.host_str().unwrap_or_default();
                if link_host == host || link_host == self.base_domain {
                    self.frontier.enqueue(link.clone());
                }
            }
        }

        if page.main_content.len() < MIN_CONTENT_LENGTH {
            tracing::info!(
                url = %url,
                length = page.main_content.len(),
                minimum = MIN_CONTENT_LENGTH,
                "content too short, not storing"
            );
            return Ok(());
        }

        self.writer.store_with_retry(&page, &self.token).await?;

        tracing::info!(url = %url, links = page.outbound_links.len(), "page processed");
        Ok(())
    }
}

/// Cancel the token on SIGINT/SIGTERM and arm a hard-exit fuse so a wedged
/// worker cannot block shutdown forever.
pub fn spawn_signal_monitor(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("shutdown signal received, draining workers");
        token.cancel();

        tokio::spawn(async {
            tokio::time::sleep(SHUTDOWN_FUSE).await;
            tracing::error!("graceful shutdown timeout reached, forcing exit");
            std::process::exit(1);
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use searchlight_core::types::EmbeddingResponse;
    use searchlight_core::{Embedder, PagePoint, PageRecord, VectorStore};

    struct NullStore;

    #[async_trait]
    impl PageStore for NullStore {
        async fn health_check(&self) -> CrawlResult<()> {
            Ok(())
        }

        async fn upsert_page(
            &self,
            _page: &PageRecord,
            _token: &CancellationToken,
        ) -> CrawlResult<i32> {
            Ok(1)
        }
    }

    struct NullEmbedder;

    #[async_trait]
    impl Embedder for NullEmbedder {
        async fn embed(&self, _text: &str) -> CrawlResult<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                embedding: vec![0.0; 4],
                dims: 4,
                elapsed_ms: 0.0,
            })
        }
    }

    struct NullVectors;

    #[async_trait]
    impl VectorStore for NullVectors {
        async fn ensure_collection(&self) -> CrawlResult<()> {
            Ok(())
        }

        async fn upsert_page(&self, _page: &PageRecord, _embedding: &[f32]) -> CrawlResult<()> {
            Ok(())
        }

        async fn search(&self, _vector: &[f32]) -> CrawlResult<Vec<PagePoint>> {
            Ok(Vec::new())
        }
    }

    fn orchestrator(token: CancellationToken) -> Orchestrator<NullStore> {
        let writer = StorageWriter::new(
            NullStore,
            Arc::new(NullEmbedder),
            Arc::new(NullVectors),
        );
        Orchestrator::new(
            reqwest::Client::new(),
            writer,
            token,
            Duration::from_secs(2),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn worker_exits_after_consecutive_empty_attempts() {
        let orchestrator = orchestrator(CancellationToken::new());

        // ten empty dequeues at 5 s apart, then the worker gives up
        let start = tokio::time::Instant::now();
        orchestrator.worker_loop(0).await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(45), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(60), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn worker_exits_on_cancellation() {
        let token = CancellationToken::new();
        token.cancel();

        let orchestrator = orchestrator(token);
        orchestrator.worker_loop(0).await;
    }

    #[tokio::test]
    async fn visited_urls_are_skipped_without_fetching() {
        let orchestrator = orchestrator(CancellationToken::new());
        orchestrator.frontier.mark_visited("https://done.test/");

        orchestrator
            .process_page("https://done.test/")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn binary_urls_are_skipped_and_marked_visited() {
        let orchestrator = orchestrator(CancellationToken::new());

        orchestrator
            .process_page("https://x.test/image.png")
            .await
            .unwrap();
        assert!(orchestrator.frontier.is_visited("https://x.test/image.png"));
    }
}
