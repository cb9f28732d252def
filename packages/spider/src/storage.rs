//! Persisting crawled pages: relational upsert, embedding, vector upsert,
//! and the retry policy around all three.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use searchlight_core::error::{CrawlError, CrawlResult};
use searchlight_core::{point_id_for_url, Embedder, PageRecord, VectorStore};

/// Outbound links are inserted in batches of this many rows per statement.
const LINK_BATCH_SIZE: usize = 100;

/// Transaction deadline; raised for link-heavy pages.
const TX_TIMEOUT: Duration = Duration::from_secs(120);
const TX_TIMEOUT_LARGE: Duration = Duration::from_secs(180);

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_STORE_ATTEMPTS: u32 = 3;

/// Seam for the relational page store (to allow mocking).
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Cheap liveness probe, run before every store attempt.
    async fn health_check(&self) -> CrawlResult<()>;

    /// Upsert the page row and replace its heading and link rows, atomically.
    /// Returns the page's relational id.
    async fn upsert_page(&self, page: &PageRecord, token: &CancellationToken)
        -> CrawlResult<i32>;
}

/// Postgres implementation over a shared connection pool.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_tx(&self, page: &PageRecord, token: &CancellationToken) -> CrawlResult<i32> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        let qdrant_id = uuid::Uuid::parse_str(&point_id_for_url(&page.url))
            .map_err(|e| CrawlError::Storage(Box::new(e)))?;

        let row = sqlx::query(
            r#"
            INSERT INTO pages (
                qdrant_id, url, title, meta_description, meta_keywords, language,
                canonical, content, word_count, status_code, response_time,
                content_type, last_modified, crawl_date, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW())
            ON CONFLICT (url) DO UPDATE SET
                qdrant_id = EXCLUDED.qdrant_id,
                title = EXCLUDED.title,
                meta_description = EXCLUDED.meta_description,
                meta_keywords = EXCLUDED.meta_keywords,
                language = EXCLUDED.language,
                canonical = EXCLUDED.canonical,
                content = EXCLUDED.content,
                word_count = EXCLUDED.word_count,
                status_code = EXCLUDED.status_code,
                response_time = EXCLUDED.response_time,
                content_type = EXCLUDED.content_type,
                last_modified = EXCLUDED.last_modified,
                crawl_date = EXCLUDED.crawl_date,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(qdrant_id)
        .bind(&page.url)
        .bind(&page.title)
        .bind(&page.meta_description)
        .bind(&page.meta_keywords)
        .bind(&page.language)
        .bind(&page.canonical)
        .bind(&page.main_content)
        .bind(page.word_count as i32)
        .bind(page.status_code as i32)
        .bind(page.response_time_ms as i32)
        .bind(&page.content_type)
        .bind(page.last_modified)
        .bind(page.crawl_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_err)?;

        let page_id: i32 = row.get("id");

        sqlx::query("DELETE FROM page_headings WHERE page_id = $1")
            .bind(page_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        sqlx::query("DELETE FROM links WHERE from_page_id = $1")
            .bind(page_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        for (tag, texts) in &page.headings {
            for (position, text) in texts.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO page_headings (page_id, heading_type, text, position)
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(page_id)
                .bind(tag)
                .bind(text)
                .bind(position as i32 + 1)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
            }
        }

        for batch in page.outbound_links.chunks(LINK_BATCH_SIZE) {
            if token.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            let mut builder = sqlx::QueryBuilder::new(
                "INSERT INTO links (from_page_id, to_url, anchor_text, link_type) ",
            );
            builder.push_values(batch, |mut row, link| {
                row.push_bind(page_id)
                    .push_bind(&link.url)
                    .push_bind(&link.text)
                    .push_bind("external");
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(page_id)
    }
}

#[async_trait]
impl PageStore for PostgresStore {
    async fn health_check(&self) -> CrawlResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn upsert_page(
        &self,
        page: &PageRecord,
        token: &CancellationToken,
    ) -> CrawlResult<i32> {
        let deadline = if page.outbound_links.len() > LINK_BATCH_SIZE {
            TX_TIMEOUT_LARGE
        } else {
            TX_TIMEOUT
        };

        match tokio::time::timeout(deadline, self.upsert_tx(page, token)).await {
            Ok(result) => result,
            Err(_) => Err(CrawlError::Timeout(format!(
                "storage transaction for {} exceeded {:?}",
                page.url, deadline
            ))),
        }
    }
}

fn storage_err(e: sqlx::Error) -> CrawlError {
    CrawlError::Storage(Box::new(e))
}

/// Writes a page everywhere it needs to go: the relational row, then (gated
/// on that commit) the embedding and the vector point.
pub struct StorageWriter<S: PageStore> {
    store: S,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
}

impl<S: PageStore> StorageWriter<S> {
    pub fn new(store: S, embedder: Arc<dyn Embedder>, vectors: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            embedder,
            vectors,
        }
    }

    /// Store with up to three attempts, quadratic backoff between them, and
    /// a health check ahead of each. The backoff sleeps honour cancellation.
    pub async fn store_with_retry(
        &self,
        page: &PageRecord,
        token: &CancellationToken,
    ) -> CrawlResult<()> {
        let mut last_err = CrawlError::Storage("no attempt made".to_string().into());

        for attempt in 1..=MAX_STORE_ATTEMPTS {
            if token.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            match self.store_once(page, token).await {
                Ok(()) => {
                    tracing::info!(
                        url = %page.url,
                        links = page.outbound_links.len(),
                        words = page.word_count,
                        attempt,
                        "page stored"
                    );
                    return Ok(());
                }
                Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        url = %page.url,
                        attempt,
                        max_attempts = MAX_STORE_ATTEMPTS,
                        error = %e,
                        "store attempt failed"
                    );
                    last_err = e;
                }
            }

            if attempt < MAX_STORE_ATTEMPTS {
                let backoff = Duration::from_secs(u64::from(attempt * attempt));
                tokio::select! {
                    _ = token.cancelled() => return Err(CrawlError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        Err(last_err)
    }

    async fn store_once(&self, page: &PageRecord, token: &CancellationToken) -> CrawlResult<()> {
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.store.health_check())
            .await
            .map_err(|_| CrawlError::Timeout("health check".to_string()))??;

        self.store.upsert_page(page, token).await?;

        let embedding = self.embedder.embed(&page.main_content).await?;
        self.vectors.upsert_page(page, &embedding.embedding).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchlight_core::types::EmbeddingResponse;
    use searchlight_core::PagePoint;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockStore {
        health_failures: AtomicU32,
        upserts: AtomicU32,
    }

    impl MockStore {
        fn new(health_failures: u32) -> Self {
            Self {
                health_failures: AtomicU32::new(health_failures),
                upserts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PageStore for MockStore {
        async fn health_check(&self) -> CrawlResult<()> {
            if self.health_failures.load(Ordering::SeqCst) > 0 {
                self.health_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(CrawlError::Storage("connection refused".to_string().into()));
            }
            Ok(())
        }

        async fn upsert_page(
            &self,
            _page: &PageRecord,
            _token: &CancellationToken,
        ) -> CrawlResult<i32> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    struct MockEmbedder;

    #[async_trait]
    impl Embedder for MockEmbedder {
        async fn embed(&self, _text: &str) -> CrawlResult<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                embedding: vec![0.5; 4],
                dims: 4,
                elapsed_ms: 1.0,
            })
        }
    }

    struct MockVectors {
        upserted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VectorStore for MockVectors {
        async fn ensure_collection(&self) -> CrawlResult<()> {
            Ok(())
        }

        async fn upsert_page(&self, page: &PageRecord, _embedding: &[f32]) -> CrawlResult<()> {
            self.upserted.lock().unwrap().push(page.url.clone());
            Ok(())
        }

        async fn search(&self, _vector: &[f32]) -> CrawlResult<Vec<PagePoint>> {
            Ok(Vec::new())
        }
    }

    fn writer(store: MockStore) -> StorageWriter<MockStore> {
        StorageWriter::new(
            store,
            Arc::new(MockEmbedder),
            Arc::new(MockVectors {
                upserted: Mutex::new(Vec::new()),
            }),
        )
    }

    fn page() -> PageRecord {
        let mut page = PageRecord::new("https://store.test/");
        page.main_content = "enough text to embed".to_string();
        page
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_attempt() {
        let writer = writer(MockStore::new(0));
        let token = CancellationToken::new();

        writer.store_with_retry(&page(), &token).await.unwrap();
        assert_eq!(writer.store.upserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_through_health_failures() {
        // health fails twice: attempts 1 and 2 burn on the probe, attempt 3
        // lands after 1s + 4s of backoff
        let writer = writer(MockStore::new(2));
        let token = CancellationToken::new();

        let start = tokio::time::Instant::now();
        writer.store_with_retry(&page(), &token).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(writer.store.upserts.load(Ordering::SeqCst), 1);
        assert!(elapsed >= Duration::from_secs(5), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let writer = writer(MockStore::new(10));
        let token = CancellationToken::new();

        let err = writer.store_with_retry(&page(), &token).await.unwrap_err();
        assert!(matches!(err, CrawlError::Storage(_)));
        assert_eq!(writer.store.upserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_immediately() {
        let writer = writer(MockStore::new(0));
        let token = CancellationToken::new();
        token.cancel();

        let err = writer.store_with_retry(&page(), &token).await.unwrap_err();
        assert!(matches!(err, CrawlError::Cancelled));
        assert_eq!(writer.store.upserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn vector_upsert_follows_row_commit() {
        let vectors = Arc::new(MockVectors {
            upserted: Mutex::new(Vec::new()),
        });
        let writer = StorageWriter::new(
            MockStore::new(0),
            Arc::new(MockEmbedder),
            Arc::clone(&vectors) as Arc<dyn VectorStore>,
        );
        let token = CancellationToken::new();

        writer.store_with_retry(&page(), &token).await.unwrap();
        assert_eq!(
            vectors.upserted.lock().unwrap().as_slice(),
            ["https://store.test/"]
        );
    }
}
