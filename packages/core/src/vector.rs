//! Qdrant vector-store client over its REST API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::error::{CrawlError, CrawlResult};
use crate::types::{PagePoint, PageRecord};
use crate::urlkit::point_id_for_url;

/// Name of the page-embeddings collection.
pub const COLLECTION_NAME: &str = "page_content_embeddings";

/// Vector dimension of the embedding model.
pub const VECTOR_SIZE: usize = 384;

/// Number of candidates recovered per KNN search.
pub const SEARCH_LIMIT: usize = 15;

/// Seam for the vector store (to allow mocking).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist.
    async fn ensure_collection(&self) -> CrawlResult<()>;

    /// Insert or replace the point for a page. The point id is derived from
    /// the canonical URL, so re-crawling a page overwrites its point.
    async fn upsert_page(&self, page: &PageRecord, embedding: &[f32]) -> CrawlResult<()>;

    /// KNN over the collection, payloads included.
    async fn search(&self, vector: &[f32]) -> CrawlResult<Vec<PagePoint>>;
}

/// REST client for a Qdrant deployment.
#[derive(Clone)]
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(host: impl Into<String>, api_key: Option<String>) -> CrawlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CrawlError::VectorStore(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: host.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self) -> CrawlResult<()> {
        let path = format!("/collections/{COLLECTION_NAME}");
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| CrawlError::VectorStore(format!("collection check failed: {e}")))?;

        if response.status().is_success() {
            return Ok(());
        }

        tracing::info!(collection = COLLECTION_NAME, "creating vector collection");
        let body = json!({
            "vectors": { "size": VECTOR_SIZE, "distance": "Cosine" }
        });
        let response = self
            .request(reqwest::Method::PUT, &path)
            .json(&body)
            .send()
            .await
            .map_err(|e| CrawlError::VectorStore(format!("collection create failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CrawlError::VectorStore(format!(
                "collection create returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn upsert_page(&self, page: &PageRecord, embedding: &[f32]) -> CrawlResult<()> {
        let point_id = point_id_for_url(&page.url);
        let body = json!({
            "points": [{
                "id": point_id,
                "vector": embedding,
                "payload": {
                    "url": page.url,
                    "title": page.title,
                    "content": page.main_content,
                    "description": page.meta_description,
                    "status": page.status_code,
                    "out_links": page.outbound_links.len(),
                    "in_links": 0,
                    "favicon": page.favicon,
                },
            }]
        });

        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{COLLECTION_NAME}/points?wait=true"),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| CrawlError::VectorStore(format!("upsert failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CrawlError::VectorStore(format!(
                "upsert returned {status}: {detail}"
            )));
        }

        tracing::debug!(url = %page.url, point_id = %point_id, "vector point upserted");
        Ok(())
    }

    async fn search(&self, vector: &[f32]) -> CrawlResult<Vec<PagePoint>> {
        let body = json!({
            "vector": vector,
            "limit": SEARCH_LIMIT,
            "with_payload": true,
        });

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{COLLECTION_NAME}/points/search"),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| CrawlError::VectorStore(format!("search failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::VectorStore(format!("search returned {status}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CrawlError::VectorStore(format!("search decode failed: {e}")))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|hit| hit.payload)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    payload: PagePoint,
}
