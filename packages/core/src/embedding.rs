//! Embedding service client and the process-local embedding cache.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::error::{CrawlError, CrawlResult};
use crate::types::EmbeddingResponse;

/// Seam for the text-embedding service (to allow mocking).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text into a dense vector.
    async fn embed(&self, text: &str) -> CrawlResult<EmbeddingResponse>;
}

/// HTTP client for the embedding sidecar.
///
/// Speaks the sidecar's minimal contract: `POST {host}` with
/// `{"text": "..."}`, answered by `{embedding, dims, elapsed_ms}`.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>) -> CrawlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CrawlError::Embedding(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Reuse an existing client (shared connection pool).
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> CrawlResult<EmbeddingResponse> {
        let mut body = HashMap::new();
        body.insert("text", text);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CrawlError::Embedding(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Embedding(format!(
                "non-200 status code: {}",
                status.as_u16()
            )));
        }

        response
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| CrawlError::Embedding(format!("decoding issue: {e}")))
    }
}

/// Process-local memoisation of chunk text to embedding vector.
///
/// No eviction; bounded in practice by the distinct-chunk count of a run.
/// The write lock is held only for the insertion.
#[derive(Default)]
pub struct EmbeddingCache {
    data: RwLock<HashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(text).cloned()
    }

    pub fn insert(&self, text: String, embedding: Vec<f32>) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.insert(text, embedding);
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
