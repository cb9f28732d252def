//! Shared foundation for the searchlight spider and search service: the data
//! model, URL utilities, content chunking, cosine similarity, the embedding
//! client and cache, and the vector-store client.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod similarity;
pub mod types;
pub mod urlkit;
pub mod vector;

pub use chunk::{chunk_text, is_high_quality_chunk};
pub use embedding::{Embedder, EmbeddingCache, HttpEmbedder};
pub use error::{CrawlError, CrawlResult, SearchError, SearchResult};
pub use similarity::cosine_similarity;
pub use types::{ChunkJob, EmbeddingResponse, Link, PagePoint, PageRecord, ScoredChunk};
pub use urlkit::{canonicalize_url, point_id_for_url, resolve_href};
pub use vector::{QdrantStore, VectorStore, COLLECTION_NAME, SEARCH_LIMIT, VECTOR_SIZE};
