//! Core data model shared by the spider and the search service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An anchor extracted from a page: the link text and its canonical target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub url: String,
}

impl Link {
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }

    /// A link with no anchor text (seed URLs, sitemap entries).
    pub fn bare(url: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            url: url.into(),
        }
    }
}

/// Everything the extractor recovers from one crawled page.
///
/// The canonical `url` is the page's identity; `point_id` is derived from it
/// deterministically and used as the vector-store point id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub title: String,
    #[serde(rename = "description")]
    pub meta_description: String,
    pub meta_keywords: String,
    pub language: String,
    pub canonical: String,
    pub favicon: String,

    /// Heading texts keyed by tag (`h1`..`h6`), in document order per tag.
    pub headings: HashMap<String, Vec<String>>,
    pub main_content: String,
    pub image_alt: Vec<String>,

    pub word_count: usize,
    pub status_code: u16,
    pub response_time_ms: i64,
    pub content_type: String,

    #[serde(rename = "out_links")]
    pub outbound_links: Vec<Link>,

    pub crawl_date: DateTime<Utc>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl PageRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            crawl_date: Utc::now(),
            ..Default::default()
        }
    }
}

/// A vector-store payload recovered by a KNN search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PagePoint {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub favicon: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub out_links: i64,
    #[serde(default)]
    pub in_links: i64,
}

/// Response body of the embedding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub dims: i32,
    #[serde(default)]
    pub elapsed_ms: f32,
}

/// One content window queued for embedding and scoring.
#[derive(Debug, Clone)]
pub struct ChunkJob {
    pub text: String,
    pub url: String,
    pub favicon: String,
    pub index: usize,
}

/// A chunk scored by cosine similarity against the query vector.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub text: String,
    pub url: String,
    pub favicon: String,
    pub score: f32,
}
