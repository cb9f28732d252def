//! Typed frames exchanged over the search WebSocket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound event discriminator. The *sequence* of these per query is the
/// protocol contract; progress numbers are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AnalyzingQuery,
    QueryEnhanced,
    SearchingDb,
    DbResultsFound,
    ProcessingChunks,
    AnalyzingResults,
    FinalResponse,
    Error,
    KeepAlive,
    SearchComplete,
}

/// One outbound progress frame.
#[derive(Debug, Clone, Serialize)]
pub struct SearchEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
}

impl SearchEvent {
    pub fn new(event_type: EventType, message: impl Into<String>, progress: u8) -> Self {
        Self {
            event_type,
            message: message.into(),
            data: None,
            progress,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }
}

/// Inbound frame: a query, or a client-level ping.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub query: String,
    #[serde(default, rename = "type")]
    pub frame_type: Option<String>,
}

impl InboundFrame {
    pub fn is_ping(&self) -> bool {
        self.frame_type.as_deref() == Some("ping") || self.query == "ping"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysisData {
    pub original_query: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryEnhancedData {
    pub original_query: String,
    pub enhanced_query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultsData {
    pub points_found: usize,
    pub time_taken: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkProcessingData {
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub filtered_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisData {
    pub top_chunks: usize,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalResponseData {
    pub response: Value,
    pub total_time: String,
    pub chunks_used: usize,
    pub sources_count: usize,
    pub search_complete: bool,
}
