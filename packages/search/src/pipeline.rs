//! The staged search dataflow: enhance, embed, retrieve, chunk-rank,
//! synthesize. Every stage reports progress through an [`EventSink`].

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use searchlight_core::error::{SearchError, SearchResult};
use searchlight_core::{
    chunk_text, cosine_similarity, is_high_quality_chunk, ChunkJob, Embedder, EmbeddingCache,
    PagePoint, ScoredChunk, VectorStore,
};

use crate::events::{
    AnalysisData, ChunkProcessingData, EventType, FinalResponseData, QueryAnalysisData,
    QueryEnhancedData, SearchEvent, SearchResultsData,
};
use crate::llm::ChatApi;

/// Where progress events go (the live session, or a collector in tests).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: SearchEvent) -> SearchResult<()>;

    /// True once the peer is gone; retry loops stop early.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Points with less content than this are not worth chunking.
const MIN_POINT_CONTENT: usize = 200;

const CHUNK_MAX_LEN: usize = 1500;
const CHUNK_OVERLAP: usize = 100;

/// Cap on chunks scored per query, across all points.
const MAX_CHUNKS_GLOBAL: usize = 50;

/// Chunks kept for synthesis.
const TOP_K: usize = 5;

/// Per-worker and collector deadlines for the chunk-scoring phase. The
/// collector outlives the workers so partial results survive an expiry.
const CHUNK_WORKER_TIMEOUT: Duration = Duration::from_secs(120);
const CHUNK_COLLECT_TIMEOUT: Duration = Duration::from_secs(140);

const FINAL_SEND_ATTEMPTS: u32 = 5;

/// Executes one query end to end against the injected collaborators.
pub struct SearchPipeline {
    chat: Arc<dyn ChatApi>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    cache: Arc<EmbeddingCache>,
}

impl SearchPipeline {
    pub fn new(
        chat: Arc<dyn ChatApi>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        cache: Arc<EmbeddingCache>,
    ) -> Self {
        Self {
            chat,
            embedder,
            vectors,
            cache,
        }
    }

    /// Run the full dataflow for one query, emitting the event sequence
    /// `analyzing_query, query_enhanced, searching_db, db_results_found,
    /// processing_chunks.., analyzing_results, final_response`.
    pub async fn run(
        &self,
        sink: &dyn EventSink,
        query: &str,
        token: &CancellationToken,
    ) -> SearchResult<()> {
        let started = tokio::time::Instant::now();

        // Stage 1: query analysis (synthetic progress while nothing has
        // happened yet; clients want movement on screen).
        let analysis_data = QueryAnalysisData {
            original_query: query.to_string(),
            status: "processing".to_string(),
        };
        sink.send(
            SearchEvent::new(EventType::AnalyzingQuery, "Analyzing your query...", 0)
                .with_data(analysis_data.clone()),
        )
        .await?;
        for progress in (10..=100).step_by(10) {
            self.pause(token, 50).await?;
            sink.send(
                SearchEvent::new(EventType::AnalyzingQuery, "Analyzing your query...", progress)
                    .with_data(analysis_data.clone()),
            )
            .await?;
        }

        let enhanced = self.chat.enhance_query(query).await?;
        tracing::info!(original = %query, enhanced = %enhanced.enhanced, "query enhanced");

        // Stage 2: enhanced query announced.
        let enhanced_data = QueryEnhancedData {
            original_query: query.to_string(),
            enhanced_query: enhanced.enhanced.clone(),
        };
        sink.send(
            SearchEvent::new(
                EventType::QueryEnhanced,
                "Enhancing query for better search results...",
                0,
            )
            .with_data(enhanced_data.clone()),
        )
        .await?;
        for progress in (20..=100).step_by(20) {
            self.pause(token, 30).await?;
            sink.send(
                SearchEvent::new(
                    EventType::QueryEnhanced,
                    "Enhancing query for better search results...",
                    progress,
                )
                .with_data(enhanced_data.clone()),
            )
            .await?;
        }

        let query_embedding = self
            .embedder
            .embed(&enhanced.enhanced)
            .await
            .map_err(|e| SearchError::Embedding(e.to_string()))?
            .embedding;

        // Stage 3: KNN with a ticking progress bar clamped below 100 until
        // the search actually returns.
        sink.send(SearchEvent::new(
            EventType::SearchingDb,
            "Searching database for relevant content...",
            0,
        ))
        .await?;

        let search_started = tokio::time::Instant::now();
        let points = self
            .search_with_progress(sink, &query_embedding, token)
            .await?;

        sink.send(SearchEvent::new(
            EventType::SearchingDb,
            "Searching database for relevant content...",
            100,
        ))
        .await?;

        // Stage 4: result count.
        let results_data = SearchResultsData {
            points_found: points.len(),
            time_taken: format!("{:?}", search_started.elapsed()),
        };
        for progress in (0..=100).step_by(25) {
            self.pause(token, 20).await?;
            sink.send(
                SearchEvent::new(
                    EventType::DbResultsFound,
                    "Found relevant content in database",
                    progress,
                )
                .with_data(results_data.clone()),
            )
            .await?;
        }

        // Stage 5: chunk scoring.
        sink.send(SearchEvent::new(
            EventType::ProcessingChunks,
            "Processing and analyzing content chunks...",
            0,
        ))
        .await?;

        let mut chunks = self
            .rank_chunks(sink, &points, &query_embedding, token)
            .await?;

        chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        chunks.truncate(TOP_K);

        sink.send(
            SearchEvent::new(
                EventType::ProcessingChunks,
                "Content chunks processed successfully",
                100,
            )
            .with_data(ChunkProcessingData {
                total_chunks: points.len(),
                processed_chunks: chunks.len(),
                filtered_chunks: chunks.len(),
            }),
        )
        .await?;

        // Stage 6: synthesis.
        let top_data = AnalysisData {
            top_chunks: chunks.len(),
            status: "generating_response".to_string(),
        };
        sink.send(
            SearchEvent::new(
                EventType::AnalyzingResults,
                "Generating comprehensive response...",
                0,
            )
            .with_data(top_data.clone()),
        )
        .await?;
        for progress in (10..=90).step_by(10) {
            self.pause(token, 100).await?;
            sink.send(
                SearchEvent::new(
                    EventType::AnalyzingResults,
                    "Generating comprehensive response...",
                    progress,
                )
                .with_data(top_data.clone()),
            )
            .await?;
        }

        let data_summary = build_data_summary(&chunks);
        let response = self
            .chat
            .synthesize(&enhanced.enhanced, &data_summary)
            .await?;

        sink.send(
            SearchEvent::new(EventType::AnalyzingResults, "Response generated successfully", 100)
                .with_data(AnalysisData {
                    top_chunks: chunks.len(),
                    status: "complete".to_string(),
                }),
        )
        .await?;

        // Stage 7: final answer, delivered stubbornly.
        let final_data = FinalResponseData {
            response,
            total_time: format!("{:?}", started.elapsed()),
            chunks_used: chunks.len(),
            sources_count: count_unique_urls(&chunks),
            search_complete: true,
        };
        self.deliver_final(sink, final_data, token).await
    }

    /// Drive the KNN future while ticking advisory progress every 100 ms,
    /// 5% at a time, clamped to 95 until the call returns.
    async fn search_with_progress(
        &self,
        sink: &dyn EventSink,
        query_embedding: &[f32],
        token: &CancellationToken,
    ) -> SearchResult<Vec<PagePoint>> {
        let search = self.vectors.search(query_embedding);
        tokio::pin!(search);

        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        ticker.tick().await; // first tick completes immediately
        let mut progress: u8 = 0;

        loop {
            tokio::select! {
                result = &mut search => {
                    return result.map_err(|e| SearchError::VectorStore(e.to_string()));
                }
                _ = ticker.tick() => {
                    progress = (progress + 5).min(95);
                    sink.send(SearchEvent::new(
                        EventType::SearchingDb,
                        "Searching database for relevant content...",
                        progress,
                    ))
                    .await?;
                }
                _ = token.cancelled() => return Err(SearchError::Cancelled),
            }
        }
    }

    /// Chunk the retrieved points, filter for quality, and score each chunk
    /// against the query vector with a bounded worker pool.
    async fn rank_chunks(
        &self,
        sink: &dyn EventSink,
        points: &[PagePoint],
        query_embedding: &[f32],
        token: &CancellationToken,
    ) -> SearchResult<Vec<ScoredChunk>> {
        let mut jobs: Vec<ChunkJob> = Vec::new();
        let mut total_windows = 0usize;

        for point in points {
            if point.content.len() < MIN_POINT_CONTENT {
                continue;
            }

            let windows = chunk_text(&point.content, CHUNK_MAX_LEN, CHUNK_OVERLAP);
            total_windows += windows.len();

            for (index, window) in windows.into_iter().enumerate() {
                if is_high_quality_chunk(&window) {
                    jobs.push(ChunkJob {
                        text: window,
                        url: point.url.clone(),
                        favicon: point.favicon.clone(),
                        index,
                    });
                }
            }
        }

        sink.send(
            SearchEvent::new(EventType::ProcessingChunks, "Filtered chunks for processing", 10)
                .with_data(ChunkProcessingData {
                    total_chunks: total_windows,
                    processed_chunks: 0,
                    filtered_chunks: jobs.len(),
                }),
        )
        .await?;

        jobs.truncate(MAX_CHUNKS_GLOBAL);
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let job_count = jobs.len();

        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let workers = (parallelism * 2).min(16);
        let worker_deadline = tokio::time::Instant::now() + CHUNK_WORKER_TIMEOUT;

        let query_vec: Arc<Vec<f32>> = Arc::new(query_embedding.to_vec());
        let score_tasks = jobs.into_iter().map(|job| {
            let embedder = Arc::clone(&self.embedder);
            let cache = Arc::clone(&self.cache);
            let query_vec = Arc::clone(&query_vec);
            async move {
                tokio::time::timeout_at(
                    worker_deadline,
                    score_chunk(job, embedder, cache, query_vec),
                )
                .await
            }
        });
        let mut results = futures::stream::iter(score_tasks).buffer_unordered(workers);

        let collect_deadline = tokio::time::sleep(CHUNK_COLLECT_TIMEOUT);
        tokio::pin!(collect_deadline);

        let mut scored: Vec<ScoredChunk> = Vec::new();
        let mut processed = 0usize;

        loop {
            tokio::select! {
                item = results.next() => {
                    let Some(item) = item else { break };
                    processed += 1;

                    match item {
                        Ok(Ok(chunk)) => scored.push(chunk),
                        Ok(Err(e)) => tracing::warn!(error = %e, "chunk scoring failed"),
                        Err(_) => tracing::warn!("chunk worker deadline exceeded"),
                    }

                    if processed % 5 == 0 || processed == job_count {
                        let progress =
                            (processed as f64 / job_count as f64 * 85.0) as u8 + 10;
                        sink.send(
                            SearchEvent::new(
                                EventType::ProcessingChunks,
                                "Processing content chunks...",
                                progress,
                            )
                            .with_data(ChunkProcessingData {
                                total_chunks: total_windows,
                                processed_chunks: processed,
                                filtered_chunks: job_count,
                            }),
                        )
                        .await?;
                    }
                }
                _ = &mut collect_deadline => {
                    tracing::warn!(
                        processed,
                        scored = scored.len(),
                        "chunk collection deadline reached, keeping partial results"
                    );
                    break;
                }
                _ = token.cancelled() => return Err(SearchError::Cancelled),
            }
        }

        Ok(scored)
    }

    /// Send the final frame with up to five attempts and quadratic backoff.
    async fn deliver_final(
        &self,
        sink: &dyn EventSink,
        data: FinalResponseData,
        token: &CancellationToken,
    ) -> SearchResult<()> {
        let event = SearchEvent::new(
            EventType::FinalResponse,
            "Search completed successfully",
            100,
        )
        .with_data(data);

        let mut last_err = SearchError::Protocol("final response not sent".to_string());
        for attempt in 1..=FINAL_SEND_ATTEMPTS {
            if sink.is_closed() {
                tracing::warn!("session closed before final response");
                return Err(SearchError::Cancelled);
            }

            match sink.send(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "failed to send final response");
                    last_err = e;
                }
            }

            if attempt < FINAL_SEND_ATTEMPTS {
                self.pause(token, u64::from(attempt * attempt) * 200).await?;
            }
        }

        let _ = sink
            .send(SearchEvent::new(
                EventType::Error,
                "Failed to deliver final response after multiple attempts",
                0,
            ))
            .await;
        Err(last_err)
    }

    /// A sleep that loses races against cancellation.
    async fn pause(&self, token: &CancellationToken, millis: u64) -> SearchResult<()> {
        tokio::select! {
            _ = token.cancelled() => Err(SearchError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(()),
        }
    }
}

async fn score_chunk(
    job: ChunkJob,
    embedder: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
    query_vec: Arc<Vec<f32>>,
) -> SearchResult<ScoredChunk> {
    let embedding = match cache.get(&job.text) {
        Some(cached) => cached,
        None => {
            let response = embedder
                .embed(&job.text)
                .await
                .map_err(|e| SearchError::Embedding(e.to_string()))?;
            cache.insert(job.text.clone(), response.embedding.clone());
            response.embedding
        }
    };

    let score = cosine_similarity(&embedding, &query_vec);
    Ok(ScoredChunk {
        text: job.text,
        url: job.url,
        favicon: job.favicon,
        score,
    })
}

/// Concatenated source material handed to the synthesis call.
fn build_data_summary(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("From {}, Favicon {}, :\n{}", c.url, c.favicon, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn count_unique_urls(chunks: &[ScoredChunk]) -> usize {
    chunks
        .iter()
        .map(|c| c.url.as_str())
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EnhancedQuery;
    use searchlight_core::error::{CrawlError, CrawlResult};
    use searchlight_core::types::EmbeddingResponse;
    use searchlight_core::PageRecord;
    use std::sync::Mutex;

    struct CollectingSink {
        events: Mutex<Vec<SearchEvent>>,
    }

    impl CollectingSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn types(&self) -> Vec<EventType> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.event_type)
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for CollectingSink {
        async fn send(&self, event: SearchEvent) -> SearchResult<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct FakeChat;

    #[async_trait]
    impl ChatApi for FakeChat {
        async fn enhance_query(&self, query: &str) -> SearchResult<EnhancedQuery> {
            Ok(EnhancedQuery {
                enhanced: format!("enhanced: {query}"),
                language_detected: Some("en".to_string()),
                confidence: Some(0.9),
            })
        }

        async fn synthesize(
            &self,
            _enhanced_query: &str,
            _data_summary: &str,
        ) -> SearchResult<Value> {
            Ok(serde_json::json!({"choices": [{"message": {"content": "{}"}}]}))
        }
    }

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str) -> CrawlResult<EmbeddingResponse> {
            // direction varies with length so scores differ
            let x = (text.len() % 7) as f32 + 1.0;
            Ok(EmbeddingResponse {
                embedding: vec![x, 1.0, 0.5, 0.25],
                dims: 4,
                elapsed_ms: 0.1,
            })
        }
    }

    struct FakeVectors {
        points: Vec<PagePoint>,
    }

    #[async_trait]
    impl VectorStore for FakeVectors {
        async fn ensure_collection(&self) -> CrawlResult<()> {
            Ok(())
        }

        async fn upsert_page(&self, _page: &PageRecord, _embedding: &[f32]) -> CrawlResult<()> {
            Ok(())
        }

        async fn search(&self, _vector: &[f32]) -> CrawlResult<Vec<PagePoint>> {
            Ok(self.points.clone())
        }
    }

    fn point(url: &str, content: String) -> PagePoint {
        PagePoint {
            url: url.to_string(),
            title: "t".to_string(),
            content,
            description: String::new(),
            favicon: format!("{url}favicon.ico"),
            status: 200,
            out_links: 1,
            in_links: 0,
        }
    }

    fn pipeline(points: Vec<PagePoint>) -> SearchPipeline {
        SearchPipeline::new(
            Arc::new(FakeChat),
            Arc::new(FakeEmbedder),
            Arc::new(FakeVectors { points }),
            Arc::new(EmbeddingCache::new()),
        )
    }

    fn prose(repeat: usize) -> String {
        "The quick brown fox jumps over the lazy dog near the river bank. ".repeat(repeat)
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_emits_event_types_in_order() {
        let sink = CollectingSink::new();
        let pipeline = pipeline(vec![
            point("https://a.test/", prose(40)),
            point("https://b.test/", prose(60)),
        ]);

        pipeline
            .run(&sink, "latest AI news", &CancellationToken::new())
            .await
            .unwrap();

        let types = sink.types();

        // collapse repeats, keeping first occurrence order
        let mut sequence: Vec<EventType> = Vec::new();
        for t in &types {
            if sequence.last() != Some(t) {
                sequence.push(*t);
            }
        }
        assert_eq!(
            sequence,
            vec![
                EventType::AnalyzingQuery,
                EventType::QueryEnhanced,
                EventType::SearchingDb,
                EventType::DbResultsFound,
                EventType::ProcessingChunks,
                EventType::AnalyzingResults,
                EventType::FinalResponse,
            ]
        );

        // terminal events appear exactly once
        assert_eq!(
            types
                .iter()
                .filter(|t| **t == EventType::FinalResponse)
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn final_payload_counts_sources() {
        let sink = CollectingSink::new();
        let pipeline = pipeline(vec![
            point("https://a.test/", prose(80)),
            point("https://b.test/", prose(80)),
        ]);

        pipeline
            .run(&sink, "query", &CancellationToken::new())
            .await
            .unwrap();

        let events = sink.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::FinalResponse);

        let data = last.data.as_ref().unwrap();
        assert_eq!(data["search_complete"], true);
        let chunks_used = data["chunks_used"].as_u64().unwrap();
        let sources = data["sources_count"].as_u64().unwrap();
        assert!(chunks_used <= 5);
        assert!(sources <= chunks_used);
        assert!(sources >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn short_content_points_are_ignored() {
        let sink = CollectingSink::new();
        let pipeline = pipeline(vec![point("https://tiny.test/", "too short".to_string())]);

        pipeline
            .run(&sink, "query", &CancellationToken::new())
            .await
            .unwrap();

        let events = sink.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.data.as_ref().unwrap()["chunks_used"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_pipeline() {
        let sink = CollectingSink::new();
        let pipeline = pipeline(vec![point("https://a.test/", prose(40))]);
        let token = CancellationToken::new();
        token.cancel();

        let err = pipeline.run(&sink, "query", &token).await.unwrap_err();
        assert!(matches!(err, SearchError::Cancelled));

        // nothing after the initial frame: the first cancellable pause bails
        assert!(sink.types().len() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn embedding_cache_fills_during_ranking() {
        let cache = Arc::new(EmbeddingCache::new());
        let pipeline = SearchPipeline::new(
            Arc::new(FakeChat),
            Arc::new(FakeEmbedder),
            Arc::new(FakeVectors {
                points: vec![point("https://a.test/", prose(40))],
            }),
            Arc::clone(&cache),
        );
        let sink = CollectingSink::new();

        pipeline
            .run(&sink, "query", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!cache.is_empty());
    }

    #[test]
    fn data_summary_format() {
        let chunks = vec![ScoredChunk {
            text: "chunk body".to_string(),
            url: "https://a.test/".to_string(),
            favicon: "https://a.test/favicon.ico".to_string(),
            score: 0.8,
        }];
        assert_eq!(
            build_data_summary(&chunks),
            "From https://a.test/, Favicon https://a.test/favicon.ico, :\nchunk body"
        );
    }

    #[test]
    fn unique_url_counting() {
        let chunk = |url: &str| ScoredChunk {
            text: String::new(),
            url: url.to_string(),
            favicon: String::new(),
            score: 0.0,
        };
        let chunks = vec![
            chunk("https://a.test/"),
            chunk("https://a.test/"),
            chunk("https://b.test/"),
        ];
        assert_eq!(count_unique_urls(&chunks), 2);
    }
}
