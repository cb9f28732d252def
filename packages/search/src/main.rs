// Search-service entry point: wiring and startup checks.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use searchlight_core::{EmbeddingCache, HttpEmbedder, QdrantStore, VectorStore};
use searchlight_search::{router, AppState, Config, HttpChatClient, SearchPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,searchlight_search=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    tracing::info!("starting search service");

    let config = Config::from_env().context("failed to load configuration")?;

    let vectors = Arc::new(
        QdrantStore::new(&config.qdrant_host, config.qdrant_api_key.clone())
            .context("failed to build vector store client")?,
    );
    vectors
        .ensure_collection()
        .await
        .context("vector store unreachable")?;
    tracing::info!("vector store ready");

    let embedder = Arc::new(
        HttpEmbedder::new(&config.embedding_host).context("failed to build embedding client")?,
    );
    let chat = Arc::new(
        HttpChatClient::new(&config.llm_api_url, &config.llm_api_key, &config.model_name)
            .context("failed to build chat client")?,
    );

    let pipeline = Arc::new(SearchPipeline::new(
        chat,
        embedder,
        vectors,
        Arc::new(EmbeddingCache::new()),
    ));

    let app = router(AppState {
        pipeline,
        api_key: config.api_key.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(addr = %addr, "websocket endpoint: /ws/search, health: /health");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
