// Spider entry point: wiring and startup checks.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use searchlight_core::{HttpEmbedder, QdrantStore, VectorStore};
use searchlight_spider::{
    spawn_signal_monitor, Config, Fetcher, Orchestrator, PostgresStore, StorageWriter,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,searchlight_spider=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    tracing::info!("starting spider");

    let config = Config::from_env().context("failed to load configuration")?;

    tracing::info!("connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(0)
        .idle_timeout(Duration::from_secs(120))
        .max_lifetime(Duration::from_secs(300))
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("database ready");

    let vectors = Arc::new(
        QdrantStore::new(&config.qdrant_host, config.qdrant_api_key.clone())
            .context("failed to build vector store client")?,
    );
    vectors
        .ensure_collection()
        .await
        .context("failed to ensure vector collection")?;
    tracing::info!("vector store ready");

    let embedder = Arc::new(
        HttpEmbedder::new(&config.embedding_host).context("failed to build embedding client")?,
    );

    let client = Fetcher::build_client().context("failed to build HTTP client")?;
    let writer = StorageWriter::new(PostgresStore::new(pool), embedder, vectors);

    let token = CancellationToken::new();
    spawn_signal_monitor(token.clone());

    let orchestrator = Orchestrator::new(client, writer, token, config.pacing);
    orchestrator
        .run(&config.seed_urls, config.worker_count)
        .await
        .context("crawl failed")?;

    tracing::info!("spider finished");
    Ok(())
}
