//! Spider configuration loaded from environment variables.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Everything the spider binary needs to start.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub embedding_host: String,
    pub qdrant_host: String,
    pub qdrant_api_key: Option<String>,
    pub seed_urls: Vec<String>,
    pub worker_count: usize,
    pub pacing: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let db_host = env::var("DB_HOST").context("DB_HOST must be set")?;
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_user = env::var("DB_USER").context("DB_USER must be set")?;
        let db_password = env::var("DB_PASSWORD").context("DB_PASSWORD must be set")?;
        let db_name = env::var("DB_NAME").context("DB_NAME must be set")?;
        let db_sslmode = env::var("DB_SSLMODE").unwrap_or_else(|_| "disable".to_string());

        let database_url = format!(
            "postgres://{db_user}:{db_password}@{db_host}:{db_port}/{db_name}?sslmode={db_sslmode}"
        );

        Ok(Self {
            database_url,
            embedding_host: env::var("EMBEDDING_HOST").context("EMBEDDING_HOST must be set")?,
            qdrant_host: env::var("QDRANT_HOST").context("QDRANT_HOST must be set")?,
            qdrant_api_key: env::var("QDRANT_API_KEY").ok(),
            seed_urls: env::var("SEED_URLS")
                .context("SEED_URLS must be set (comma-separated)")?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            worker_count: env::var("WORKER_COUNT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("WORKER_COUNT must be a number")?,
            pacing: Duration::from_secs(
                env::var("PACING_SECONDS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .context("PACING_SECONDS must be a number")?,
            ),
        })
    }
}
