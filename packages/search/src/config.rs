//! Search-service configuration loaded from environment variables.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

const DEFAULT_LLM_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

/// Everything the search binary needs to start.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_key: String,
    pub llm_api_url: String,
    pub llm_api_key: String,
    pub model_name: String,
    pub embedding_host: String,
    pub qdrant_host: String,
    pub qdrant_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            api_key: env::var("API_KEY").context("API_KEY must be set")?,
            llm_api_url: env::var("LLAMA_API_URL").unwrap_or_else(|_| DEFAULT_LLM_API_URL.into()),
            llm_api_key: env::var("LLM_API_KEY").context("LLM_API_KEY must be set")?,
            model_name: env::var("MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.into()),
            embedding_host: env::var("EMBEDDING_HOST").context("EMBEDDING_HOST must be set")?,
            qdrant_host: env::var("QDRANT_HOST").context("QDRANT_HOST must be set")?,
            qdrant_api_key: env::var("QDRANT_API_KEY").ok(),
        })
    }
}
