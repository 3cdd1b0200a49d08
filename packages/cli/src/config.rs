//! CLI configuration loaded from environment variables.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// Configuration for the sitescope CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for captures, classifications, and the embedding cache
    pub data_dir: PathBuf,
    /// Absent key is only an error for commands that call the model
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            data_dir: env::var("SITESCOPE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".sitescope")),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            chat_model: env::var("SITESCOPE_CHAT_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embedding_model: env::var("SITESCOPE_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
        })
    }

    /// API key, required for analysis.
    pub fn require_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .context("OPENAI_API_KEY must be set to run analysis")
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.data_dir.join("captures")
    }

    pub fn classifications_dir(&self) -> PathBuf {
        self.data_dir.join("classifications")
    }

    pub fn embedding_cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache").join("embeddings")
    }
}
