//! Embedding service client for the semantic cache tier.
//!
//! Embedding failure is never fatal: callers log the condition and fall back
//! to exact-hash lookup only.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// Embedding vector type.
pub type Embedding = Vec<f32>;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Model identifier for storage alongside cached vectors.
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;
}

/// OpenAI embeddings client.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    /// Default model: text-embedding-3-small.
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
        }
    }

    pub fn with_model(api_key: String, model: String, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            dimension,
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "input": text
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<EmbeddingResponse>()
            .await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("No embedding in response"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Null embedder for testing (returns zero vectors).
#[derive(Default)]
pub struct NullEmbedder {
    dimension: usize,
}

impl NullEmbedder {
    pub fn new() -> Self {
        Self { dimension: 1536 }
    }
}

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(vec![0.0; self.dimension])
    }

    fn model_name(&self) -> &str {
        "null"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
