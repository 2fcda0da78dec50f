//! Generation-service client interface.
//!
//! The pipeline consumes the external model as an opaque text-completion
//! service: prompt in, single JSON payload out. Implementations live behind
//! [`GenerationClient`] so tests can script responses without a network.

pub mod anthropic;
pub mod embedder;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicClient;
pub use embedder::{Embedder, NullEmbedder, OpenAiEmbedder};

/// Per-call parameters forwarded to the generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_output_tokens: 4096,
            temperature: 0.2,
        }
    }
}

/// Unified client interface for the generation service.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Call the service expecting a single JSON object in the response
    /// text. Providers without a native JSON response mode enforce it via
    /// the system prompt.
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        params: &GenerationParams,
    ) -> Result<String>;

    /// Model name for logging.
    fn model_name(&self) -> &str;
}
