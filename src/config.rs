//! Pipeline configuration.

use crate::llm::GenerationParams;

/// Tunables for one pipeline instance. Shared across requests.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard cap on normalized input length, in characters.
    pub max_input_chars: usize,
    /// When false, no embeddings are computed and only the exact-hash
    /// cache tiers are consulted.
    pub semantic_cache_enabled: bool,
    /// Minimum cosine similarity for a semantic-cache hit on original
    /// generation.
    pub create_min_similarity: f32,
    /// Minimum cosine similarity for a semantic-cache hit on refinement.
    /// Deliberately strict so a refinement never drifts onto a merely
    /// similar diagram.
    pub refine_min_similarity: f32,
    /// Additional IR-synthesis attempts after the first.
    pub max_synthesis_retries: usize,
    /// Parameters forwarded on every generation-service call.
    pub generation: GenerationParams,
    /// Cache entry retention window, in days.
    pub cache_ttl_days: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 20_000,
            semantic_cache_enabled: false,
            create_min_similarity: 0.82,
            refine_min_similarity: 0.90,
            max_synthesis_retries: 2,
            generation: GenerationParams::default(),
            cache_ttl_days: 30,
        }
    }
}

impl PipelineConfig {
    /// Build a config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("FORGE_SEMANTIC_CACHE") {
            config.semantic_cache_enabled = matches!(v.as_str(), "1" | "true" | "on");
        }
        if let Some(v) = env_parse::<usize>("FORGE_MAX_INPUT_CHARS") {
            config.max_input_chars = v;
        }
        if let Some(v) = env_parse::<f32>("FORGE_CREATE_MIN_SIMILARITY") {
            config.create_min_similarity = v;
        }
        if let Some(v) = env_parse::<f32>("FORGE_REFINE_MIN_SIMILARITY") {
            config.refine_min_similarity = v;
        }
        if let Some(v) = env_parse::<usize>("FORGE_MAX_SYNTHESIS_RETRIES") {
            config.max_synthesis_retries = v;
        }
        if let Some(v) = env_parse::<i64>("FORGE_CACHE_TTL_DAYS") {
            config.cache_ttl_days = v;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
