//! Multi-tier generation cache.
//!
//! Three namespaces, one per pipeline tier: extracted semantics keyed on the
//! normalized-input hash, synthesized IR keyed on the combined
//! semantics/constraints/style hash, and finished diagrams keyed on
//! `(content_hash, diagram_type)` with an optional embedding for
//! nearest-neighbor lookup.
//!
//! Writes are fire-and-forget from the pipeline's perspective; a failed
//! write is logged by the caller and never fails a request. Concurrent
//! duplicate writes are idempotent upserts.

pub mod fingerprint;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use fingerprint::{combined_hash, content_hash, cosine_similarity};
pub use memory::MemoryCacheStore;

/// Default entry retention window.
pub const CACHE_TTL_DAYS: i64 = 30;

/// Entries with fewer hits than this are eligible for purge.
pub const PURGE_HIT_FLOOR: u64 = 2;

/// One logical table per pipeline tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    /// `input_hash → SemanticCore`
    Semantic,
    /// `hash(semantics, constraints, style, diagram_type) → ProcessIR`
    Ir,
    /// `(content_hash, diagram_type) → finished diagram`, optionally with an
    /// embedding for semantic lookup.
    Result,
}

impl CacheNamespace {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheNamespace::Semantic => "semantic",
            CacheNamespace::Ir => "ir",
            CacheNamespace::Result => "result",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(
        key: String,
        payload: serde_json::Value,
        embedding: Option<Vec<f32>>,
        ttl_days: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            payload,
            embedding,
            created_at: now,
            expires_at: now + Duration::days(ttl_days),
            last_accessed_at: now,
            hit_count: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Content-addressable store shared by every pipeline tier.
///
/// The in-memory implementation backs tests and single-node deployments; a
/// database-backed one slots in behind the same trait.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Exact lookup. A hit refreshes `last_accessed_at` and `hit_count`.
    /// Expired entries are misses.
    async fn get(&self, namespace: CacheNamespace, key: &str) -> Result<Option<CacheEntry>>;

    /// Nearest-neighbor lookup over entries carrying an embedding. Returns
    /// the single closest entry at or above `min_similarity`.
    async fn get_nearest(
        &self,
        namespace: CacheNamespace,
        embedding: &[f32],
        min_similarity: f32,
    ) -> Result<Option<(CacheEntry, f32)>>;

    /// Idempotent upsert. Overwriting an existing key preserves its
    /// `created_at` and `hit_count` and extends `expires_at`.
    async fn put(
        &self,
        namespace: CacheNamespace,
        key: String,
        payload: serde_json::Value,
        embedding: Option<Vec<f32>>,
    ) -> Result<()>;

    /// Maintenance: drop expired entries and unexpired entries whose hit
    /// count is below `hit_floor`. Returns the number removed.
    async fn purge(&self, hit_floor: u64) -> Result<usize>;
}
