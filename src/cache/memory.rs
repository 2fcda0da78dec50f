//! In-memory cache store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheNamespace, CacheStore, CACHE_TTL_DAYS};

/// `tokio::sync::RwLock` over a flat map. Reads that refresh access
/// metadata take the write lock; lookups dominated by misses stay on the
/// read lock.
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<(CacheNamespace, String), CacheEntry>>,
    ttl_days: i64,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::with_ttl(CACHE_TTL_DAYS)
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with a caller-chosen retention window, typically
    /// `PipelineConfig::cache_ttl_days`.
    pub fn with_ttl(ttl_days: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_days,
        }
    }

    /// Number of live (unexpired) entries, for tests and metrics.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, namespace: CacheNamespace, key: &str) -> Result<Option<CacheEntry>> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(&(namespace, key.to_string())) {
                Some(entry) if !entry.is_expired(now) => {}
                _ => return Ok(None),
            }
        }
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&(namespace, key.to_string())) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            return Ok(None);
        }
        entry.last_accessed_at = now;
        entry.hit_count += 1;
        Ok(Some(entry.clone()))
    }

    async fn get_nearest(
        &self,
        namespace: CacheNamespace,
        embedding: &[f32],
        min_similarity: f32,
    ) -> Result<Option<(CacheEntry, f32)>> {
        let now = Utc::now();
        let best_key = {
            let entries = self.entries.read().await;
            let mut best: Option<(String, f32)> = None;
            for ((ns, key), entry) in entries.iter() {
                if *ns != namespace || entry.is_expired(now) {
                    continue;
                }
                let Some(candidate) = entry.embedding.as_deref() else {
                    continue;
                };
                let similarity = super::cosine_similarity(embedding, candidate);
                if similarity < min_similarity {
                    continue;
                }
                if best.as_ref().is_none_or(|(_, s)| similarity > *s) {
                    best = Some((key.clone(), similarity));
                }
            }
            best
        };
        let Some((key, similarity)) = best_key else {
            return Ok(None);
        };
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&(namespace, key)) else {
            return Ok(None);
        };
        entry.last_accessed_at = now;
        entry.hit_count += 1;
        Ok(Some((entry.clone(), similarity)))
    }

    async fn put(
        &self,
        namespace: CacheNamespace,
        key: String,
        payload: serde_json::Value,
        embedding: Option<Vec<f32>>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(&(namespace, key.clone())) {
            Some(existing) => {
                existing.payload = payload;
                if embedding.is_some() {
                    existing.embedding = embedding;
                }
                existing.expires_at = now + Duration::days(self.ttl_days);
            }
            None => {
                entries.insert(
                    (namespace, key.clone()),
                    CacheEntry::new(key, payload, embedding, self.ttl_days),
                );
            }
        }
        Ok(())
    }

    async fn purge(&self, hit_floor: u64) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now) && entry.hit_count >= hit_floor);
        Ok(before - entries.len())
    }
}
