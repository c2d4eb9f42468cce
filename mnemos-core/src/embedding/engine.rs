//! Caching decorator for embedding providers
//!
//! Wraps any provider with a bounded LRU cache so repeated lookups of the
//! same text (search queries, re-stored content) skip the provider.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use super::EmbeddingProvider;
use crate::error::{MemoryError, Result};

const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Embedding provider with an LRU cache in front
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Get cache size
    pub fn cache_size(&self) -> usize {
        self.cache.lock().len()
    }

    /// Clear the cache
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.lock().get(text) {
            return Ok(cached.clone());
        }

        let embedding = self.inner.embed(text).await?;
        self.cache.lock().put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = {
            let mut cache = self.cache.lock();
            texts.iter().map(|text| cache.get(*text).cloned()).collect()
        };

        let uncached: Vec<(usize, &str)> = results
            .iter()
            .enumerate()
            .filter(|(_, cached)| cached.is_none())
            .map(|(i, _)| (i, texts[i]))
            .collect();

        if !uncached.is_empty() {
            let uncached_texts: Vec<&str> = uncached.iter().map(|(_, t)| *t).collect();
            let fresh = self.inner.embed_batch(&uncached_texts).await?;
            if fresh.len() != uncached_texts.len() {
                return Err(MemoryError::embedding(format!(
                    "{} returned {} embeddings for {} texts",
                    self.inner.name(),
                    fresh.len(),
                    uncached_texts.len()
                )));
            }

            let mut cache = self.cache.lock();
            for ((idx, text), emb) in uncached.iter().zip(fresh) {
                cache.put(text.to_string(), emb.clone());
                results[*idx] = Some(emb);
            }
        }

        results
            .into_iter()
            .map(|emb| emb.ok_or_else(|| MemoryError::embedding("batch result missing")))
            .collect()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
