//! Local ONNX embeddings via fastembed (BGE-Small-EN-v1.5, 384d)

use std::sync::Arc;

use async_trait::async_trait;
use ::fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::EmbeddingProvider;
use crate::error::{MemoryError, Result};

const BGE_SMALL_DIMENSION: usize = 384;

/// fastembed-backed provider; inference runs on the blocking pool
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
}

impl FastEmbedProvider {
    /// Load (downloading on first use) BGE-Small-EN-v1.5
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::BGESmallENV15))
            .map_err(|e| MemoryError::embedding(format!("Failed to load fastembed model: {e}")))?;
        tracing::info!(dimension = BGE_SMALL_DIMENSION, "fastembed model ready");
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn dimension(&self) -> usize {
        BGE_SMALL_DIMENSION
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| MemoryError::embedding("fastembed returned no vectors"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let model = Arc::clone(&self.model);
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        tokio::task::spawn_blocking(move || model.embed(owned, None))
            .await
            .map_err(|e| MemoryError::embedding(format!("embedding task failed: {e}")))?
            .map_err(|e| MemoryError::embedding(format!("Failed to encode texts: {e}")))
    }

    fn name(&self) -> &str {
        "fastembed"
    }
}
