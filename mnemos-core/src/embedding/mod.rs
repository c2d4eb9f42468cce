//! Embedding providers
//!
//! The engine never computes semantic embeddings itself; it talks to an
//! [`EmbeddingProvider`] and adapts its index dimension to whatever the
//! provider reports.

mod engine;
mod hashing;

#[cfg(feature = "fastembed")]
mod fastembed;

use async_trait::async_trait;

use crate::error::Result;

pub use engine::CachedEmbedder;
pub use hashing::HashingEmbedder;

#[cfg(feature = "fastembed")]
pub use self::fastembed::FastEmbedProvider;

/// Converts text to a fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts; providers with a native batch API override this
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Short name used in logs and stats
    fn name(&self) -> &str {
        "custom"
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0; 4];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
