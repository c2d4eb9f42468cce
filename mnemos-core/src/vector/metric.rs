//! Similarity math shared by every index backend

use crate::config::Metric;
use crate::embedding::l2_normalize;

impl Metric {
    /// Bring a vector into the form the index stores and queries with
    pub fn prepare(&self, vector: &mut [f32]) {
        if *self == Metric::Cosine {
            l2_normalize(vector);
        }
    }

    /// Higher is more similar
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::Euclidean => match euclidean_distance(a, b) {
                Some(d) => 1.0 / (1.0 + d),
                None => 0.0,
            },
        }
    }

    /// Lower is more similar; used to order the HNSW graph
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
            Metric::Euclidean => euclidean_distance(a, b).unwrap_or(f32::MAX),
        }
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Euclidean distance, `None` on length mismatch
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    )
}
