//! Engine configuration
//!
//! All settings have working defaults and deserialize with `#[serde(default)]`,
//! so a host can load a partial document from whatever format it uses.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Similarity metric for the vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// `1 - cosine_distance`; vectors are L2-normalized on insert and query
    #[default]
    Cosine,
    /// `1 / (1 + euclidean_distance)`
    Euclidean,
}

/// Vector index backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexBackend {
    /// Exact brute-force scan
    #[default]
    Flat,
    /// instant-distance HNSW graph, rebuilt once `rebuild_after` pending
    /// vectors have accumulated
    Hnsw {
        ef_construction: usize,
        rebuild_after: usize,
    },
}

impl IndexBackend {
    pub fn hnsw() -> Self {
        Self::Hnsw {
            ef_construction: 100,
            rebuild_after: 256,
        }
    }
}

/// Vector index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    /// Embedding dimension; replaced by the provider's dimension at engine start
    pub dimension: usize,
    pub metric: Metric,
    pub backend: IndexBackend,
    /// Vectors scored between cooperative yields
    pub batch_size: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            metric: Metric::Cosine,
            backend: IndexBackend::Flat,
            batch_size: 1024,
        }
    }
}

/// Working memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingMemoryConfig {
    /// Maximum items per session
    pub max_items: usize,
    /// Share of unfocused items evicted when a session is full
    pub eviction_fraction: f32,
    /// Priority added to items on focus
    pub focus_boost: f32,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            max_items: 20,
            eviction_fraction: 0.2,
            focus_boost: 0.2,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub vector: VectorIndexConfig,
    pub working: WorkingMemoryConfig,

    /// Reinforcements needed before a short-term memory is promoted
    pub consolidation_threshold: u32,
    /// Seconds between background maintenance runs
    pub consolidation_interval_secs: u64,
    /// Idle seconds before a short-term or working memory starts decaying
    pub decay_interval_secs: u64,
    /// Age in seconds after which a low-importance working item is pruned
    pub stale_working_secs: u64,
    /// Working items below this importance are prunable once stale
    pub stale_working_importance: f32,
    /// Similarity at which two memories are merged during consolidation
    pub duplicate_similarity: f32,

    pub enable_contradictions: bool,
    /// Minimum similarity for two facts to be compared for negation
    pub contradiction_similarity: f32,
    /// Candidates fetched from the vector index per contradiction check
    pub contradiction_candidates: usize,

    pub enable_insights: bool,
    /// Relationships a triple must share to become an insight
    pub insight_min_relationships: usize,

    /// Access older than this contributes nothing to recency ranking
    pub recency_window_secs: u64,
    /// Capacity of the engine event channel
    pub event_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            vector: VectorIndexConfig::default(),
            working: WorkingMemoryConfig::default(),
            consolidation_threshold: 3,
            consolidation_interval_secs: 5 * 60,
            decay_interval_secs: 60 * 60,
            stale_working_secs: 60 * 60,
            stale_working_importance: 0.3,
            duplicate_similarity: 0.95,
            enable_contradictions: true,
            contradiction_similarity: 0.7,
            contradiction_candidates: 10,
            enable_insights: true,
            insight_min_relationships: 2,
            recency_window_secs: 7 * 24 * 60 * 60,
            event_capacity: 256,
        }
    }
}

impl MemoryConfig {
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.vector.dimension = dimension;
        self
    }

    pub fn with_index_backend(mut self, backend: IndexBackend) -> Self {
        self.vector.backend = backend;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.vector.metric = metric;
        self
    }

    pub fn with_max_working_items(mut self, max_items: usize) -> Self {
        self.working.max_items = max_items;
        self
    }

    pub fn with_insights(mut self, enabled: bool) -> Self {
        self.enable_insights = enabled;
        self
    }

    pub fn with_contradictions(mut self, enabled: bool) -> Self {
        self.enable_contradictions = enabled;
        self
    }

    pub fn consolidation_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.consolidation_interval_secs.max(1))
    }

    pub fn decay_interval(&self) -> Duration {
        secs(self.decay_interval_secs)
    }

    pub fn stale_working_age(&self) -> Duration {
        secs(self.stale_working_secs)
    }

    pub fn recency_window(&self) -> Duration {
        secs(self.recency_window_secs)
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.working.max_items, 20);
        assert_eq!(config.consolidation_interval_secs, 300);
        assert_eq!(config.contradiction_similarity, 0.7);
        assert_eq!(config.insight_min_relationships, 2);
        assert_eq!(config.vector.metric, Metric::Cosine);
    }

    #[test]
    fn test_partial_deserialize() {
        let config: MemoryConfig = serde_json::from_str(
            r#"{"consolidation_threshold": 5, "working": {"max_items": 8}}"#,
        )
        .unwrap();
        assert_eq!(config.consolidation_threshold, 5);
        assert_eq!(config.working.max_items, 8);
        assert_eq!(config.working.focus_boost, 0.2);
        assert!(config.enable_insights);
    }

    #[test]
    fn test_backend_deserialize() {
        let config: VectorIndexConfig = serde_json::from_str(
            r#"{"backend": {"type": "hnsw", "ef_construction": 64, "rebuild_after": 10}}"#,
        )
        .unwrap();
        assert_eq!(
            config.backend,
            IndexBackend::Hnsw {
                ef_construction: 64,
                rebuild_after: 10
            }
        );
    }

    #[test]
    fn test_durations() {
        let config = MemoryConfig::default();
        assert_eq!(config.decay_interval().num_minutes(), 60);
        assert_eq!(config.consolidation_interval().as_secs(), 300);
    }
}
