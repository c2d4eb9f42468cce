//! Vector similarity index
//!
//! Nearest-neighbour search over `(id, vector, payload)` triples, independent
//! of node semantics. Two backends share one interface:
//!
//! - **Flat**: exact brute-force scan, zero setup
//! - **HNSW**: instant-distance graph for large collections; vectors added
//!   since the last build are scanned exactly until the next rebuild
//!
//! Exact scans run in bounded batches with a cooperative yield between them,
//! and check an optional [`CancelToken`] before every batch.

mod hnsw;
mod metric;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::{IndexBackend, Metric, VectorIndexConfig};
use crate::error::{MemoryError, Result};
use crate::node::check_embedding;

use hnsw::HnswGraph;
pub use metric::{cosine_similarity, euclidean_distance};

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit<P> {
    pub id: String,
    pub payload: P,
    pub similarity: f32,
}

/// Index counters for stats output
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub vectors: usize,
    pub graph_size: usize,
    pub pending: usize,
    pub tombstones: usize,
    pub dimension: usize,
    pub backend: &'static str,
    pub degraded: bool,
}

struct Entry<P> {
    vector: Vec<f32>,
    payload: P,
}

struct IndexState<P> {
    entries: HashMap<String, Entry<P>>,
    graph: Option<HnswGraph>,
    /// Added or replaced since the graph was built
    pending: HashSet<String>,
    /// Still in the graph but removed or replaced
    tombstones: HashSet<String>,
}

impl<P> IndexState<P> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            graph: None,
            pending: HashSet::new(),
            tombstones: HashSet::new(),
        }
    }

    fn in_graph(&self, id: &str) -> bool {
        self.graph.as_ref().is_some_and(|g| g.contains(id))
    }

    fn rebuild(&mut self, config: &VectorIndexConfig) {
        self.pending.clear();
        self.tombstones.clear();
        self.graph = match config.backend {
            IndexBackend::Flat => None,
            IndexBackend::Hnsw {
                ef_construction, ..
            } => {
                if self.entries.is_empty() {
                    None
                } else {
                    Some(HnswGraph::build(
                        self.entries
                            .iter()
                            .map(|(id, entry)| (id, entry.vector.as_slice())),
                        config.metric,
                        ef_construction,
                    ))
                }
            }
        };
    }
}

/// Similarity index with pluggable backend
pub struct VectorIndex<P> {
    config: VectorIndexConfig,
    state: RwLock<IndexState<P>>,
    degraded: AtomicBool,
}

impl<P: Clone + Send + Sync> VectorIndex<P> {
    pub fn new(config: VectorIndexConfig) -> Self {
        Self {
            config,
            state: RwLock::new(IndexState::new()),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &VectorIndexConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn metric(&self) -> Metric {
        self.config.metric
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().entries.contains_key(id)
    }

    /// Insert or replace a vector
    pub fn add(&self, id: impl Into<String>, vector: &[f32], payload: P) -> Result<()> {
        check_embedding(vector, Some(self.config.dimension))?;
        let id = id.into();
        let mut vector = vector.to_vec();
        self.config.metric.prepare(&mut vector);

        let mut state = self.state.write();
        if state.in_graph(&id) {
            state.tombstones.insert(id.clone());
        }
        if matches!(self.config.backend, IndexBackend::Hnsw { .. }) {
            state.pending.insert(id.clone());
        }
        state.entries.insert(id, Entry { vector, payload });

        if let IndexBackend::Hnsw { rebuild_after, .. } = self.config.backend {
            let graph_size = state.graph.as_ref().map_or(0, HnswGraph::len);
            // Grow the rebuild threshold with the graph so rebuild cost stays amortized
            if state.pending.len() >= rebuild_after.max(graph_size / 2).max(1) {
                state.rebuild(&self.config);
                tracing::debug!(vectors = state.entries.len(), "HNSW graph rebuilt");
            }
        }
        Ok(())
    }

    /// Remove from the searchable set. Returns whether the id was present.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write();
        let removed = state.entries.remove(id).is_some();
        state.pending.remove(id);
        if state.in_graph(id) {
            state.tombstones.insert(id.to_string());
        }
        removed
    }

    /// Recompute the backend structure from the current vector set
    pub fn rebuild(&self) {
        let mut state = self.state.write();
        state.rebuild(&self.config);
        self.degraded.store(false, Ordering::SeqCst);
        tracing::info!(
            vectors = state.entries.len(),
            backend = backend_name(&self.config.backend),
            "vector index rebuilt"
        );
    }

    /// Drop every vector
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = IndexState::new();
    }

    /// Flag the index as out of sync; searches fail with `IndexUnavailable`
    /// until the next [`VectorIndex::rebuild`]
    pub fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::SeqCst);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Top `k` hits with similarity >= `threshold`, best first
    pub async fn search(&self, query: &[f32], k: usize, threshold: f32) -> Result<Vec<VectorHit<P>>> {
        self.search_with_cancel(query, k, threshold, None).await
    }

    pub async fn search_with_cancel(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<VectorHit<P>>> {
        if self.is_degraded() {
            return Err(MemoryError::index_unavailable("index awaiting rebuild"));
        }
        check_embedding(query, Some(self.config.dimension))?;
        if k == 0 {
            return Ok(vec![]);
        }
        let metric = self.config.metric;
        let mut query = query.to_vec();
        metric.prepare(&mut query);

        let (mut hits, scan_ids) = {
            let state = self.state.read();
            let seeded = match &state.graph {
                Some(graph) => {
                    let hits = graph
                        .nearest(&query, metric, k, &state.tombstones)
                        .into_iter()
                        .filter_map(|id| {
                            let entry = state.entries.get(&id)?;
                            let similarity = metric.similarity(&query, &entry.vector);
                            (similarity >= threshold).then(|| VectorHit {
                                id,
                                payload: entry.payload.clone(),
                                similarity,
                            })
                        })
                        .collect::<Vec<_>>();
                    let pending: Vec<String> = state.pending.iter().cloned().collect();
                    (hits, pending)
                }
                None => (Vec::new(), state.entries.keys().cloned().collect::<Vec<_>>()),
            };
            seeded
        };

        let batch_size = self.config.batch_size.max(1);
        let batched = scan_ids.len() > batch_size;
        for chunk in scan_ids.chunks(batch_size) {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(MemoryError::Cancelled);
            }
            {
                let state = self.state.read();
                for id in chunk {
                    let Some(entry) = state.entries.get(id) else {
                        continue;
                    };
                    let similarity = metric.similarity(&query, &entry.vector);
                    if similarity >= threshold {
                        hits.push(VectorHit {
                            id: id.clone(),
                            payload: entry.payload.clone(),
                            similarity,
                        });
                    }
                }
            }
            keep_top_k(&mut hits, k);
            if batched {
                tokio::task::yield_now().await;
            }
        }

        keep_top_k(&mut hits, k);
        Ok(hits)
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        IndexStats {
            vectors: state.entries.len(),
            graph_size: state.graph.as_ref().map_or(0, HnswGraph::len),
            pending: state.pending.len(),
            tombstones: state.tombstones.len(),
            dimension: self.config.dimension,
            backend: backend_name(&self.config.backend),
            degraded: self.is_degraded(),
        }
    }
}

fn backend_name(backend: &IndexBackend) -> &'static str {
    match backend {
        IndexBackend::Flat => "flat",
        IndexBackend::Hnsw { .. } => "hnsw",
    }
}

fn keep_top_k<P>(hits: &mut Vec<VectorHit<P>>, k: usize) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.dedup_by(|a, b| a.id == b.id);
    hits.truncate(k);
}
