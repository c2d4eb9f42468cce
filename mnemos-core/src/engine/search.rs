//! Hybrid search
//!
//! Fans out to keyword match over the graph, vector similarity and the
//! caller's working memory at once, merges candidates by node id, and ranks
//! them with a fixed blend of importance, confidence, recency, usage and
//! node type. Relevance from the sources only breaks ties.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::MemoryEngine;
use crate::edge::{Edge, EdgeId};
use crate::error::{MemoryError, Result};
use crate::graph::{QueryPattern, Row};
use crate::node::{Node, NodeId, NodeType};
use crate::temporal::recency_fraction;

const IMPORTANCE_WEIGHT: f32 = 0.3;
const CONFIDENCE_WEIGHT: f32 = 0.2;
const RECENCY_WEIGHT: f32 = 0.2;
const ACCESS_WEIGHT: f32 = 0.1;
const TYPE_WEIGHT: f32 = 0.2;
/// Access count at which the usage component saturates
const ACCESS_SATURATION: f32 = 100.0;

/// Per-call search settings
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Include this session's working memory
    pub session_id: Option<String>,
    /// Restrict results to these node types; empty means all
    pub node_types: Vec<NodeType>,
    /// Minimum vector similarity for a candidate
    pub min_similarity: f32,
    /// Candidates fetched per source, as a multiple of `limit`
    pub candidate_factor: usize,
    /// Return edges touching the result nodes
    pub include_edges: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            session_id: None,
            node_types: vec![],
            min_similarity: 0.0,
            candidate_factor: 3,
            include_edges: true,
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_node_types(mut self, node_types: Vec<NodeType>) -> Self {
        self.node_types = node_types;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_edges(mut self, include_edges: bool) -> Self {
        self.include_edges = include_edges;
        self
    }

    fn candidates(&self) -> usize {
        self.limit.saturating_mul(self.candidate_factor.max(1))
    }
}

/// Where a candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Graph,
    Vector,
    Working,
}

/// A ranked result
#[derive(Debug, Clone, Serialize)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f32,
    /// Best normalized source relevance in [0, 1]
    pub relevance: f32,
    pub sources: Vec<SearchSource>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchStats {
    pub graph_hits: usize,
    pub vector_hits: usize,
    pub working_hits: usize,
    /// Sources that failed and were left out of the merge
    pub failed: Vec<SearchSource>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    pub nodes: Vec<ScoredNode>,
    pub edges: Vec<Edge>,
    pub stats: SearchStats,
}

/// Ranking score in [0, 1]
pub fn rank_score(node: &Node, now: DateTime<Utc>, recency_window: Duration) -> f32 {
    let recency = recency_fraction(node.time.accessed_at, now, recency_window);
    let usage = (node.access_count as f32 / ACCESS_SATURATION).min(1.0);
    let type_bonus = if node.node_type().is_knowledge_bearing() {
        1.0
    } else {
        0.0
    };
    IMPORTANCE_WEIGHT * node.importance
        + CONFIDENCE_WEIGHT * node.confidence
        + RECENCY_WEIGHT * recency
        + ACCESS_WEIGHT * usage
        + TYPE_WEIGHT * type_bonus
}

struct Candidate {
    node: Option<Node>,
    relevance: f32,
    sources: Vec<SearchSource>,
}

impl Candidate {
    fn hit(&mut self, source: SearchSource, relevance: f32) {
        self.relevance = self.relevance.max(relevance.clamp(0.0, 1.0));
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
    }
}

impl MemoryEngine {
    /// Hybrid search. A failing source is logged and omitted; the call only
    /// fails if the ranked nodes cannot be read back.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResults> {
        let started = Instant::now();
        let mut results = SearchResults::default();
        if options.limit == 0 || query.trim().is_empty() {
            return Ok(results);
        }
        let candidates = options.candidates();

        let text_pattern = QueryPattern::TextMatch {
            text: query.to_string(),
            limit: candidates,
        };
        let graph_search = self.graph.scan(&text_pattern);
        let vector_search = async {
            let embedding = self.embedder.embed(query).await?;
            self.vectors
                .search(&embedding, candidates, options.min_similarity)
                .await
        };
        let working_search = async {
            match &options.session_id {
                Some(session) => self.working.get_context(session, candidates).await,
                None => Ok(vec![]),
            }
        };
        let (graph_rows, vector_hits, working_items) =
            tokio::join!(graph_search, vector_search, working_search);

        let mut merged: HashMap<NodeId, Candidate> = HashMap::new();

        match graph_rows {
            Ok(rows) => {
                let scored: Vec<(Node, f32)> = rows
                    .into_iter()
                    .filter_map(|row| match row {
                        Row::Scored { node, score } => Some((node, score)),
                        _ => None,
                    })
                    .collect();
                let top = scored.iter().map(|(_, s)| *s).fold(0.0_f32, f32::max);
                results.stats.graph_hits = scored.len();
                for (node, score) in scored {
                    let relevance = if top > 0.0 { score / top } else { 0.0 };
                    merge(&mut merged, node.id, Some(node), SearchSource::Graph, relevance);
                }
            }
            Err(e) => {
                source_failed(SearchSource::Graph, &e);
                results.stats.failed.push(SearchSource::Graph);
            }
        }

        match vector_hits {
            Ok(hits) => {
                results.stats.vector_hits = hits.len();
                for hit in hits {
                    merge(&mut merged, hit.payload, None, SearchSource::Vector, hit.similarity);
                }
            }
            Err(e) => {
                source_failed(SearchSource::Vector, &e);
                results.stats.failed.push(SearchSource::Vector);
            }
        }

        match working_items {
            Ok(items) => {
                results.stats.working_hits = items.len();
                for node in items {
                    let priority = node.priority();
                    merge(&mut merged, node.id, Some(node), SearchSource::Working, priority);
                }
            }
            Err(e) => {
                source_failed(SearchSource::Working, &e);
                results.stats.failed.push(SearchSource::Working);
            }
        }

        let now = Utc::now();
        let window = self.config.recency_window();
        let type_filter: HashSet<NodeType> = options.node_types.iter().copied().collect();
        let mut ranked = Vec::with_capacity(merged.len());
        for (id, candidate) in merged {
            let node = match candidate.node {
                Some(node) => node,
                // vector hits carry only ids
                None => match self.graph.peek(id).await {
                    Ok(Some(node)) => node,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "skipping unreadable vector hit");
                        continue;
                    }
                },
            };
            if !type_filter.is_empty() && !type_filter.contains(&node.node_type()) {
                continue;
            }
            ranked.push(ScoredNode {
                score: rank_score(&node, now, window),
                node,
                relevance: candidate.relevance,
                sources: candidate.sources,
            });
        }

        // scores equal to four decimals count as tied
        ranked.sort_by(|a, b| {
            score_bucket(b.score)
                .cmp(&score_bucket(a.score))
                .then_with(|| {
                    b.relevance
                        .partial_cmp(&a.relevance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        ranked.truncate(options.limit);

        // returned nodes count as read
        for scored in &mut ranked {
            match self.graph.get(scored.node.id).await {
                Ok(node) => scored.node = node,
                Err(e) => tracing::debug!(id = %scored.node.id, error = %e, "result vanished"),
            }
        }

        if options.include_edges {
            let mut seen: HashSet<EdgeId> = HashSet::new();
            for scored in &ranked {
                let edges = match self.graph.edges_of(scored.node.id).await {
                    Ok(edges) => edges,
                    Err(e) => {
                        tracing::warn!(id = %scored.node.id, error = %e, "edges unavailable");
                        continue;
                    }
                };
                for edge in edges {
                    if seen.insert(edge.id) {
                        results.edges.push(edge);
                    }
                }
            }
        }

        results.nodes = ranked;
        results.stats.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            query,
            results = results.nodes.len(),
            failed = results.stats.failed.len(),
            "search complete"
        );
        Ok(results)
    }
}

/// Degraded sources are expected to recover; anything else is a fault
fn source_failed(source: SearchSource, e: &MemoryError) {
    if e.is_degradation() {
        tracing::warn!(?source, error = %e, "search source degraded");
    } else {
        tracing::error!(?source, error = %e, "search source failed");
    }
}

fn score_bucket(score: f32) -> i64 {
    (score * 10_000.0).round() as i64
}

fn merge(
    merged: &mut HashMap<NodeId, Candidate>,
    id: NodeId,
    node: Option<Node>,
    source: SearchSource,
    relevance: f32,
) {
    let candidate = merged.entry(id).or_insert(Candidate {
        node: None,
        relevance: 0.0,
        sources: vec![],
    });
    if candidate.node.is_none() {
        candidate.node = node;
    }
    candidate.hit(source, relevance);
}
