//! Consolidation and decay
//!
//! Consolidation promotes reinforced short-term memories, merges
//! near-duplicate memories and prunes stale working items. Each step reads
//! current state and only acts on nodes that still qualify, so a second run
//! right after the first finds nothing to do.

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;

use super::{MemoryEngine, MemoryEvent};
use crate::edge::Edge;
use crate::error::{MemoryError, Result};
use crate::graph::QueryPattern;
use crate::node::{MemoryType, Node, NodeId, NodeType};

/// Two memories folded into one
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedPair {
    pub kept: NodeId,
    pub removed: NodeId,
    pub similarity: f32,
}

/// Outcome of one consolidation run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidationReport {
    pub promoted: Vec<NodeId>,
    pub merged: Vec<MergedPair>,
    pub pruned: Vec<NodeId>,
}

impl ConsolidationReport {
    pub fn is_empty(&self) -> bool {
        self.promoted.is_empty() && self.merged.is_empty() && self.pruned.is_empty()
    }
}

impl MemoryEngine {
    /// Run one consolidation pass. Concurrent calls queue behind each other.
    pub async fn consolidate(&self) -> Result<ConsolidationReport> {
        let _guard = self.consolidation.lock().await;

        let report = ConsolidationReport {
            promoted: self.promote_reinforced().await?,
            merged: self.merge_duplicates().await?,
            pruned: self.prune_working().await?,
        };

        if report.is_empty() {
            tracing::debug!("consolidation found nothing to do");
        } else {
            tracing::info!(
                promoted = report.promoted.len(),
                merged = report.merged.len(),
                pruned = report.pruned.len(),
                "consolidation complete"
            );
            self.emit(MemoryEvent::Consolidated(report.clone()));
        }
        Ok(report)
    }

    async fn promote_reinforced(&self) -> Result<Vec<NodeId>> {
        let threshold = self.config.consolidation_threshold;
        let candidates = self
            .graph
            .scan_nodes(&QueryPattern::MemoriesByType {
                memory_type: MemoryType::ShortTerm,
                min_reinforcement: threshold,
            })
            .await?;

        let mut promoted = Vec::new();
        for candidate in candidates {
            let mut changed = false;
            self.graph
                .modify(candidate.id, |node| {
                    changed = node.ready_for_consolidation(threshold) && node.promote_to_long_term();
                    changed
                })
                .await?;
            if changed {
                promoted.push(candidate.id);
            }
        }
        Ok(promoted)
    }

    async fn merge_duplicates(&self) -> Result<Vec<MergedPair>> {
        let threshold = self.config.duplicate_similarity;
        let mut memories: Vec<Node> = self
            .graph
            .scan_nodes(&QueryPattern::NodesByType {
                node_type: NodeType::Memory,
                limit: usize::MAX,
            })
            .await?
            .into_iter()
            .filter(|n| n.embedding.is_some() && n.session_id().is_none())
            .collect();
        // most important first so the survivor of a cluster is stable
        memories.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.time.created_at.cmp(&b.time.created_at))
                .then(a.id.cmp(&b.id))
        });

        let mut removed: HashSet<NodeId> = HashSet::new();
        let mut merged = Vec::new();
        for keeper in &memories {
            if removed.contains(&keeper.id) {
                continue;
            }
            let Some(embedding) = &keeper.embedding else {
                continue;
            };
            let hits = match self
                .vectors
                .search(embedding, self.config.contradiction_candidates.max(2), threshold)
                .await
            {
                Ok(hits) => hits,
                Err(MemoryError::IndexUnavailable(msg)) => {
                    tracing::warn!(reason = %msg, "skipping duplicate merge");
                    return Ok(merged);
                }
                Err(e) => return Err(e),
            };

            for hit in hits {
                let other = hit.payload;
                if other == keeper.id || removed.contains(&other) {
                    continue;
                }
                let Some(duplicate) = self.graph.peek(other).await? else {
                    continue;
                };
                if duplicate.node_type() != NodeType::Memory || duplicate.session_id().is_some() {
                    continue;
                }
                self.absorb(keeper.id, &duplicate).await?;
                removed.insert(other);
                merged.push(MergedPair {
                    kept: keeper.id,
                    removed: other,
                    similarity: hit.similarity,
                });
            }
        }
        Ok(merged)
    }

    /// Fold `duplicate` into `keeper`: usage adds up, tags and metadata
    /// union, edges move over, and the duplicate is deleted.
    async fn absorb(&self, keeper: NodeId, duplicate: &Node) -> Result<()> {
        self.graph
            .modify(keeper, |node| {
                node.set_importance(node.importance.max(duplicate.importance));
                node.set_confidence(node.confidence.max(duplicate.confidence));
                node.access_count = node.access_count.saturating_add(duplicate.access_count);
                node.reinforcement_count = node
                    .reinforcement_count
                    .saturating_add(duplicate.reinforcement_count);
                for tag in &duplicate.tags {
                    if !node.tags.contains(tag) {
                        node.tags.push(tag.clone());
                    }
                }
                for (key, value) in &duplicate.metadata {
                    node.metadata.entry(key.clone()).or_insert_with(|| value.clone());
                }
                node.time.touch_updated();
                true
            })
            .await?;

        for edge in self.graph.edges_of(duplicate.id).await? {
            let Some(other) = edge.other_end(duplicate.id) else {
                continue;
            };
            if other == keeper || self.graph.has_edge_between(keeper, other, edge.edge_type).await? {
                continue;
            }
            let (source, target) = if edge.source == duplicate.id {
                (keeper, other)
            } else {
                (other, keeper)
            };
            let moved = Edge::new(source, target, edge.edge_type)
                .with_weight(edge.weight)
                .with_bidirectional(edge.bidirectional)
                .with_metadata(edge.metadata.clone());
            self.graph.insert_edge(moved).await?;
        }

        self.graph.delete(duplicate.id).await?;
        self.vectors.remove(&duplicate.id.to_string());
        self.emit(MemoryEvent::Deleted { id: duplicate.id });
        Ok(())
    }

    async fn prune_working(&self) -> Result<Vec<NodeId>> {
        let pruned = self
            .working
            .prune_stale(
                self.config.stale_working_age(),
                self.config.stale_working_importance,
            )
            .await?;
        for id in &pruned {
            self.vectors.remove(&id.to_string());
        }
        Ok(pruned)
    }

    /// Decay importance and confidence of idle short-term and working
    /// memories. Returns the ids that changed.
    pub async fn apply_decay(&self) -> Result<Vec<NodeId>> {
        let now = Utc::now();
        let interval = self.config.decay_interval();
        let candidates = self
            .graph
            .scan_nodes(&QueryPattern::DecayCandidates {
                accessed_before: now - interval,
            })
            .await?;

        let mut decayed = Vec::new();
        for candidate in candidates {
            let mut changed = false;
            self.graph
                .modify(candidate.id, |node| {
                    changed = node.apply_decay(now, interval);
                    changed
                })
                .await?;
            if changed {
                decayed.push(candidate.id);
            }
        }

        if !decayed.is_empty() {
            tracing::info!(count = decayed.len(), "decay applied");
            self.emit(MemoryEvent::Decayed {
                count: decayed.len(),
            });
        }
        Ok(decayed)
    }
}
