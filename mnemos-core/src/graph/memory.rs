//! In-memory arena backend
//!
//! Nodes and edges live in id-keyed tables; adjacency is kept as edge ids
//! per node so relationships never hold references into the tables.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{GraphBackend, QueryPattern, Row};
use super::text::KeywordIndex;
use crate::edge::{Edge, EdgeId};
use crate::error::Result;
use crate::node::{MemoryType, Node, NodeId};

/// Id-indexed node and edge tables
#[derive(Default)]
pub struct MemoryBackend {
    nodes: DashMap<NodeId, Node>,
    edges: DashMap<EdgeId, Edge>,
    adjacency: DashMap<NodeId, HashSet<EdgeId>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn upsert_node(&self, node: &Node) {
        self.nodes.insert(node.id, node.clone());
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<Node> {
        self.nodes.get(&id).map(|n| n.value().clone())
    }

    /// Run `f` on a copy under the shard lock, committing it if `f` returns true
    pub(crate) fn update_node_with(
        &self,
        id: NodeId,
        f: &mut (dyn FnMut(&mut Node) -> bool + Send),
    ) -> Option<Node> {
        let mut entry = self.nodes.get_mut(&id)?;
        let mut node = entry.value().clone();
        if f(&mut node) {
            *entry.value_mut() = node.clone();
        }
        Some(node)
    }

    pub(crate) fn remove_node(&self, id: NodeId) -> Option<Vec<EdgeId>> {
        self.nodes.remove(&id)?;
        let incident: Vec<EdgeId> = self
            .adjacency
            .remove(&id)
            .map(|(_, ids)| ids.into_iter().collect())
            .unwrap_or_default();
        for edge_id in &incident {
            self.remove_edge(*edge_id);
        }
        Some(incident)
    }

    pub(crate) fn upsert_edge(&self, edge: &Edge) {
        if let Some(previous) = self.edges.insert(edge.id, edge.clone()) {
            // endpoints may have changed on overwrite
            self.unlink(&previous);
        }
        self.adjacency.entry(edge.source).or_default().insert(edge.id);
        self.adjacency.entry(edge.target).or_default().insert(edge.id);
    }

    pub(crate) fn edge(&self, id: EdgeId) -> Option<Edge> {
        self.edges.get(&id).map(|e| e.value().clone())
    }

    pub(crate) fn remove_edge(&self, id: EdgeId) -> bool {
        match self.edges.remove(&id) {
            Some((_, edge)) => {
                self.unlink(&edge);
                true
            }
            None => false,
        }
    }

    fn unlink(&self, edge: &Edge) {
        for end in [edge.source, edge.target] {
            if let Some(mut ids) = self.adjacency.get_mut(&end) {
                ids.remove(&edge.id);
            }
        }
    }

    pub(crate) fn incident_edges(&self, id: NodeId) -> Vec<Edge> {
        let ids: Vec<EdgeId> = match self.adjacency.get(&id) {
            Some(ids) => ids.iter().copied().collect(),
            None => return vec![],
        };
        let mut edges: Vec<Edge> = ids.into_iter().filter_map(|e| self.edge(e)).collect();
        edges.sort_by_key(|e| e.time.created_at);
        edges
    }

    fn nodes_where(&self, pred: impl Fn(&Node) -> bool) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Interpret a query pattern against the tables
    pub(crate) fn evaluate(&self, pattern: &QueryPattern) -> Vec<Row> {
        match pattern {
            QueryPattern::NodesByType { node_type, limit } => {
                let mut nodes = self.nodes_where(|n| n.node_type() == *node_type);
                nodes.sort_by(|a, b| {
                    b.importance
                        .partial_cmp(&a.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                nodes.truncate(*limit);
                nodes.into_iter().map(Row::Node).collect()
            }
            QueryPattern::MemoriesByType {
                memory_type,
                min_reinforcement,
            } => self
                .nodes_where(|n| {
                    n.memory_type() == Some(*memory_type)
                        && n.reinforcement_count >= *min_reinforcement
                })
                .into_iter()
                .map(Row::Node)
                .collect(),
            QueryPattern::TextMatch { text, limit } => {
                let snapshot: Vec<Node> = self.nodes.iter().map(|e| e.value().clone()).collect();
                let index = KeywordIndex::build(&snapshot);
                let scores = index.search(text, *limit);
                let mut by_id: std::collections::HashMap<NodeId, Node> =
                    snapshot.into_iter().map(|n| (n.id, n)).collect();
                scores
                    .into_iter()
                    .filter_map(|(id, score)| {
                        by_id.remove(&id).map(|node| Row::Scored { node, score })
                    })
                    .collect()
            }
            QueryPattern::SessionItems { session_id } => self
                .nodes_where(|n| n.session_id() == Some(session_id.as_str()))
                .into_iter()
                .map(Row::Node)
                .collect(),
            QueryPattern::EdgesByType { edge_type } => self
                .edges
                .iter()
                .filter(|e| e.edge_type == *edge_type)
                .map(|e| Row::Edge(e.value().clone()))
                .collect(),
            QueryPattern::DecayCandidates { accessed_before } => self
                .nodes_where(|n| {
                    n.memory_type().is_some_and(|t| t.decays())
                        && n.time.accessed_at < *accessed_before
                })
                .into_iter()
                .map(Row::Node)
                .collect(),
            QueryPattern::StaleWorkingItems {
                created_before,
                max_importance,
            } => self
                .nodes_where(|n| {
                    n.memory_type() == Some(MemoryType::Working)
                        && n.time.created_at < *created_before
                        && n.importance < *max_importance
                })
                .into_iter()
                .map(Row::Node)
                .collect(),
            QueryPattern::AllNodes => self.nodes_where(|_| true).into_iter().map(Row::Node).collect(),
            QueryPattern::AllEdges => self
                .edges
                .iter()
                .map(|e| Row::Edge(e.value().clone()))
                .collect(),
            QueryPattern::CountByType => {
                let mut counts: BTreeMap<String, u64> = BTreeMap::new();
                for entry in self.nodes.iter() {
                    let node = entry.value();
                    *counts.entry(format!("node:{}", node.node_type())).or_default() += 1;
                    if let Some(memory_type) = node.memory_type() {
                        *counts.entry(format!("memory:{memory_type}")).or_default() += 1;
                    }
                }
                for entry in self.edges.iter() {
                    *counts.entry(format!("edge:{}", entry.edge_type)).or_default() += 1;
                }
                counts
                    .into_iter()
                    .map(|(key, count)| Row::Count { key, count })
                    .collect()
            }
        }
    }
}

#[async_trait]
impl GraphBackend for MemoryBackend {
    async fn ensure_indexes(&self, statements: &[&str]) -> Result<()> {
        for statement in statements {
            tracing::trace!(backend = "memory", statement, "served by id tables");
        }
        tracing::debug!(backend = "memory", indexes = statements.len(), "indexes ready");
        Ok(())
    }

    async fn put_node(&self, node: &Node) -> Result<()> {
        self.upsert_node(node);
        Ok(())
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.node(id))
    }

    async fn update_node(
        &self,
        id: NodeId,
        f: &mut (dyn for<'n> FnMut(&'n mut Node) -> bool + Send),
    ) -> Result<Option<Node>> {
        Ok(self.update_node_with(id, f))
    }

    async fn delete_node(&self, id: NodeId) -> Result<Option<Vec<EdgeId>>> {
        Ok(self.remove_node(id))
    }

    async fn put_edge(&self, edge: &Edge) -> Result<()> {
        self.upsert_edge(edge);
        Ok(())
    }

    async fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>> {
        Ok(self.edge(id))
    }

    async fn delete_edge(&self, id: EdgeId) -> Result<bool> {
        Ok(self.remove_edge(id))
    }

    async fn edges_of(&self, id: NodeId) -> Result<Vec<Edge>> {
        Ok(self.incident_edges(id))
    }

    async fn run(&self, pattern: &QueryPattern) -> Result<Vec<Row>> {
        Ok(self.evaluate(pattern))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
