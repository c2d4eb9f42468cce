//! Insight synthesis
//!
//! Three facts or events joined by enough associative relationships become
//! an insight node with `derived_from` edges back to each of them. A source
//! triple is only ever synthesized once.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::{MemoryEngine, MemoryEvent};
use crate::edge::{Edge, EdgeType};
use crate::error::Result;
use crate::graph::QueryPattern;
use crate::node::{Node, NodeId, NodeKind, NodeType};

/// Upper bound on insights created by one synthesis pass
const MAX_INSIGHTS_PER_RUN: usize = 64;

type Triple = [NodeId; 3];

impl MemoryEngine {
    /// Synthesize insights across the whole graph
    pub async fn generate_insights(&self) -> Result<Vec<Node>> {
        let mut candidates: HashMap<NodeId, Node> = HashMap::new();
        for node_type in [NodeType::Fact, NodeType::Event] {
            for node in self
                .graph
                .scan_nodes(&QueryPattern::NodesByType {
                    node_type,
                    limit: usize::MAX,
                })
                .await?
            {
                candidates.insert(node.id, node);
            }
        }
        self.synthesize(candidates, None).await
    }

    /// Synthesize insights for triples centred on `id` or its neighbours.
    /// Only the two-hop associative neighbourhood of `id` is visited.
    pub async fn generate_insights_around(&self, id: NodeId) -> Result<Vec<Node>> {
        let mut centers: HashSet<NodeId> = HashSet::from([id]);
        let mut reached: HashSet<NodeId> = HashSet::from([id]);
        let mut frontier = vec![id];
        for depth in 0..2 {
            let mut next = Vec::new();
            for current in frontier {
                for edge in self.graph.edges_of(current).await? {
                    if !edge.edge_type.is_associative() {
                        continue;
                    }
                    let Some(other) = edge.other_end(current) else {
                        continue;
                    };
                    if depth == 0 {
                        centers.insert(other);
                    }
                    if reached.insert(other) {
                        next.push(other);
                    }
                }
            }
            frontier = next;
        }

        let mut candidates: HashMap<NodeId, Node> = HashMap::new();
        for node_id in reached {
            if let Some(node) = self.graph.peek(node_id).await? {
                if matches!(node.node_type(), NodeType::Fact | NodeType::Event) {
                    candidates.insert(node_id, node);
                }
            }
        }
        self.synthesize(candidates, Some(centers)).await
    }

    async fn synthesize(
        &self,
        candidates: HashMap<NodeId, Node>,
        centers: Option<HashSet<NodeId>>,
    ) -> Result<Vec<Node>> {
        let mut adjacency: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
        for id in candidates.keys() {
            for edge in self.graph.edges_of(*id).await? {
                if !edge.edge_type.is_associative() {
                    continue;
                }
                if let Some(other) = edge.other_end(*id) {
                    if other != *id && candidates.contains_key(&other) {
                        adjacency.entry(*id).or_default().insert(other);
                    }
                }
            }
        }

        let triples = self.qualifying_triples(&adjacency, centers.as_ref());
        if triples.is_empty() {
            return Ok(vec![]);
        }

        let mut seen: HashSet<Triple> = HashSet::new();
        let mut created = Vec::new();
        for (triple, relationships) in triples {
            if created.len() >= MAX_INSIGHTS_PER_RUN {
                tracing::debug!("insight limit reached for this pass");
                break;
            }
            if !seen.insert(triple) || self.already_synthesized(triple).await? {
                continue;
            }
            let sources: Vec<&Node> = triple.iter().filter_map(|id| candidates.get(id)).collect();
            if sources.len() != 3 {
                continue;
            }
            created.push(self.create_insight(triple, &sources, relationships).await?);
        }
        Ok(created)
    }

    /// Sorted triples with at least `insight_min_relationships` linked pairs,
    /// mapped to their linked-pair count
    fn qualifying_triples(
        &self,
        adjacency: &HashMap<NodeId, BTreeSet<NodeId>>,
        centers: Option<&HashSet<NodeId>>,
    ) -> Vec<(Triple, usize)> {
        let linked = |a: &NodeId, b: &NodeId| adjacency.get(a).is_some_and(|n| n.contains(b));
        let mut found: BTreeSet<(Triple, usize)> = BTreeSet::new();

        for (center, neighbours) in adjacency {
            if centers.is_some_and(|c| !c.contains(center)) {
                continue;
            }
            let neighbours: Vec<&NodeId> = neighbours.iter().collect();
            for (i, b) in neighbours.iter().enumerate() {
                for c in &neighbours[i + 1..] {
                    let mut triple = [*center, **b, **c];
                    triple.sort();
                    let pairs = [(0, 1), (0, 2), (1, 2)]
                        .iter()
                        .filter(|(x, y)| linked(&triple[*x], &triple[*y]))
                        .count();
                    if pairs >= self.config.insight_min_relationships {
                        found.insert((triple, pairs));
                    }
                }
            }
        }
        found.into_iter().collect()
    }

    /// True if an insight already derives from exactly this triple
    async fn already_synthesized(&self, triple: Triple) -> Result<bool> {
        for edge in self.graph.edges_of(triple[0]).await? {
            if edge.edge_type != EdgeType::DerivedFrom || edge.target != triple[0] {
                continue;
            }
            let Some(insight) = self.graph.peek(edge.source).await? else {
                continue;
            };
            if let NodeKind::Insight { sources, .. } = &insight.kind {
                let mut sorted = sources.clone();
                sorted.sort();
                if sorted == triple {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn create_insight(&self, triple: Triple, sources: &[&Node], relationships: usize) -> Result<Node> {
        let pattern = if relationships >= 3 { "cluster" } else { "chain" };
        let summary = format!(
            "{pattern} of {} related statements: {}",
            sources.len(),
            sources
                .iter()
                .map(|n| n.content.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        );
        let importance = sources.iter().map(|n| n.importance).sum::<f32>() / sources.len() as f32;
        let confidence = sources
            .iter()
            .map(|n| n.confidence)
            .fold(1.0_f32, f32::min);

        let mut builder = Node::builder()
            .insight(summary.clone(), pattern, triple.to_vec())
            .importance(importance)
            .confidence(confidence);
        if let Some(embedding) = self.try_embed(&summary).await {
            builder = builder.embedding(embedding);
        }
        let insight = self.graph.create(builder.build()?).await?;
        self.index_node(&insight);

        for source in triple {
            self.graph
                .insert_edge(Edge::new(insight.id, source, EdgeType::DerivedFrom))
                .await?;
        }

        tracing::info!(id = %insight.id, pattern, "insight generated");
        self.emit(MemoryEvent::InsightGenerated {
            id: insight.id,
            sources: triple.to_vec(),
        });
        Ok(insight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::engine::tests::{engine, engine_with};
    use crate::engine::StoreOptions;

    async fn fact(engine: &MemoryEngine, text: &str) -> Node {
        engine
            .store(text, StoreOptions::new().with_node_type(NodeType::Fact))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_chain_becomes_insight_once() {
        let engine = engine().await;
        let a = fact(&engine, "the sensor reports humidity").await;
        let b = fact(&engine, "humidity triggers the fan").await;
        let c = fact(&engine, "the fan draws extra power").await;
        engine.link(a.id, b.id, EdgeType::Supports).await.unwrap();
        engine.link(b.id, c.id, EdgeType::RelatesTo).await.unwrap();

        let insights = engine.generate_insights().await.unwrap();
        assert_eq!(insights.len(), 1);
        let insight = &insights[0];
        assert_eq!(insight.node_type(), NodeType::Insight);
        let NodeKind::Insight { sources, pattern, .. } = &insight.kind else {
            panic!("expected insight kind");
        };
        assert_eq!(pattern, "chain");
        let mut expected = vec![a.id, b.id, c.id];
        expected.sort();
        assert_eq!(sources, &expected);

        let provenance: Vec<Edge> = engine.graph().edges_of(insight.id).await.unwrap();
        assert_eq!(provenance.len(), 3);
        assert!(provenance.iter().all(|e| e.edge_type == EdgeType::DerivedFrom));

        assert!(engine.generate_insights().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_with_links_synthesizes() {
        let engine = engine().await;
        let a = fact(&engine, "orders spike on fridays").await;
        let b = engine
            .store(
                "warehouse staff is short on fridays",
                StoreOptions::new()
                    .with_node_type(NodeType::Event)
                    .with_link(a.id, EdgeType::RelatesTo),
            )
            .await
            .unwrap();
        engine
            .store(
                "friday shipments are late",
                StoreOptions::new()
                    .with_node_type(NodeType::Fact)
                    .with_link(b.id, EdgeType::Supports),
            )
            .await
            .unwrap();

        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.graph.by_node_type.get("insight"), Some(&1));
    }

    #[tokio::test]
    async fn test_unlinked_or_non_associative_ignored() {
        let engine = engine().await;
        let a = fact(&engine, "alpha one").await;
        let b = fact(&engine, "beta two").await;
        let c = fact(&engine, "gamma three").await;
        engine.link(a.id, b.id, EdgeType::Contradicts).await.unwrap();
        engine.link(b.id, c.id, EdgeType::Supports).await.unwrap();
        assert!(engine.generate_insights().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_min_relationships_is_configurable() {
        let engine = engine_with(MemoryConfig {
            insight_min_relationships: 3,
            ..Default::default()
        })
        .await;
        let a = fact(&engine, "node a").await;
        let b = fact(&engine, "node b").await;
        let c = fact(&engine, "node c").await;
        engine.link(a.id, b.id, EdgeType::Supports).await.unwrap();
        engine.link(b.id, c.id, EdgeType::Supports).await.unwrap();
        assert!(engine.generate_insights().await.unwrap().is_empty());

        engine.link(a.id, c.id, EdgeType::Supports).await.unwrap();
        let insights = engine.generate_insights().await.unwrap();
        assert_eq!(insights.len(), 1);
        assert!(matches!(&insights[0].kind, NodeKind::Insight { pattern, .. } if pattern == "cluster"));
    }

    #[tokio::test]
    async fn test_around_only_visits_local_neighbourhood() {
        let engine = engine_with(MemoryConfig::default().with_insights(false)).await;
        let a = fact(&engine, "the cache warms at boot").await;
        let b = fact(&engine, "boot takes ninety seconds").await;
        let c = fact(&engine, "health checks time out at sixty seconds").await;
        engine.link(a.id, b.id, EdgeType::Supports).await.unwrap();
        engine.link(b.id, c.id, EdgeType::RelatesTo).await.unwrap();

        let x = fact(&engine, "invoices are sent monthly").await;
        let y = fact(&engine, "monthly invoices go to finance").await;
        let z = fact(&engine, "finance closes books on the fifth").await;
        engine.link(x.id, y.id, EdgeType::Supports).await.unwrap();
        engine.link(y.id, z.id, EdgeType::RelatesTo).await.unwrap();

        let local = engine.generate_insights_around(a.id).await.unwrap();
        assert_eq!(local.len(), 1);
        let NodeKind::Insight { sources, .. } = &local[0].kind else {
            panic!("expected insight kind");
        };
        assert!(sources.contains(&a.id) && !sources.contains(&x.id));
        assert!(engine.generate_insights_around(c.id).await.unwrap().is_empty());

        // the far chain is still found by a full pass
        let full = engine.generate_insights().await.unwrap();
        assert_eq!(full.len(), 1);
        let NodeKind::Insight { sources, .. } = &full[0].kind else {
            panic!("expected insight kind");
        };
        assert!(sources.contains(&y.id));
    }
}
