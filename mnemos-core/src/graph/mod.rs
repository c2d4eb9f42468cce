//! Graph store: typed nodes and edges over a pluggable backend
//!
//! The store enforces the invariants backends do not: score ranges, the
//! embedding dimension, referential integrity of edges, and access tracking.
//! Reads through [`GraphStore::get`] and [`GraphStore::query`] count as
//! accesses; [`GraphStore::peek`] and [`GraphStore::scan`] do not, so
//! maintenance passes never perturb recency.

mod backend;
mod memory;
mod rocks;
mod text;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

pub use backend::{GraphBackend, QueryPattern, Row, INDEX_STATEMENTS};
pub use memory::MemoryBackend;
pub use rocks::RocksBackend;
pub use text::{tokenize, KeywordIndex};

use crate::edge::{Edge, EdgeId, EdgeType};
use crate::error::{MemoryError, Result};
use crate::node::{Node, NodeId, NodePatch};

/// Nodes and edges reached by a traversal
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Record counts by type
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub nodes: u64,
    pub edges: u64,
    pub by_node_type: BTreeMap<String, u64>,
    pub by_memory_type: BTreeMap<String, u64>,
    pub by_edge_type: BTreeMap<String, u64>,
    pub backend: &'static str,
}

/// Graph store handle shared by every engine component
pub struct GraphStore {
    backend: Arc<dyn GraphBackend>,
    /// Expected embedding dimension, 0 until known
    dimension: AtomicUsize,
}

impl GraphStore {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            backend,
            dimension: AtomicUsize::new(0),
        }
    }

    /// Store over the in-memory arena backend
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Store over RocksDB at `path`
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(RocksBackend::open(path)?)))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Embeddings written after this call must have `dimension` entries
    pub fn set_dimension(&self, dimension: usize) {
        self.dimension.store(dimension, Ordering::SeqCst);
    }

    pub fn dimension(&self) -> Option<usize> {
        match self.dimension.load(Ordering::SeqCst) {
            0 => None,
            dim => Some(dim),
        }
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        self.backend.ensure_indexes(INDEX_STATEMENTS).await
    }

    /// Persist a new node
    pub async fn create(&self, node: Node) -> Result<Node> {
        node.validate(self.dimension())?;
        if self.backend.get_node(node.id).await?.is_some() {
            return Err(MemoryError::validation(format!("node {} already exists", node.id)));
        }
        self.backend.put_node(&node).await?;
        tracing::debug!(id = %node.id, node_type = %node.node_type(), "node created");
        Ok(node)
    }

    /// Insert or overwrite a node as-is, keeping its timestamps
    pub async fn save(&self, node: Node) -> Result<Node> {
        node.validate(self.dimension())?;
        self.backend.put_node(&node).await?;
        Ok(node)
    }

    /// Fetch a node, recording the access
    pub async fn get(&self, id: NodeId) -> Result<Node> {
        self.modify(id, |node| {
            node.record_access();
            true
        })
        .await?
        .ok_or_else(|| MemoryError::not_found(id.to_string()))
    }

    /// Fetch a node without touching its access stats
    pub async fn peek(&self, id: NodeId) -> Result<Option<Node>> {
        self.backend.get_node(id).await
    }

    pub async fn update(&self, id: NodeId, patch: NodePatch) -> Result<Node> {
        let dimension = self.dimension();
        let mut outcome = Ok(());
        let node = self
            .modify(id, |node| match patch.apply(node, dimension) {
                Ok(()) => true,
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            })
            .await?
            .ok_or_else(|| MemoryError::not_found(id.to_string()))?;
        outcome.map(|()| node)
    }

    /// Apply `f` to the stored node and write it back if `f` returns true.
    /// The read, `f` and the write happen atomically for that node, so
    /// concurrent callers never overwrite each other. `Ok(None)` when the
    /// node is gone.
    pub async fn modify<F>(&self, id: NodeId, f: F) -> Result<Option<Node>>
    where
        F: FnOnce(&mut Node) -> bool + Send,
    {
        let mut f = Some(f);
        let mut apply = |node: &mut Node| f.take().is_some_and(|f| f(node));
        self.backend.update_node(id, &mut apply).await
    }

    /// Delete a node and every edge touching it
    pub async fn delete(&self, id: NodeId) -> Result<()> {
        match self.backend.delete_node(id).await? {
            Some(edges) => {
                tracing::debug!(id = %id, edges = edges.len(), "node deleted");
                Ok(())
            }
            None => Err(MemoryError::not_found(id.to_string())),
        }
    }

    pub async fn create_edge(
        &self,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Edge> {
        self.insert_edge(Edge::new(source, target, edge_type).with_metadata(metadata))
            .await
    }

    /// Persist a prepared edge after checking both endpoints exist
    pub async fn insert_edge(&self, edge: Edge) -> Result<Edge> {
        if !edge.weight.is_finite() || !(0.0..=1.0).contains(&edge.weight) {
            return Err(MemoryError::validation(format!(
                "edge weight must be within [0, 1], got {}",
                edge.weight
            )));
        }
        let source_exists = self.backend.get_node(edge.source).await?.is_some();
        let target_exists = self.backend.get_node(edge.target).await?.is_some();
        if !source_exists || !target_exists {
            return Err(MemoryError::dangling_edge(edge.source, edge.target));
        }
        self.backend.put_edge(&edge).await?;
        Ok(edge)
    }

    pub async fn get_edge(&self, id: EdgeId) -> Result<Edge> {
        self.backend
            .get_edge(id)
            .await?
            .ok_or_else(|| MemoryError::not_found(id.to_string()))
    }

    pub async fn delete_edge(&self, id: EdgeId) -> Result<()> {
        if self.backend.delete_edge(id).await? {
            Ok(())
        } else {
            Err(MemoryError::not_found(id.to_string()))
        }
    }

    pub async fn edges_of(&self, id: NodeId) -> Result<Vec<Edge>> {
        self.backend.edges_of(id).await
    }

    /// True if an edge of `edge_type` joins `a` and `b` in either direction
    pub async fn has_edge_between(&self, a: NodeId, b: NodeId, edge_type: EdgeType) -> Result<bool> {
        Ok(self
            .backend
            .edges_of(a)
            .await?
            .iter()
            .any(|e| e.edge_type == edge_type && e.connects(a, b)))
    }

    /// Run a pattern; returned nodes count as accessed
    pub async fn query(&self, pattern: &QueryPattern) -> Result<Vec<Row>> {
        let mut rows = self.scan(pattern).await?;
        for row in &mut rows {
            if let Some(node) = row.node_mut() {
                // last-write-wins: touch the freshest copy
                if let Some(fresh) = self
                    .modify(node.id, |n| {
                        n.record_access();
                        true
                    })
                    .await?
                {
                    *node = fresh;
                }
            }
        }
        Ok(rows)
    }

    /// Run a pattern without access tracking
    pub async fn scan(&self, pattern: &QueryPattern) -> Result<Vec<Row>> {
        tracing::trace!(
            backend = self.backend.name(),
            template = pattern.template(),
            params = %serde_json::Value::Object(pattern.params()),
            "running pattern"
        );
        self.backend.run(pattern).await
    }

    /// Nodes of a scan, untracked
    pub async fn scan_nodes(&self, pattern: &QueryPattern) -> Result<Vec<Node>> {
        Ok(self
            .scan(pattern)
            .await?
            .into_iter()
            .filter_map(Row::into_node)
            .collect())
    }

    pub async fn all_nodes(&self) -> Result<Vec<Node>> {
        self.scan_nodes(&QueryPattern::AllNodes).await
    }

    pub async fn all_edges(&self) -> Result<Vec<Edge>> {
        Ok(self
            .scan(&QueryPattern::AllEdges)
            .await?
            .into_iter()
            .filter_map(Row::into_edge)
            .collect())
    }

    /// Breadth-first neighbourhood of `id` up to `depth` hops, excluding
    /// `id` itself. Edges are followed in both directions.
    pub async fn find_related(&self, id: NodeId, depth: usize) -> Result<Subgraph> {
        if self.backend.get_node(id).await?.is_none() {
            return Err(MemoryError::not_found(id.to_string()));
        }

        let mut visited: HashSet<NodeId> = HashSet::from([id]);
        let mut seen_edges: HashSet<EdgeId> = HashSet::new();
        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::from([(id, 0)]);
        let mut subgraph = Subgraph::default();

        while let Some((current, hops)) = queue.pop_front() {
            if hops >= depth {
                continue;
            }
            for edge in self.backend.edges_of(current).await? {
                let Some(next) = edge.other_end(current) else {
                    continue;
                };
                if seen_edges.insert(edge.id) {
                    subgraph.edges.push(edge);
                }
                if visited.insert(next) {
                    if let Some(node) = self.backend.get_node(next).await? {
                        subgraph.nodes.push(node);
                        queue.push_back((next, hops + 1));
                    }
                }
            }
        }
        Ok(subgraph)
    }

    /// Raise importance by `amount` (capped) and count the reinforcement
    pub async fn reinforce(&self, id: NodeId, amount: f32) -> Result<Node> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(MemoryError::validation(format!(
                "reinforcement amount must be a non-negative number, got {amount}"
            )));
        }
        self.modify(id, |node| {
            node.reinforce(amount);
            true
        })
        .await?
        .ok_or_else(|| MemoryError::not_found(id.to_string()))
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        let mut stats = GraphStats {
            backend: self.backend.name(),
            ..Default::default()
        };
        for row in self.scan(&QueryPattern::CountByType).await? {
            let Row::Count { key, count } = row else {
                continue;
            };
            if let Some(t) = key.strip_prefix("node:") {
                stats.nodes += count;
                stats.by_node_type.insert(t.to_string(), count);
            } else if let Some(t) = key.strip_prefix("memory:") {
                stats.by_memory_type.insert(t.to_string(), count);
            } else if let Some(t) = key.strip_prefix("edge:") {
                stats.edges += count;
                stats.by_edge_type.insert(t.to_string(), count);
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MemoryType;

    fn store() -> GraphStore {
        GraphStore::in_memory()
    }

    async fn fact(store: &GraphStore, text: &str) -> Node {
        store
            .create(Node::builder().fact(text).build().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_records_access() {
        let store = store();
        let node = fact(&store, "tracked").await;

        let first = store.get(node.id).await.unwrap();
        assert_eq!(first.access_count, 1);
        let second = store.get(node.id).await.unwrap();
        assert_eq!(second.access_count, 2);
        assert!(second.time.accessed_at >= node.time.accessed_at);

        let peeked = store.peek(node.id).await.unwrap().unwrap();
        assert_eq!(peeked.access_count, 2);
    }

    async fn hammer_reads(store: Arc<GraphStore>, id: NodeId, tasks: usize, reads: usize) {
        let mut handles = Vec::new();
        for _ in 0..tasks {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..reads {
                    store.get(id).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_count_every_access() {
        let store = Arc::new(store());
        let node = fact(&store, "hot node").await;

        hammer_reads(Arc::clone(&store), node.id, 8, 500).await;
        assert_eq!(store.peek(node.id).await.unwrap().unwrap().access_count, 4000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_count_every_access_on_rocksdb() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(GraphStore::open(dir.path()).unwrap());
        let node = fact(&store, "hot node").await;

        hammer_reads(Arc::clone(&store), node.id, 8, 200).await;
        assert_eq!(store.peek(node.id).await.unwrap().unwrap().access_count, 1600);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_promotion_survives_concurrent_reads() {
        let store = Arc::new(store());
        let node = store
            .create(
                Node::builder()
                    .memory(MemoryType::ShortTerm)
                    .content("promote me")
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();

        let readers = tokio::spawn(hammer_reads(Arc::clone(&store), node.id, 4, 300));
        let promoted = store
            .modify(node.id, |n| n.promote_to_long_term())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(promoted.memory_type(), Some(MemoryType::LongTerm));
        readers.await.unwrap();

        let stored = store.peek(node.id).await.unwrap().unwrap();
        assert_eq!(stored.memory_type(), Some(MemoryType::LongTerm));
        assert_eq!(stored.access_count, 1200);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let err = store().get(NodeId::new()).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_wrong_dimension() {
        let store = store();
        store.set_dimension(4);
        let node = Node::builder().fact("f").embedding(vec![0.0; 3]).build().unwrap();
        assert!(matches!(
            store.create(node).await,
            Err(MemoryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_validates_patch() {
        let store = store();
        let node = fact(&store, "patch me").await;

        let err = store
            .update(node.id, NodePatch::new().confidence(1.2))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
        assert_eq!(store.peek(node.id).await.unwrap().unwrap().confidence, node.confidence);

        let updated = store
            .update(node.id, NodePatch::new().confidence(0.4))
            .await
            .unwrap();
        assert_eq!(updated.confidence, 0.4);
        assert!(updated.time.updated_at >= node.time.updated_at);
    }

    #[tokio::test]
    async fn test_dangling_edge_rejected() {
        let store = store();
        let a = fact(&store, "a").await;
        let err = store
            .create_edge(a.id, NodeId::new(), EdgeType::Supports, HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::ReferentialIntegrity { .. }));
    }

    #[tokio::test]
    async fn test_delete_cascades_edges() {
        let store = store();
        let a = fact(&store, "a").await;
        let b = fact(&store, "b").await;
        store
            .create_edge(a.id, b.id, EdgeType::RelatesTo, HashMap::new())
            .await
            .unwrap();

        store.delete(a.id).await.unwrap();
        assert!(store.edges_of(b.id).await.unwrap().is_empty());
        assert!(matches!(
            store.delete(a.id).await,
            Err(MemoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_related_respects_depth() {
        let store = store();
        let a = fact(&store, "a").await;
        let b = fact(&store, "b").await;
        let c = fact(&store, "c").await;
        store
            .create_edge(a.id, b.id, EdgeType::RelatesTo, HashMap::new())
            .await
            .unwrap();
        store
            .create_edge(c.id, b.id, EdgeType::Supports, HashMap::new())
            .await
            .unwrap();

        let one = store.find_related(a.id, 1).await.unwrap();
        assert_eq!(one.nodes.len(), 1);
        assert_eq!(one.nodes[0].id, b.id);

        let two = store.find_related(a.id, 2).await.unwrap();
        let ids: HashSet<NodeId> = two.nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, HashSet::from([b.id, c.id]));
        assert_eq!(two.edges.len(), 2);
    }

    #[tokio::test]
    async fn test_query_tracks_access_scan_does_not() {
        let store = store();
        let node = fact(&store, "queried").await;
        let pattern = QueryPattern::NodesByType {
            node_type: crate::node::NodeType::Fact,
            limit: 10,
        };

        store.scan(&pattern).await.unwrap();
        assert_eq!(store.peek(node.id).await.unwrap().unwrap().access_count, 0);

        let rows = store.query(&pattern).await.unwrap();
        assert_eq!(rows[0].node().unwrap().access_count, 1);
        assert_eq!(store.peek(node.id).await.unwrap().unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_reinforce_clamps() {
        let store = store();
        let node = store
            .create(
                Node::builder()
                    .memory(MemoryType::ShortTerm)
                    .content("m")
                    .importance(0.9)
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();
        let reinforced = store.reinforce(node.id, 0.5).await.unwrap();
        assert_eq!(reinforced.importance, 1.0);
        assert_eq!(reinforced.reinforcement_count, 1);
        assert!(store.reinforce(node.id, f32::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let store = store();
        let a = fact(&store, "a").await;
        let b = fact(&store, "b").await;
        store
            .create_edge(a.id, b.id, EdgeType::Contradicts, HashMap::new())
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.by_node_type["fact"], 2);
        assert_eq!(stats.by_edge_type["contradicts"], 1);
        assert_eq!(stats.backend, "memory");
    }

    #[tokio::test]
    async fn test_ensure_indexes_passes_statements_to_backend() {
        let backend = Arc::new(testing::FaultyBackend::new());
        let store = GraphStore::new(backend.clone());
        store.ensure_indexes().await.unwrap();
        let issued = backend.index_statements();
        assert_eq!(issued.len(), INDEX_STATEMENTS.len());
        assert!(issued.iter().all(|s| s.starts_with("CREATE")));

        let dir = tempfile::tempdir().unwrap();
        GraphStore::open(dir.path()).unwrap().ensure_indexes().await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_through_fault_free_backend() {
        let store = GraphStore::new(Arc::new(testing::FaultyBackend::new()));
        fact(&store, "indexed fact").await;
        let pattern = QueryPattern::NodesByType {
            node_type: crate::node::NodeType::Fact,
            limit: 5,
        };
        assert_eq!(store.scan_nodes(&pattern).await.unwrap().len(), 1);
        assert_eq!(store.backend_name(), "faulty");
    }
}
