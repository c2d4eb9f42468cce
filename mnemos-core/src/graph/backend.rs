//! Backing-store protocol for the graph
//!
//! A backend stores node and edge records and answers a closed set of
//! parameterized query patterns. Remote graph databases run the Cypher
//! template of each pattern with [`QueryPattern::params`] bound; the bundled
//! backends interpret the enum directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::edge::{Edge, EdgeId, EdgeType};
use crate::error::Result;
use crate::node::{MemoryType, Node, NodeId, NodeType};

/// Index statements issued once by `ensure_indexes`
pub const INDEX_STATEMENTS: &[&str] = &[
    "CREATE INDEX node_id IF NOT EXISTS FOR (n:Node) ON (n.id)",
    "CREATE INDEX node_type IF NOT EXISTS FOR (n:Node) ON (n.node_type)",
    "CREATE INDEX node_memory_type IF NOT EXISTS FOR (n:Node) ON (n.memory_type)",
    "CREATE INDEX node_session IF NOT EXISTS FOR (n:Node) ON (n.session_id)",
    "CREATE INDEX node_accessed IF NOT EXISTS FOR (n:Node) ON (n.accessed_at)",
    "CREATE FULLTEXT INDEX node_content IF NOT EXISTS FOR (n:Node) ON EACH [n.content]",
];

/// Parameterized read patterns
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPattern {
    /// Nodes of one type, most important first
    NodesByType { node_type: NodeType, limit: usize },
    /// Memory nodes of one memory type reinforced at least `min_reinforcement` times
    MemoriesByType {
        memory_type: MemoryType,
        min_reinforcement: u32,
    },
    /// Keyword match over node text, BM25-ranked
    TextMatch { text: String, limit: usize },
    /// Working items of one session
    SessionItems { session_id: String },
    /// All edges of one type
    EdgesByType { edge_type: EdgeType },
    /// Decaying memories last read before `accessed_before`
    DecayCandidates { accessed_before: DateTime<Utc> },
    /// Working items created before `created_before` below `max_importance`
    StaleWorkingItems {
        created_before: DateTime<Utc>,
        max_importance: f32,
    },
    /// Every node
    AllNodes,
    /// Every edge
    AllEdges,
    /// Counts by node type, memory type and edge type
    CountByType,
}

impl QueryPattern {
    /// Cypher text for remote backends
    pub fn template(&self) -> &'static str {
        match self {
            Self::NodesByType { .. } => {
                "MATCH (n:Node {node_type: $node_type}) RETURN n ORDER BY n.importance DESC LIMIT $limit"
            }
            Self::MemoriesByType { .. } => {
                "MATCH (n:Node {node_type: 'memory', memory_type: $memory_type}) \
                 WHERE n.reinforcement_count >= $min_reinforcement RETURN n"
            }
            Self::TextMatch { .. } => {
                "CALL db.index.fulltext.queryNodes('node_content', $text) YIELD node, score \
                 RETURN node, score ORDER BY score DESC LIMIT $limit"
            }
            Self::SessionItems { .. } => {
                "MATCH (n:Node {memory_type: 'working', session_id: $session_id}) RETURN n"
            }
            Self::EdgesByType { .. } => "MATCH ()-[r {edge_type: $edge_type}]->() RETURN r",
            Self::DecayCandidates { .. } => {
                "MATCH (n:Node) WHERE n.memory_type IN ['short_term', 'working'] \
                 AND n.accessed_at < $accessed_before RETURN n"
            }
            Self::StaleWorkingItems { .. } => {
                "MATCH (n:Node {memory_type: 'working'}) WHERE n.created_at < $created_before \
                 AND n.importance < $max_importance RETURN n"
            }
            Self::AllNodes => "MATCH (n:Node) RETURN n",
            Self::AllEdges => "MATCH ()-[r]->() RETURN r",
            Self::CountByType => {
                "MATCH (n:Node) RETURN 'node:' + n.node_type AS key, count(n) AS count \
                 UNION ALL MATCH (n:Node) WHERE n.memory_type IS NOT NULL \
                 RETURN 'memory:' + n.memory_type AS key, count(n) AS count \
                 UNION ALL MATCH ()-[r]->() RETURN 'edge:' + r.edge_type AS key, count(r) AS count"
            }
        }
    }

    /// Bound parameters for [`template`](Self::template)
    pub fn params(&self) -> Map<String, Value> {
        let value = match self {
            Self::NodesByType { node_type, limit } => {
                json!({ "node_type": node_type.as_str(), "limit": limit })
            }
            Self::MemoriesByType {
                memory_type,
                min_reinforcement,
            } => json!({
                "memory_type": memory_type.as_str(),
                "min_reinforcement": min_reinforcement,
            }),
            Self::TextMatch { text, limit } => json!({ "text": text, "limit": limit }),
            Self::SessionItems { session_id } => json!({ "session_id": session_id }),
            Self::EdgesByType { edge_type } => json!({ "edge_type": edge_type.as_str() }),
            Self::DecayCandidates { accessed_before } => {
                json!({ "accessed_before": accessed_before.to_rfc3339() })
            }
            Self::StaleWorkingItems {
                created_before,
                max_importance,
            } => json!({
                "created_before": created_before.to_rfc3339(),
                "max_importance": max_importance,
            }),
            Self::AllNodes | Self::AllEdges | Self::CountByType => json!({}),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// One result row
#[derive(Debug, Clone)]
pub enum Row {
    Node(Node),
    /// Node with its text-match score
    Scored { node: Node, score: f32 },
    Edge(Edge),
    Count { key: String, count: u64 },
}

impl Row {
    pub fn node(&self) -> Option<&Node> {
        match self {
            Row::Node(node) | Row::Scored { node, .. } => Some(node),
            _ => None,
        }
    }

    pub fn node_mut(&mut self) -> Option<&mut Node> {
        match self {
            Row::Node(node) | Row::Scored { node, .. } => Some(node),
            _ => None,
        }
    }

    pub fn into_node(self) -> Option<Node> {
        match self {
            Row::Node(node) | Row::Scored { node, .. } => Some(node),
            _ => None,
        }
    }

    pub fn into_edge(self) -> Option<Edge> {
        match self {
            Row::Edge(edge) => Some(edge),
            _ => None,
        }
    }
}

/// Storage protocol behind [`GraphStore`](super::GraphStore)
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Create the indexes described by `statements`; called once at startup.
    /// Backends that answer patterns from their own tables may treat them as
    /// already satisfied.
    async fn ensure_indexes(&self, statements: &[&str]) -> Result<()>;

    /// Insert or overwrite a node record
    async fn put_node(&self, node: &Node) -> Result<()>;

    async fn get_node(&self, id: NodeId) -> Result<Option<Node>>;

    /// Apply `f` to the stored node and persist the result if it returns
    /// true. Runs atomically with respect to every other write of the same
    /// node. `None` if the node does not exist.
    async fn update_node(
        &self,
        id: NodeId,
        f: &mut (dyn for<'n> FnMut(&'n mut Node) -> bool + Send),
    ) -> Result<Option<Node>>;

    /// Remove a node and its incident edges. Returns the removed edge ids,
    /// or `None` if the node did not exist.
    async fn delete_node(&self, id: NodeId) -> Result<Option<Vec<EdgeId>>>;

    /// Insert or overwrite an edge record; endpoints are checked by the caller
    async fn put_edge(&self, edge: &Edge) -> Result<()>;

    async fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>>;

    async fn delete_edge(&self, id: EdgeId) -> Result<bool>;

    /// Edges with `id` as either endpoint
    async fn edges_of(&self, id: NodeId) -> Result<Vec<Edge>>;

    /// Run a query pattern
    async fn run(&self, pattern: &QueryPattern) -> Result<Vec<Row>>;

    /// Backend name for logs and stats
    fn name(&self) -> &'static str;
}
