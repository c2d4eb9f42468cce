//! Memory orchestrator
//!
//! [`MemoryEngine`] owns the vector index and working memory, shares the
//! graph store handle, and coordinates everything that spans components:
//! enrichment on store, hybrid search, consolidation, decay, contradiction
//! detection and insight synthesis.
//!
//! Graph writes are authoritative. Vector index updates that fail are
//! logged and left for [`MemoryEngine::rebuild_vector_index`] to repair.

mod consolidate;
mod contradiction;
mod events;
mod insight;
mod search;
mod snapshot;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub use consolidate::{ConsolidationReport, MergedPair};
pub use contradiction::{is_negation_pair, ContradictionResolution, ResolutionReason};
pub use events::MemoryEvent;
pub use search::{rank_score, ScoredNode, SearchOptions, SearchResults, SearchSource, SearchStats};
pub use snapshot::{ImportReport, Snapshot, SnapshotFormat, SNAPSHOT_VERSION};

use crate::cancel::CancelToken;
use crate::config::MemoryConfig;
use crate::edge::{Edge, EdgeType};
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::graph::{GraphStats, GraphStore};
use crate::node::{MemoryType, Node, NodeId, NodeKind, NodeType};
use crate::vector::{IndexStats, VectorIndex};
use crate::working::WorkingMemory;

/// Per-call options for [`MemoryEngine::store`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub node_type: NodeType,
    /// Classification for memory nodes; `Working` requires a session
    pub memory_type: MemoryType,
    pub session_id: Option<String>,
    /// Working-memory priority
    pub priority: f32,
    pub importance: Option<f32>,
    pub confidence: Option<f32>,
    /// Kind data; derived from the content when absent
    pub kind: Option<NodeKind>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Edges from the new node to existing nodes
    pub links: Vec<(NodeId, EdgeType)>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            node_type: NodeType::Memory,
            memory_type: MemoryType::ShortTerm,
            session_id: None,
            priority: 0.5,
            importance: None,
            confidence: None,
            kind: None,
            tags: vec![],
            metadata: HashMap::new(),
            links: vec![],
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store as a plain node of `node_type`
    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.node_type = NodeType::Memory;
        self.memory_type = memory_type;
        self
    }

    /// Store as a working-memory item of `session_id`
    pub fn with_session(mut self, session_id: impl Into<String>, priority: f32) -> Self {
        self.node_type = NodeType::Memory;
        self.memory_type = MemoryType::Working;
        self.session_id = Some(session_id.into());
        self.priority = priority;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.node_type = kind.node_type();
        self.kind = Some(kind);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_link(mut self, target: NodeId, edge_type: EdgeType) -> Self {
        self.links.push((target, edge_type));
        self
    }

    fn build_node(&self, content: &str, embedding: Option<Vec<f32>>) -> Result<Node> {
        let mut builder = Node::builder().content(content);
        builder = match (&self.kind, self.node_type) {
            (Some(kind), _) => builder.kind(kind.clone()),
            (None, NodeType::Memory) if self.memory_type == MemoryType::Working => {
                let session = self.session_id.as_deref().ok_or_else(|| {
                    MemoryError::validation("working memory requires a session id")
                })?;
                builder.working(session, self.priority)
            }
            (None, NodeType::Memory) => builder.memory(self.memory_type),
            (None, node_type) => builder.kind(NodeKind::from_content(node_type, content)),
        };
        if let Some(importance) = self.importance {
            builder = builder.importance(importance);
        }
        if let Some(confidence) = self.confidence {
            builder = builder.confidence(confidence);
        }
        if let Some(embedding) = embedding {
            builder = builder.embedding(embedding);
        }
        Ok(builder
            .tags(self.tags.clone())
            .metadata_map(self.metadata.clone())
            .build()?)
    }
}

/// Aggregate statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub graph: GraphStats,
    pub index: IndexStats,
    pub working_sessions: usize,
    pub embedder: String,
}

/// Hybrid memory engine
pub struct MemoryEngine {
    graph: Arc<GraphStore>,
    vectors: VectorIndex<NodeId>,
    working: WorkingMemory,
    embedder: Arc<dyn EmbeddingProvider>,
    config: MemoryConfig,
    events: broadcast::Sender<MemoryEvent>,
    /// Serializes consolidation runs
    consolidation: Mutex<()>,
}

impl MemoryEngine {
    /// Build an engine over `graph`, adapting the index dimension to the
    /// provider and indexing every stored embedding.
    pub async fn new(
        graph: Arc<GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        mut config: MemoryConfig,
    ) -> Result<Self> {
        let dimension = embedder.dimension();
        if dimension == 0 {
            return Err(MemoryError::validation("embedding provider reports dimension 0"));
        }
        if config.vector.dimension != dimension {
            tracing::info!(
                configured = config.vector.dimension,
                provider = dimension,
                embedder = embedder.name(),
                "adapting index dimension to embedding provider"
            );
            config.vector.dimension = dimension;
        }

        graph.set_dimension(dimension);
        graph.ensure_indexes().await?;

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let engine = Self {
            vectors: VectorIndex::new(config.vector.clone()),
            working: WorkingMemory::new(Arc::clone(&graph), config.working.clone()),
            graph,
            embedder,
            config,
            events,
            consolidation: Mutex::new(()),
        };
        engine.rebuild_vector_index().await?;
        Ok(engine)
    }

    /// Engine over a fresh in-memory graph
    pub async fn in_memory(embedder: Arc<dyn EmbeddingProvider>, config: MemoryConfig) -> Result<Self> {
        Self::new(Arc::new(GraphStore::in_memory()), embedder, config).await
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn vectors(&self) -> &VectorIndex<NodeId> {
        &self.vectors
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: MemoryEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Embed `text`, returning `None` (and logging) on provider failure
    pub(crate) async fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text).await {
            Ok(vector) if vector.len() == self.vectors.dimension() => Some(vector),
            Ok(vector) => {
                tracing::warn!(
                    expected = self.vectors.dimension(),
                    got = vector.len(),
                    "embedding provider returned wrong dimension"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, continuing without vector");
                None
            }
        }
    }

    /// Add a node's embedding to the index, logging failures
    pub(crate) fn index_node(&self, node: &Node) {
        if let Some(embedding) = &node.embedding {
            if let Err(e) = self.vectors.add(node.id.to_string(), embedding, node.id) {
                tracing::warn!(id = %node.id, error = %e, "failed to index node");
            }
        }
    }

    /// Store content as a new node.
    ///
    /// The node itself is written atomically; embedding, contradiction
    /// detection and insight synthesis are best-effort and only logged on
    /// failure.
    pub async fn store(&self, content: &str, options: StoreOptions) -> Result<Node> {
        if content.trim().is_empty() {
            return Err(MemoryError::validation("content must not be empty"));
        }
        for (target, _) in &options.links {
            if self.graph.peek(*target).await?.is_none() {
                return Err(MemoryError::not_found(target.to_string()));
            }
        }

        let embedding = self.try_embed(content).await;
        let node = options.build_node(content, embedding)?;
        let node = if node.session_id().is_some() {
            let (node, evicted) = self.working.admit(node).await?;
            for id in evicted {
                self.vectors.remove(&id.to_string());
            }
            node
        } else {
            self.graph.create(node).await?
        };
        self.index_node(&node);

        for (target, edge_type) in &options.links {
            self.graph
                .create_edge(node.id, *target, *edge_type, HashMap::new())
                .await?;
        }

        tracing::debug!(id = %node.id, node_type = %node.node_type(), "stored");
        self.emit(MemoryEvent::Stored {
            id: node.id,
            node_type: node.node_type(),
        });

        if node.node_type() == NodeType::Fact && self.config.enable_contradictions {
            if let Err(e) = self.detect_contradictions(node.id).await {
                tracing::warn!(id = %node.id, error = %e, "contradiction detection failed");
            }
        }
        if self.config.enable_insights && node.node_type().seeds_insights() {
            if let Err(e) = self.generate_insights_around(node.id).await {
                tracing::warn!(id = %node.id, error = %e, "insight synthesis failed");
            }
        }

        Ok(node)
    }

    /// Fetch a node, recording the access
    pub async fn get(&self, id: NodeId) -> Result<Node> {
        self.graph.get(id).await
    }

    /// Delete a node, its edges and its vector
    pub async fn delete(&self, id: NodeId) -> Result<()> {
        self.graph.delete(id).await?;
        self.vectors.remove(&id.to_string());
        self.emit(MemoryEvent::Deleted { id });
        Ok(())
    }

    /// Create an edge between two existing nodes
    pub async fn link(&self, source: NodeId, target: NodeId, edge_type: EdgeType) -> Result<Edge> {
        self.graph
            .create_edge(source, target, edge_type, HashMap::new())
            .await
    }

    /// Re-index every stored embedding. Clears a degraded index.
    pub async fn rebuild_vector_index(&self) -> Result<usize> {
        let nodes = self.graph.all_nodes().await?;
        let dimension = self.vectors.dimension();
        self.vectors.clear();

        let mut indexed = 0usize;
        let mut skipped = 0usize;
        for node in &nodes {
            let Some(embedding) = &node.embedding else {
                continue;
            };
            if embedding.len() != dimension {
                skipped += 1;
                continue;
            }
            match self.vectors.add(node.id.to_string(), embedding, node.id) {
                Ok(()) => indexed += 1,
                Err(e) => {
                    tracing::warn!(id = %node.id, error = %e, "skipping unindexable embedding");
                    skipped += 1;
                }
            }
        }
        self.vectors.rebuild();
        tracing::info!(indexed, skipped, nodes = nodes.len(), "vector index rebuilt");
        Ok(indexed)
    }

    pub async fn get_stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            graph: self.graph.stats().await?,
            index: self.vectors.stats(),
            working_sessions: self.working.sessions().await?.len(),
            embedder: self.embedder.name().to_string(),
        })
    }

    /// One maintenance pass: decay, then consolidation
    pub async fn run_maintenance(&self) {
        if let Err(e) = self.apply_decay().await {
            tracing::warn!(error = %e, "decay pass failed");
        }
        if let Err(e) = self.consolidate().await {
            tracing::warn!(error = %e, "consolidation failed");
        }
    }

    /// Spawn the periodic maintenance loop. The first pass runs one
    /// interval after start.
    pub fn start_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let engine = Arc::clone(self);
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let period = self.config.consolidation_interval();

        let task = tokio::spawn(async move {
            tracing::info!(interval_secs = period.as_secs(), "maintenance started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => engine.run_maintenance().await,
                }
            }
            tracing::info!("maintenance stopped");
        });

        MaintenanceHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Running maintenance loop. Dropping the handle stops the loop.
pub struct MaintenanceHandle {
    cancel: CancelToken,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop and wait for an in-flight pass to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "maintenance task panicked");
            }
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        // the loop exits at its next select, releasing the engine
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    pub(crate) async fn engine() -> MemoryEngine {
        engine_with(MemoryConfig::default()).await
    }

    pub(crate) async fn engine_with(config: MemoryConfig) -> MemoryEngine {
        MemoryEngine::in_memory(Arc::new(HashingEmbedder::new(128)), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_dimension_adapts_to_provider() {
        let engine = engine().await;
        assert_eq!(engine.vectors().dimension(), 128);
        assert_eq!(engine.graph().dimension(), Some(128));
    }

    #[tokio::test]
    async fn test_store_indexes_and_emits() {
        let engine = engine().await;
        let mut events = engine.subscribe();

        let node = engine
            .store("the deploy runs nightly", StoreOptions::new())
            .await
            .unwrap();
        assert_eq!(node.memory_type(), Some(MemoryType::ShortTerm));
        assert!(node.embedding.is_some());
        assert!(engine.vectors().contains(&node.id.to_string()));
        assert!(matches!(
            events.recv().await.unwrap(),
            MemoryEvent::Stored { id, .. } if id == node.id
        ));
    }

    #[tokio::test]
    async fn test_store_rejects_empty_content() {
        let engine = engine().await;
        assert!(matches!(
            engine.store("   ", StoreOptions::new()).await,
            Err(MemoryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_store_working_requires_session() {
        let engine = engine().await;
        let err = engine
            .store("x", StoreOptions::new().with_memory_type(MemoryType::Working))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));

        let item = engine
            .store("scratch", StoreOptions::new().with_session("s1", 0.7))
            .await
            .unwrap();
        assert_eq!(item.session_id(), Some("s1"));
        assert_eq!(engine.working().len("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_with_links() {
        let engine = engine().await;
        let a = engine
            .store("a", StoreOptions::new().with_node_type(NodeType::Concept))
            .await
            .unwrap();
        let b = engine
            .store(
                "b",
                StoreOptions::new()
                    .with_node_type(NodeType::Concept)
                    .with_link(a.id, EdgeType::PartOf),
            )
            .await
            .unwrap();
        assert!(engine
            .graph()
            .has_edge_between(a.id, b.id, EdgeType::PartOf)
            .await
            .unwrap());

        let missing = engine
            .store("c", StoreOptions::new().with_link(NodeId::new(), EdgeType::PartOf))
            .await;
        assert!(matches!(missing, Err(MemoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_vector() {
        let engine = engine().await;
        let node = engine.store("to be removed", StoreOptions::new()).await.unwrap();
        engine.delete(node.id).await.unwrap();
        assert!(!engine.vectors().contains(&node.id.to_string()));
        assert!(matches!(engine.get(node.id).await, Err(MemoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rebuild_recovers_degraded_index() {
        let engine = engine().await;
        engine.store("first", StoreOptions::new()).await.unwrap();
        engine.store("second", StoreOptions::new()).await.unwrap();
        engine.vectors().mark_degraded();

        assert_eq!(engine.rebuild_vector_index().await.unwrap(), 2);
        assert!(!engine.vectors().is_degraded());
    }

    #[tokio::test]
    async fn test_stats() {
        let engine = engine().await;
        engine.store("fact one", StoreOptions::new().with_node_type(NodeType::Fact)).await.unwrap();
        engine.store("note", StoreOptions::new().with_session("s1", 0.5)).await.unwrap();

        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.graph.nodes, 2);
        assert_eq!(stats.index.vectors, 2);
        assert_eq!(stats.working_sessions, 1);
        assert_eq!(stats.embedder, "hashing");
    }

    #[tokio::test]
    async fn test_maintenance_start_and_shutdown() {
        let engine = Arc::new(engine().await);
        let handle = engine.start_maintenance();
        assert!(handle.is_running());
        handle.shutdown().await;
        assert_eq!(Arc::strong_count(&engine), 1);
    }

    #[tokio::test]
    async fn test_dropped_maintenance_handle_releases_engine() {
        let engine = Arc::new(engine().await);
        let handle = engine.start_maintenance();
        assert_eq!(Arc::strong_count(&engine), 2);
        drop(handle);

        for _ in 0..100 {
            if Arc::strong_count(&engine) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(Arc::strong_count(&engine), 1);
    }
}
