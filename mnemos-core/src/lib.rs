//! Mnemos Memory Engine
//!
//! Hybrid graph + vector memory for AI agents: typed knowledge in a property
//! graph, semantic recall through a vector index, and a per-session working
//! memory with bounded capacity.
//!
//! ## Features
//!
//! - **Graph store** - Typed nodes and edges over an in-memory or RocksDB backend
//! - **Vector index** - Exact or HNSW cosine search with graceful degradation
//! - **Working memory** - Session-scoped items with focus, priority and eviction
//! - **Hybrid search** - Keyword + semantic + working context, blended by recency,
//!   importance, confidence and access frequency
//! - **Maintenance** - Decay, promotion, duplicate merging, contradiction
//!   detection and insight synthesis
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mnemos_core::{HashingEmbedder, MemoryConfig, MemoryEngine, SearchOptions, StoreOptions};
//!
//! let engine = MemoryEngine::in_memory(Arc::new(HashingEmbedder::new(384)), MemoryConfig::default()).await?;
//!
//! engine
//!     .store("Refunds are accepted within 30 days", StoreOptions::new().with_importance(0.8))
//!     .await?;
//!
//! let results = engine.search("refund policy", SearchOptions::new().with_limit(5)).await?;
//! ```

pub mod cancel;
pub mod config;
pub mod edge;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod graph;
pub mod node;
pub mod temporal;
pub mod vector;
pub mod working;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use config::{IndexBackend, MemoryConfig, Metric, VectorIndexConfig, WorkingMemoryConfig};
pub use edge::{Edge, EdgeId, EdgeType};
pub use embedding::{CachedEmbedder, EmbeddingProvider, HashingEmbedder};
pub use engine::{
    ConsolidationReport, ContradictionResolution, EngineStats, ImportReport, MaintenanceHandle,
    MemoryEngine, MemoryEvent, ScoredNode, SearchOptions, SearchResults, SnapshotFormat, StoreOptions,
};
pub use error::{MemoryError, Result};
pub use graph::{GraphBackend, GraphStore, MemoryBackend, QueryPattern, RocksBackend, Row};
pub use node::{MemoryType, Node, NodeBuilder, NodeId, NodeKind, NodePatch, NodeType};
pub use temporal::Timestamps;
pub use vector::{VectorHit, VectorIndex};
pub use working::WorkingMemory;
