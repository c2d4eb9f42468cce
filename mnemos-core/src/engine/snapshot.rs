//! Export and import of the whole graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MemoryEngine;
use crate::edge::Edge;
use crate::error::{MemoryError, Result};
use crate::node::{check_embedding, Node};

/// Current snapshot schema version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Wire format for [`Snapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFormat {
    Json,
    MessagePack,
}

impl SnapshotFormat {
    pub fn encode(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        Ok(match self {
            Self::Json => serde_json::to_vec_pretty(snapshot)?,
            Self::MessagePack => rmp_serde::to_vec_named(snapshot)?,
        })
    }

    pub fn decode(&self, data: &[u8]) -> Result<Snapshot> {
        Ok(match self {
            Self::Json => serde_json::from_slice(data)?,
            Self::MessagePack => rmp_serde::from_slice(data)?,
        })
    }
}

/// Counts from one import
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub nodes: usize,
    pub edges: usize,
    pub skipped_nodes: usize,
    /// Edges whose endpoints were not in the graph
    pub skipped_edges: usize,
    /// Embeddings dropped for having the wrong dimension
    pub stripped_embeddings: usize,
}

impl MemoryEngine {
    /// Serialize every node and edge
    pub async fn export(&self, format: SnapshotFormat) -> Result<Vec<u8>> {
        let mut nodes = self.graph.all_nodes().await?;
        nodes.sort_by_key(|n| (n.time.created_at, n.id));
        let mut edges = self.graph.all_edges().await?;
        edges.sort_by_key(|e| (e.time.created_at, e.id));

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            exported_at: Utc::now(),
            nodes,
            edges,
        };
        let bytes = format.encode(&snapshot)?;
        tracing::info!(
            nodes = snapshot.nodes.len(),
            edges = snapshot.edges.len(),
            bytes = bytes.len(),
            ?format,
            "exported snapshot"
        );
        Ok(bytes)
    }

    /// Load a snapshot, overwriting nodes and edges with the same ids.
    /// Dangling edges and wrong-dimension embeddings are skipped.
    pub async fn import(&self, data: &[u8], format: SnapshotFormat) -> Result<ImportReport> {
        let snapshot = format.decode(data)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(MemoryError::validation(format!(
                "snapshot version {} is newer than supported {SNAPSHOT_VERSION}",
                snapshot.version
            )));
        }

        let dimension = self.vectors.dimension();
        let mut report = ImportReport::default();
        for mut node in snapshot.nodes {
            if let Some(embedding) = &node.embedding {
                if check_embedding(embedding, Some(dimension)).is_err() {
                    node.embedding = None;
                    report.stripped_embeddings += 1;
                }
            }
            match self.graph.save(node).await {
                Ok(node) => {
                    self.vectors.remove(&node.id.to_string());
                    self.index_node(&node);
                    report.nodes += 1;
                }
                Err(MemoryError::Validation(msg)) => {
                    tracing::warn!(reason = %msg, "skipping invalid node in snapshot");
                    report.skipped_nodes += 1;
                }
                Err(e) => return Err(e),
            }
        }

        for edge in snapshot.edges {
            match self.graph.insert_edge(edge).await {
                Ok(_) => report.edges += 1,
                Err(MemoryError::ReferentialIntegrity { .. } | MemoryError::Validation(_)) => {
                    report.skipped_edges += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            nodes = report.nodes,
            edges = report.edges,
            skipped_nodes = report.skipped_nodes,
            skipped_edges = report.skipped_edges,
            "imported snapshot"
        );
        Ok(report)
    }
}
