//! Engine notifications

use serde::Serialize;

use super::consolidate::ConsolidationReport;
use crate::edge::EdgeId;
use crate::node::{NodeId, NodeType};

/// Published on the engine's broadcast channel. Delivery is best-effort:
/// slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MemoryEvent {
    Stored {
        id: NodeId,
        node_type: NodeType,
    },
    Deleted {
        id: NodeId,
    },
    ContradictionDetected {
        edge: EdgeId,
        fact: NodeId,
        conflicting: NodeId,
        similarity: f32,
    },
    InsightGenerated {
        id: NodeId,
        sources: Vec<NodeId>,
    },
    Consolidated(ConsolidationReport),
    Decayed {
        count: usize,
    },
}
