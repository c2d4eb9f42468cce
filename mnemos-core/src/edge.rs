//! Typed, weighted relationships between nodes

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node::NodeId;
use crate::temporal::Timestamps;

/// Unique identifier for edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EdgeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Relationship kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    RelatesTo,
    Contradicts,
    Supports,
    DerivedFrom,
    TemporalNext,
    TemporalPrev,
    PartOf,
    SimilarTo,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelatesTo => "relates_to",
            Self::Contradicts => "contradicts",
            Self::Supports => "supports",
            Self::DerivedFrom => "derived_from",
            Self::TemporalNext => "temporal_next",
            Self::TemporalPrev => "temporal_prev",
            Self::PartOf => "part_of",
            Self::SimilarTo => "similar_to",
        }
    }

    /// Relationships that read the same in both directions
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::RelatesTo | Self::Contradicts | Self::SimilarTo)
    }

    /// Relationships that count toward insight patterns. Provenance and
    /// conflict edges describe the graph itself, not the knowledge in it.
    pub fn is_associative(&self) -> bool {
        !matches!(self, Self::DerivedFrom | Self::Contradicts)
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed (optionally bidirectional) relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub edge_type: EdgeType,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub bidirectional: bool,
    /// Strength (0.0 to 1.0)
    pub weight: f32,
    pub time: Timestamps,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Edge {
    /// New edge with weight 1.0; symmetric types are bidirectional
    pub fn new(source: NodeId, target: NodeId, edge_type: EdgeType) -> Self {
        Self {
            id: EdgeId::new(),
            edge_type,
            source,
            target,
            bidirectional: edge_type.is_symmetric(),
            weight: 1.0,
            time: Timestamps::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn with_bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn touches(&self, id: NodeId) -> bool {
        self.source == id || self.target == id
    }

    /// True if this edge joins `a` and `b`, in either direction
    pub fn connects(&self, a: NodeId, b: NodeId) -> bool {
        (self.source == a && self.target == b) || (self.source == b && self.target == a)
    }

    /// The endpoint opposite `id`
    pub fn other_end(&self, id: NodeId) -> Option<NodeId> {
        if self.source == id {
            Some(self.target)
        } else if self.target == id {
            Some(self.source)
        } else {
            None
        }
    }
}
