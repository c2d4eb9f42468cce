//! Node types and builders
//!
//! A node is one unit of knowledge. Its kind-specific fields live in the
//! closed [`NodeKind`] union; everything the engine ranks, decays or indexes
//! lives on [`Node`] itself.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::temporal::{decayed, Timestamps};

/// Decay rate applied to memory nodes when none is given
pub const DEFAULT_DECAY_RATE: f32 = 0.1;

/// Tag carried by every working-memory item
pub const WORKING_TAG: &str = "working";

/// Importance multiplier applied on promotion to long-term memory
pub const PROMOTION_BOOST: f32 = 1.5;

/// Unique identifier for nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Node type discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Concept,
    Fact,
    Event,
    Entity,
    Document,
    Question,
    Insight,
    Memory,
}

impl NodeType {
    pub const ALL: [NodeType; 8] = [
        NodeType::Concept,
        NodeType::Fact,
        NodeType::Event,
        NodeType::Entity,
        NodeType::Document,
        NodeType::Question,
        NodeType::Insight,
        NodeType::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concept => "concept",
            Self::Fact => "fact",
            Self::Event => "event",
            Self::Entity => "entity",
            Self::Document => "document",
            Self::Question => "question",
            Self::Insight => "insight",
            Self::Memory => "memory",
        }
    }

    /// Types that receive the search ranking bonus
    pub fn is_knowledge_bearing(&self) -> bool {
        matches!(self, Self::Fact | Self::Insight | Self::Memory)
    }

    /// Types that trigger insight synthesis on store
    pub fn seeds_insights(&self) -> bool {
        matches!(self, Self::Fact | Self::Event | Self::Entity)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        NodeType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| MemoryError::validation(format!("unknown node type: {s}")))
    }
}

/// Memory classification attached to memory nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    #[default]
    ShortTerm,
    LongTerm,
    Working,
    Episodic,
    Semantic,
    Procedural,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
            Self::Working => "working",
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
        }
    }

    /// Only short-term and working memories lose importance over time
    pub fn decays(&self) -> bool {
        matches!(self, Self::ShortTerm | Self::Working)
    }

    /// Classifications that may be promoted to long-term memory
    pub fn promotable(&self) -> bool {
        matches!(self, Self::ShortTerm | Self::Working)
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session membership of a working-memory item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingSlot {
    pub session_id: String,
    /// Attention priority (0.0 to 1.0)
    pub priority: f32,
    #[serde(default)]
    pub focused: bool,
}

impl WorkingSlot {
    pub fn new(session_id: impl Into<String>, priority: f32) -> Self {
        Self {
            session_id: session_id.into(),
            priority: priority.clamp(0.0, 1.0),
            focused: false,
        }
    }

    pub fn boost(&mut self, amount: f32) {
        self.priority = (self.priority + amount).clamp(0.0, 1.0);
    }
}

/// Kind-specific node data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum NodeKind {
    Concept {
        name: String,
        #[serde(default)]
        description: String,
    },
    Fact {
        statement: String,
        #[serde(default)]
        evidence: Vec<String>,
        #[serde(default)]
        verified: bool,
    },
    Event {
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        occurred_at: Option<DateTime<Utc>>,
        #[serde(default)]
        participants: Vec<String>,
    },
    Entity {
        name: String,
        #[serde(default)]
        entity_type: String,
        #[serde(default)]
        aliases: Vec<String>,
    },
    Document {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    Question {
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answer: Option<String>,
    },
    Insight {
        summary: String,
        pattern: String,
        #[serde(default)]
        sources: Vec<NodeId>,
    },
    Memory {
        memory_type: MemoryType,
        decay_rate: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working: Option<WorkingSlot>,
    },
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Concept { .. } => NodeType::Concept,
            Self::Fact { .. } => NodeType::Fact,
            Self::Event { .. } => NodeType::Event,
            Self::Entity { .. } => NodeType::Entity,
            Self::Document { .. } => NodeType::Document,
            Self::Question { .. } => NodeType::Question,
            Self::Insight { .. } => NodeType::Insight,
            Self::Memory { .. } => NodeType::Memory,
        }
    }

    /// Default kind data for plain content of the given type
    pub fn from_content(node_type: NodeType, content: &str) -> Self {
        let text = content.to_string();
        match node_type {
            NodeType::Concept => Self::Concept {
                name: text,
                description: String::new(),
            },
            NodeType::Fact => Self::Fact {
                statement: text,
                evidence: vec![],
                verified: false,
            },
            NodeType::Event => Self::Event {
                description: text,
                occurred_at: None,
                participants: vec![],
            },
            NodeType::Entity => Self::Entity {
                name: text,
                entity_type: String::new(),
                aliases: vec![],
            },
            NodeType::Document => Self::Document {
                title: text,
                source: None,
            },
            NodeType::Question => Self::Question {
                question: text,
                answer: None,
            },
            NodeType::Insight => Self::Insight {
                summary: text,
                pattern: String::new(),
                sources: vec![],
            },
            NodeType::Memory => Self::Memory {
                memory_type: MemoryType::ShortTerm,
                decay_rate: DEFAULT_DECAY_RATE,
                working: None,
            },
        }
    }

    /// The text a kind is primarily about
    pub fn primary_text(&self) -> &str {
        match self {
            Self::Concept { name, .. } | Self::Entity { name, .. } => name,
            Self::Fact { statement, .. } => statement,
            Self::Event { description, .. } => description,
            Self::Document { title, .. } => title,
            Self::Question { question, .. } => question,
            Self::Insight { summary, .. } => summary,
            Self::Memory { .. } => "",
        }
    }
}

/// A persisted unit of knowledge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier
    pub id: NodeId,
    /// Type and structured data
    pub kind: NodeKind,
    /// Text this node was embedded from
    pub content: String,
    /// Creation, update and access times
    pub time: Timestamps,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub reinforcement_count: u32,
    /// Relevance (0.0 to 1.0), decays for short-term memories
    pub importance: f32,
    /// Certainty (0.0 to 1.0)
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Node {
    /// Create a new builder for Node
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// Memory classification, for memory nodes
    pub fn memory_type(&self) -> Option<MemoryType> {
        match &self.kind {
            NodeKind::Memory { memory_type, .. } => Some(*memory_type),
            _ => None,
        }
    }

    pub fn working_slot(&self) -> Option<&WorkingSlot> {
        match &self.kind {
            NodeKind::Memory { working, .. } => working.as_ref(),
            _ => None,
        }
    }

    pub fn working_slot_mut(&mut self) -> Option<&mut WorkingSlot> {
        match &mut self.kind {
            NodeKind::Memory { working, .. } => working.as_mut(),
            _ => None,
        }
    }

    /// Session this node belongs to, if it is a working-memory item
    pub fn session_id(&self) -> Option<&str> {
        self.working_slot().map(|slot| slot.session_id.as_str())
    }

    pub fn is_focused(&self) -> bool {
        self.working_slot().is_some_and(|slot| slot.focused)
    }

    pub fn priority(&self) -> f32 {
        self.working_slot().map_or(0.0, |slot| slot.priority)
    }

    pub fn set_importance(&mut self, importance: f32) {
        self.importance = importance.clamp(0.0, 1.0);
    }

    pub fn set_confidence(&mut self, confidence: f32) {
        self.confidence = confidence.clamp(0.0, 1.0);
    }

    /// Count a read
    pub fn record_access(&mut self) {
        self.time.touch_accessed();
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Raise importance (and working priority) by `amount`, capped at 1.0
    pub fn reinforce(&mut self, amount: f32) {
        self.set_importance(self.importance + amount);
        if let Some(slot) = self.working_slot_mut() {
            slot.boost(amount);
        }
        self.reinforcement_count = self.reinforcement_count.saturating_add(1);
        self.record_access();
        self.time.touch_updated();
    }

    /// Reclassify a short-term or working memory as long-term.
    ///
    /// Returns false (and changes nothing) for nodes that are not promotable,
    /// which makes repeated promotion a no-op.
    pub fn promote_to_long_term(&mut self) -> bool {
        let NodeKind::Memory {
            memory_type,
            working,
            ..
        } = &mut self.kind
        else {
            return false;
        };
        if !memory_type.promotable() {
            return false;
        }
        *memory_type = MemoryType::LongTerm;
        *working = None;
        self.tags.retain(|tag| tag != WORKING_TAG);
        self.set_importance(self.importance * PROMOTION_BOOST);
        self.time.touch_updated();
        true
    }

    /// Multiplicative decay of importance and confidence for idle short-term
    /// and working memories, at most once per `interval`. Returns whether
    /// anything changed.
    pub fn apply_decay(&mut self, now: DateTime<Utc>, interval: Duration) -> bool {
        let NodeKind::Memory {
            memory_type,
            decay_rate,
            ..
        } = &self.kind
        else {
            return false;
        };
        if !memory_type.decays()
            || !self.time.idle_longer_than(now, interval)
            || !self.time.decay_due(now, interval)
        {
            return false;
        }
        let rate = *decay_rate;
        self.importance = decayed(self.importance, rate);
        self.confidence = decayed(self.confidence, rate);
        self.time.decayed_at = Some(now);
        self.time.touch_updated();
        true
    }

    /// Whether consolidation should promote this node
    pub fn ready_for_consolidation(&self, threshold: u32) -> bool {
        self.memory_type() == Some(MemoryType::ShortTerm) && self.reinforcement_count >= threshold
    }

    /// Get the searchable text for this node
    pub fn searchable_text(&self) -> String {
        let primary = self.kind.primary_text();
        if primary.is_empty() || primary == self.content {
            format!("{} {}", self.content, self.tags.join(" "))
        } else {
            format!("{} {} {}", primary, self.content, self.tags.join(" "))
        }
    }

    /// Check scores and embedding shape
    pub fn validate(&self, dimension: Option<usize>) -> Result<()> {
        check_unit("importance", self.importance)?;
        check_unit("confidence", self.confidence)?;
        if let Some(embedding) = &self.embedding {
            check_embedding(embedding, dimension)?;
        }
        if let NodeKind::Memory { decay_rate, .. } = &self.kind {
            check_unit("decay_rate", *decay_rate)?;
        }
        Ok(())
    }
}

pub(crate) fn check_unit(field: &str, value: f32) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MemoryError::validation(format!(
            "{field} must be within [0, 1], got {value}"
        )))
    }
}

pub(crate) fn check_embedding(embedding: &[f32], dimension: Option<usize>) -> Result<()> {
    if let Some(dim) = dimension {
        if embedding.len() != dim {
            return Err(MemoryError::validation(format!(
                "embedding has {} dimensions, index expects {dim}",
                embedding.len()
            )));
        }
    }
    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(MemoryError::validation("embedding contains non-finite values"));
    }
    Ok(())
}

/// Partial update applied by `GraphStore::update`
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub kind: Option<NodeKind>,
    pub content: Option<String>,
    pub importance: Option<f32>,
    pub confidence: Option<f32>,
    pub embedding: Option<Vec<f32>>,
    pub tags: Option<Vec<String>>,
    /// Merged into existing metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NodePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Validate and apply to `node`. Nothing is written on error.
    pub fn apply(self, node: &mut Node, dimension: Option<usize>) -> Result<()> {
        if let Some(importance) = self.importance {
            check_unit("importance", importance)?;
        }
        if let Some(confidence) = self.confidence {
            check_unit("confidence", confidence)?;
        }
        if let Some(embedding) = &self.embedding {
            check_embedding(embedding, dimension)?;
        }
        if let Some(kind) = &self.kind {
            if kind.node_type() != node.node_type() {
                return Err(MemoryError::validation(format!(
                    "cannot change node type from {} to {}",
                    node.node_type(),
                    kind.node_type()
                )));
            }
        }

        if let Some(kind) = self.kind {
            node.kind = kind;
        }
        if let Some(content) = self.content {
            node.content = content;
        }
        if let Some(importance) = self.importance {
            node.importance = importance;
        }
        if let Some(confidence) = self.confidence {
            node.confidence = confidence;
        }
        if let Some(embedding) = self.embedding {
            node.embedding = Some(embedding);
        }
        if let Some(tags) = self.tags {
            node.tags = tags;
        }
        node.metadata.extend(self.metadata);
        node.time.touch_updated();
        Ok(())
    }
}

/// Builder for Node with fluent API
#[derive(Debug, Default)]
pub struct NodeBuilder {
    id: Option<NodeId>,
    kind: Option<NodeKind>,
    content: Option<String>,
    importance: f32,
    confidence: f32,
    embedding: Option<Vec<f32>>,
    tags: Vec<String>,
    metadata: HashMap<String, serde_json::Value>,
    time: Option<Timestamps>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            importance: 0.5,
            confidence: 1.0,
            ..Default::default()
        }
    }

    /// Set the node ID (auto-generated if not set)
    pub fn id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the kind directly
    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn concept(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.kind = Some(NodeKind::Concept {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    pub fn fact(mut self, statement: impl Into<String>) -> Self {
        self.kind = Some(NodeKind::Fact {
            statement: statement.into(),
            evidence: vec![],
            verified: false,
        });
        self
    }

    pub fn event(mut self, description: impl Into<String>) -> Self {
        self.kind = Some(NodeKind::Event {
            description: description.into(),
            occurred_at: None,
            participants: vec![],
        });
        self
    }

    pub fn entity(mut self, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.kind = Some(NodeKind::Entity {
            name: name.into(),
            entity_type: entity_type.into(),
            aliases: vec![],
        });
        self
    }

    pub fn document(mut self, title: impl Into<String>) -> Self {
        self.kind = Some(NodeKind::Document {
            title: title.into(),
            source: None,
        });
        self
    }

    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.kind = Some(NodeKind::Question {
            question: question.into(),
            answer: None,
        });
        self
    }

    pub fn insight(
        mut self,
        summary: impl Into<String>,
        pattern: impl Into<String>,
        sources: Vec<NodeId>,
    ) -> Self {
        self.kind = Some(NodeKind::Insight {
            summary: summary.into(),
            pattern: pattern.into(),
            sources,
        });
        self
    }

    /// Memory node with the default decay rate
    pub fn memory(mut self, memory_type: MemoryType) -> Self {
        self.kind = Some(NodeKind::Memory {
            memory_type,
            decay_rate: DEFAULT_DECAY_RATE,
            working: None,
        });
        self
    }

    /// Working-memory item in `session_id`; priority doubles as initial importance
    pub fn working(mut self, session_id: impl Into<String>, priority: f32) -> Self {
        let slot = WorkingSlot::new(session_id, priority);
        self.importance = slot.priority;
        self.kind = Some(NodeKind::Memory {
            memory_type: MemoryType::Working,
            decay_rate: DEFAULT_DECAY_RATE,
            working: Some(slot),
        });
        if !self.tags.iter().any(|t| t == WORKING_TAG) {
            self.tags.push(WORKING_TAG.to_string());
        }
        self
    }

    /// Override the decay rate of a memory kind
    pub fn decay_rate(mut self, rate: f32) -> Self {
        if let Some(NodeKind::Memory { decay_rate, .. }) = &mut self.kind {
            *decay_rate = rate.clamp(0.0, 1.0);
        }
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set importance score (clamped)
    pub fn importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Set confidence score (clamped)
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn metadata_map(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Override timestamps (imports and tests)
    pub fn timestamps(mut self, time: Timestamps) -> Self {
        self.time = Some(time);
        self
    }

    /// Build the Node
    pub fn build(self) -> std::result::Result<Node, NodeBuilderError> {
        let kind = self.kind.ok_or(NodeBuilderError::MissingKind)?;
        let content = match self.content {
            Some(content) => content,
            None => kind.primary_text().to_string(),
        };
        if content.trim().is_empty() {
            return Err(NodeBuilderError::MissingContent);
        }

        Ok(Node {
            id: self.id.unwrap_or_default(),
            kind,
            content,
            time: self.time.unwrap_or_default(),
            access_count: 0,
            reinforcement_count: 0,
            importance: self.importance,
            confidence: self.confidence,
            embedding: self.embedding,
            tags: self.tags,
            metadata: self.metadata,
        })
    }
}

/// Errors that can occur when building a Node
#[derive(Debug, thiserror::Error)]
pub enum NodeBuilderError {
    #[error("Missing required field: kind")]
    MissingKind,
    #[error("Missing required field: content")]
    MissingContent,
}

impl From<NodeBuilderError> for MemoryError {
    fn from(err: NodeBuilderError) -> Self {
        MemoryError::validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse() {
        let id = NodeId::new();
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_node_type_roundtrip_str() {
        for t in NodeType::ALL {
            assert_eq!(t.as_str().parse::<NodeType>().unwrap(), t);
        }
        assert!("widget".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_builder_fact_uses_statement_as_content() {
        let node = Node::builder()
            .fact("Water boils at 100C at sea level")
            .confidence(0.9)
            .tag("physics")
            .build()
            .unwrap();

        assert_eq!(node.node_type(), NodeType::Fact);
        assert_eq!(node.content, "Water boils at 100C at sea level");
        assert_eq!(node.confidence, 0.9);
        assert_eq!(node.tags, vec!["physics".to_string()]);
    }

    #[test]
    fn test_builder_clamps_scores() {
        let node = Node::builder()
            .concept("Entropy", "")
            .importance(3.0)
            .confidence(-1.0)
            .build()
            .unwrap();
        assert_eq!(node.importance, 1.0);
        assert_eq!(node.confidence, 0.0);
    }

    #[test]
    fn test_builder_missing_kind() {
        let result = Node::builder().content("orphan").build();
        assert!(matches!(result, Err(NodeBuilderError::MissingKind)));
    }

    #[test]
    fn test_builder_memory_requires_content() {
        let result = Node::builder().memory(MemoryType::ShortTerm).build();
        assert!(matches!(result, Err(NodeBuilderError::MissingContent)));
    }

    #[test]
    fn test_working_builder() {
        let node = Node::builder()
            .working("s1", 0.7)
            .content("draft plan")
            .build()
            .unwrap();
        assert_eq!(node.memory_type(), Some(MemoryType::Working));
        assert_eq!(node.session_id(), Some("s1"));
        assert_eq!(node.importance, 0.7);
        assert_eq!(node.priority(), 0.7);
        assert!(node.tags.contains(&WORKING_TAG.to_string()));
    }

    #[test]
    fn test_reinforce_caps_and_counts() {
        let mut node = Node::builder()
            .working("s1", 0.9)
            .content("x")
            .build()
            .unwrap();
        node.reinforce(0.5);
        assert_eq!(node.importance, 1.0);
        assert_eq!(node.priority(), 1.0);
        assert_eq!(node.reinforcement_count, 1);
        assert_eq!(node.access_count, 1);
    }

    #[test]
    fn test_promote_is_idempotent() {
        let mut node = Node::builder()
            .working("s1", 0.6)
            .content("x")
            .build()
            .unwrap();
        assert!(node.promote_to_long_term());
        assert_eq!(node.memory_type(), Some(MemoryType::LongTerm));
        assert!((node.importance - 0.9).abs() < 1e-6);
        assert!(node.working_slot().is_none());
        assert!(!node.tags.contains(&WORKING_TAG.to_string()));

        assert!(!node.promote_to_long_term());
        assert!((node.importance - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_promote_ignores_non_memory() {
        let mut node = Node::builder().fact("f").build().unwrap();
        assert!(!node.promote_to_long_term());
    }

    #[test]
    fn test_decay_skips_long_term_and_recent() {
        let old = Timestamps::at(Utc::now() - Duration::hours(2));
        let mut long_term = Node::builder()
            .memory(MemoryType::LongTerm)
            .content("kept")
            .timestamps(old)
            .build()
            .unwrap();
        assert!(!long_term.apply_decay(Utc::now(), Duration::hours(1)));

        let mut fresh = Node::builder()
            .memory(MemoryType::ShortTerm)
            .content("fresh")
            .build()
            .unwrap();
        assert!(!fresh.apply_decay(Utc::now(), Duration::hours(1)));

        let mut stale = Node::builder()
            .memory(MemoryType::ShortTerm)
            .decay_rate(0.5)
            .content("stale")
            .importance(0.8)
            .confidence(0.6)
            .timestamps(old)
            .build()
            .unwrap();
        assert!(stale.apply_decay(Utc::now(), Duration::hours(1)));
        assert!((stale.importance - 0.4).abs() < 1e-6);
        assert!((stale.confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_decay_applies_once_per_interval() {
        let start = Utc::now();
        let mut node = Node::builder()
            .memory(MemoryType::ShortTerm)
            .decay_rate(0.5)
            .content("idle note")
            .importance(0.8)
            .timestamps(Timestamps::at(start))
            .build()
            .unwrap();
        let interval = Duration::hours(1);

        assert!(node.apply_decay(start + Duration::hours(2), interval));
        assert!((node.importance - 0.4).abs() < 1e-6);

        // maintenance ticks more often than the decay interval
        for minutes in [5, 20, 55] {
            assert!(!node.apply_decay(start + Duration::hours(2) + Duration::minutes(minutes), interval));
        }
        assert!((node.importance - 0.4).abs() < 1e-6);

        assert!(node.apply_decay(start + Duration::hours(3) + Duration::minutes(1), interval));
        assert!((node.importance - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_patch_rejects_out_of_range() {
        let mut node = Node::builder().fact("f").importance(0.4).build().unwrap();
        let err = NodePatch::new().importance(1.5).apply(&mut node, None);
        assert!(matches!(err, Err(MemoryError::Validation(_))));
        assert_eq!(node.importance, 0.4);
    }

    #[test]
    fn test_patch_rejects_wrong_dimension() {
        let mut node = Node::builder().fact("f").build().unwrap();
        let err = NodePatch::new()
            .embedding(vec![0.1; 3])
            .apply(&mut node, Some(4));
        assert!(matches!(err, Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_patch_rejects_type_change() {
        let mut node = Node::builder().fact("f").build().unwrap();
        let kind = NodeKind::from_content(NodeType::Event, "e");
        assert!(NodePatch::new().kind(kind).apply(&mut node, None).is_err());
    }

    #[test]
    fn test_patch_merges_metadata() {
        let mut node = Node::builder()
            .fact("f")
            .metadata("a", serde_json::json!(1))
            .build()
            .unwrap();
        NodePatch::new()
            .metadata("b", serde_json::json!(2))
            .apply(&mut node, None)
            .unwrap();
        assert_eq!(node.metadata.len(), 2);
    }

    #[test]
    fn test_node_serialization() {
        let node = Node::builder()
            .insight("pattern found", "chain", vec![NodeId::new()])
            .embedding(vec![0.5, 0.5])
            .build()
            .unwrap();
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"]["node_type"], "insight");

        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, node.id);
        assert_eq!(back.kind, node.kind);
    }

    #[test]
    fn test_embedding_optional_in_json() {
        let node = Node::builder().fact("no vector").build().unwrap();
        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("embedding").is_none());
    }
}
