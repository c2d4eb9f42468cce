//! Contradiction detection and advisory resolution
//!
//! Detection is deliberately shallow: two similar facts contradict when
//! removing a negation from one yields the other.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::{MemoryEngine, MemoryEvent};
use crate::edge::{Edge, EdgeId, EdgeType};
use crate::error::{MemoryError, Result};
use crate::graph::{QueryPattern, Row};
use crate::node::{Node, NodeId, NodeType};

/// Negated form and its affirmative replacement, tried in order
const NEGATIONS: &[(&str, &str)] = &[
    (r"\bis not\b", "is"),
    (r"\bisn't\b", "is"),
    (r"\bare not\b", "are"),
    (r"\baren't\b", "are"),
    (r"\bwas not\b", "was"),
    (r"\bwasn't\b", "was"),
    (r"\bwere not\b", "were"),
    (r"\bweren't\b", "were"),
    (r"\bcannot\b", "can"),
    (r"\bcan not\b", "can"),
    (r"\bcan't\b", "can"),
    (r"\bdoes not\b", "does"),
    (r"\bdoesn't\b", "does"),
    (r"\bdo not\b", "do"),
    (r"\bdon't\b", "do"),
    (r"\bdid not\b", "did"),
    (r"\bdidn't\b", "did"),
    (r"\bwill not\b", "will"),
    (r"\bwon't\b", "will"),
    (r"\bshould not\b", "should"),
    (r"\bshouldn't\b", "should"),
    (r"\bhas not\b", "has"),
    (r"\bhasn't\b", "has"),
    (r"\bhave not\b", "have"),
    (r"\bhaven't\b", "have"),
    (r"\bnever\b", ""),
    (r"\bnot\b", ""),
];

static NEGATION_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    NEGATIONS
        .iter()
        .map(|(pattern, affirmative)| (Regex::new(pattern).unwrap(), *affirmative))
        .collect()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace('\u{2019}', "'");
    let collapsed = WHITESPACE.replace_all(lowered.trim(), " ");
    collapsed
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ';'))
        .trim()
        .to_string()
}

/// Remove the first negation, if any
fn affirm(normalized: &str) -> Option<String> {
    NEGATION_RULES.iter().find_map(|(re, affirmative)| {
        re.is_match(normalized)
            .then(|| normalize(&re.replacen(normalized, 1, *affirmative)))
    })
}

/// True if one statement is the negation of the other
pub fn is_negation_pair(a: &str, b: &str) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    if a == b {
        return false;
    }
    affirm(&a).is_some_and(|x| x == b) || affirm(&b).is_some_and(|x| x == a)
}

/// Why one side of a contradiction is preferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    HigherConfidence,
    MoreRecent,
}

/// Advisory outcome for one `contradicts` edge. Nothing is modified.
#[derive(Debug, Clone, Serialize)]
pub struct ContradictionResolution {
    pub edge: EdgeId,
    pub preferred: NodeId,
    pub rejected: NodeId,
    pub reason: ResolutionReason,
    pub note: String,
}

fn resolve(edge: &Edge, a: &Node, b: &Node) -> ContradictionResolution {
    let (preferred, rejected, reason) = if (a.confidence - b.confidence).abs() > f32::EPSILON {
        if a.confidence > b.confidence {
            (a, b, ResolutionReason::HigherConfidence)
        } else {
            (b, a, ResolutionReason::HigherConfidence)
        }
    } else if b.time.updated_at > a.time.updated_at {
        (b, a, ResolutionReason::MoreRecent)
    } else {
        (a, b, ResolutionReason::MoreRecent)
    };
    let note = match reason {
        ResolutionReason::HigherConfidence => format!(
            "prefer \"{}\" (confidence {:.2}) over \"{}\" (confidence {:.2})",
            preferred.content, preferred.confidence, rejected.content, rejected.confidence
        ),
        ResolutionReason::MoreRecent => format!(
            "equal confidence; prefer the more recently updated \"{}\" over \"{}\"",
            preferred.content, rejected.content
        ),
    };
    ContradictionResolution {
        edge: edge.id,
        preferred: preferred.id,
        rejected: rejected.id,
        reason,
        note,
    }
}

impl MemoryEngine {
    /// Link `fact` to similar facts that negate it. Returns the new
    /// `contradicts` edges; pairs already linked are skipped.
    pub async fn detect_contradictions(&self, fact: NodeId) -> Result<Vec<Edge>> {
        let node = self
            .graph
            .peek(fact)
            .await?
            .ok_or_else(|| MemoryError::not_found(fact.to_string()))?;
        if node.node_type() != NodeType::Fact {
            return Ok(vec![]);
        }
        let embedding = match &node.embedding {
            Some(embedding) => embedding.clone(),
            None => self.embedder.embed(&node.content).await?,
        };

        let hits = self
            .vectors
            .search(
                &embedding,
                self.config.contradiction_candidates + 1,
                self.config.contradiction_similarity,
            )
            .await?;

        let mut created = Vec::new();
        for hit in hits {
            let other_id = hit.payload;
            if other_id == node.id {
                continue;
            }
            let Some(other) = self.graph.peek(other_id).await? else {
                continue;
            };
            if other.node_type() != NodeType::Fact || !is_negation_pair(&node.content, &other.content)
            {
                continue;
            }
            if self
                .graph
                .has_edge_between(node.id, other.id, EdgeType::Contradicts)
                .await?
            {
                continue;
            }

            let metadata = HashMap::from([
                ("similarity".to_string(), serde_json::json!(hit.similarity)),
                ("detected_by".to_string(), serde_json::json!("negation")),
            ]);
            let edge = self
                .graph
                .insert_edge(
                    Edge::new(node.id, other.id, EdgeType::Contradicts)
                        .with_weight(hit.similarity)
                        .with_metadata(metadata),
                )
                .await?;
            tracing::info!(
                fact = %node.id,
                conflicting = %other.id,
                similarity = hit.similarity,
                "contradiction detected"
            );
            self.emit(MemoryEvent::ContradictionDetected {
                edge: edge.id,
                fact: node.id,
                conflicting: other.id,
                similarity: hit.similarity,
            });
            created.push(edge);
        }
        Ok(created)
    }

    /// Advisory notes for every `contradicts` edge: the higher-confidence
    /// side wins, then the more recently updated one.
    pub async fn resolve_contradictions(&self) -> Result<Vec<ContradictionResolution>> {
        let edges = self
            .graph
            .scan(&QueryPattern::EdgesByType {
                edge_type: EdgeType::Contradicts,
            })
            .await?;

        let mut resolutions = Vec::new();
        for edge in edges.into_iter().filter_map(Row::into_edge) {
            let (Some(a), Some(b)) = (
                self.graph.peek(edge.source).await?,
                self.graph.peek(edge.target).await?,
            ) else {
                continue;
            };
            resolutions.push(resolve(&edge, &a, &b));
        }
        Ok(resolutions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::engine;
    use crate::engine::StoreOptions;

    #[test]
    fn test_every_negation_rule_compiles() {
        assert_eq!(NEGATION_RULES.len(), NEGATIONS.len());
        assert_eq!(normalize("  Cats\t are   NOT dogs. "), "cats are not dogs");
    }

    #[test]
    fn test_negation_pairs() {
        assert!(is_negation_pair("X is valid", "X is not valid"));
        assert!(is_negation_pair("The API isn't stable.", "the api is stable"));
        assert!(is_negation_pair("Bob can swim", "Bob cannot swim"));
        assert!(is_negation_pair("It won't rain", "it will rain"));
        assert!(is_negation_pair("the cache never expires", "The cache expires"));
    }

    #[test]
    fn test_non_negation_pairs() {
        assert!(!is_negation_pair("X is valid", "X is valid"));
        assert!(!is_negation_pair("X is valid", "Y is not valid"));
        assert!(!is_negation_pair("X is valid", "Y is unrelated"));
        assert!(!is_negation_pair("X is not valid", "X is not valid!"));
    }

    #[tokio::test]
    async fn test_detects_negated_fact() {
        let engine = engine().await;
        let fact = StoreOptions::new().with_node_type(NodeType::Fact);
        let valid = engine
            .store("X is valid", fact.clone().with_confidence(0.9))
            .await
            .unwrap();
        let invalid = engine
            .store("X is not valid", fact.clone().with_confidence(0.6))
            .await
            .unwrap();

        assert!(engine
            .graph()
            .has_edge_between(valid.id, invalid.id, EdgeType::Contradicts)
            .await
            .unwrap());

        // re-running never duplicates the edge
        assert!(engine.detect_contradictions(invalid.id).await.unwrap().is_empty());
        assert!(engine.detect_contradictions(valid.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_prefers_confidence() {
        let engine = engine().await;
        let fact = StoreOptions::new().with_node_type(NodeType::Fact);
        let valid = engine
            .store("X is valid", fact.clone().with_confidence(0.9))
            .await
            .unwrap();
        let invalid = engine
            .store("X is not valid", fact.with_confidence(0.6))
            .await
            .unwrap();

        let resolutions = engine.resolve_contradictions().await.unwrap();
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].preferred, valid.id);
        assert_eq!(resolutions[0].rejected, invalid.id);
        assert_eq!(resolutions[0].reason, ResolutionReason::HigherConfidence);
    }

    #[test]
    fn test_resolution_falls_back_to_recency() {
        let older = Node::builder().fact("a is b").build().unwrap();
        let mut newer = Node::builder().fact("a is not b").build().unwrap();
        newer.time.updated_at = older.time.updated_at + chrono::Duration::seconds(5);
        let edge = Edge::new(older.id, newer.id, EdgeType::Contradicts);

        let resolution = resolve(&edge, &older, &newer);
        assert_eq!(resolution.preferred, newer.id);
        assert_eq!(resolution.reason, ResolutionReason::MoreRecent);
    }
}
