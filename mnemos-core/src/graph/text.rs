//! BM25 keyword scoring for the graph's text-match query

use std::collections::HashMap;

use crate::node::{Node, NodeId};

/// BM25 index over node text, built per query from the scanned nodes
pub struct KeywordIndex {
    /// Inverted index: term -> [(node_id, term frequency)]
    inverted: HashMap<String, Vec<(NodeId, f32)>>,
    doc_lengths: HashMap<NodeId, f32>,
    avg_doc_length: f32,
    num_docs: usize,
    k1: f32,
    b: f32,
}

impl KeywordIndex {
    /// Build BM25 index from nodes
    pub fn build<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        let mut inverted: HashMap<String, Vec<(NodeId, f32)>> = HashMap::new();
        let mut doc_lengths: HashMap<NodeId, f32> = HashMap::new();
        let mut total_length = 0.0;

        for node in nodes {
            let tokens = tokenize(&node.searchable_text());
            let doc_length = tokens.len() as f32;

            doc_lengths.insert(node.id, doc_length);
            total_length += doc_length;

            let mut term_freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *term_freqs.entry(token).or_insert(0) += 1;
            }

            for (term, freq) in term_freqs {
                inverted.entry(term).or_default().push((node.id, freq as f32));
            }
        }

        let num_docs = doc_lengths.len();
        let avg_doc_length = if num_docs > 0 {
            total_length / num_docs as f32
        } else {
            0.0
        };

        Self {
            inverted,
            doc_lengths,
            avg_doc_length,
            num_docs,
            k1: 1.2,
            b: 0.75,
        }
    }

    /// Search with BM25 scoring, best first
    pub fn search(&self, query: &str, limit: usize) -> Vec<(NodeId, f32)> {
        let mut scores: HashMap<NodeId, f32> = HashMap::new();

        for token in tokenize(query) {
            if let Some(postings) = self.inverted.get(&token) {
                let idf = self.idf(postings.len());

                for (doc_id, tf) in postings {
                    let doc_length = self.doc_lengths.get(doc_id).copied().unwrap_or(1.0);
                    *scores.entry(*doc_id).or_insert(0.0) += self.bm25_score(*tf, doc_length, idf);
                }
            }
        }

        let mut results: Vec<_> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        results
    }

    fn idf(&self, doc_freq: usize) -> f32 {
        let n = self.num_docs as f32;
        let df = doc_freq as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn bm25_score(&self, tf: f32, doc_length: f32, idf: f32) -> f32 {
        let avg = if self.avg_doc_length > 0.0 {
            self.avg_doc_length
        } else {
            1.0
        };
        let numerator = tf * (self.k1 + 1.0);
        let denominator = tf + self.k1 * (1.0 - self.b + self.b * doc_length / avg);
        idf * numerator / denominator
    }
}

/// Lowercase alphanumeric terms longer than two characters
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 2)
        .map(String::from)
        .collect()
}
