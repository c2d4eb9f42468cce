//! HNSW graph over a snapshot of the index's vectors
//!
//! instant-distance graphs are build-once: new vectors wait in the index's
//! pending set and removed ones are tombstoned until the next rebuild.

use std::collections::HashSet;

use instant_distance::{Builder, HnswMap, Point, Search};

use crate::config::Metric;

/// HNSW point wrapper carrying its metric
#[derive(Clone)]
pub(crate) struct IndexPoint {
    vector: Vec<f32>,
    metric: Metric,
}

impl Point for IndexPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.metric.distance(&self.vector, &other.vector)
    }
}

pub(crate) struct HnswGraph {
    map: HnswMap<IndexPoint, String>,
    ids: HashSet<String>,
}

impl HnswGraph {
    pub(crate) fn build<'a>(
        items: impl Iterator<Item = (&'a String, &'a [f32])>,
        metric: Metric,
        ef_construction: usize,
    ) -> Self {
        let mut points = Vec::new();
        let mut values = Vec::new();
        for (id, vector) in items {
            points.push(IndexPoint {
                vector: vector.to_vec(),
                metric,
            });
            values.push(id.clone());
        }
        let ids = values.iter().cloned().collect();
        let map = Builder::default()
            .ef_construction(ef_construction)
            .build(points, values);
        Self { map, ids }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    /// Nearest ids in ascending distance order, skipping `excluded`
    pub(crate) fn nearest(
        &self,
        query: &[f32],
        metric: Metric,
        limit: usize,
        excluded: &HashSet<String>,
    ) -> Vec<String> {
        let query_point = IndexPoint {
            vector: query.to_vec(),
            metric,
        };
        let mut search = Search::default();
        self.map
            .search(&query_point, &mut search)
            .map(|item| item.value)
            .filter(|id| !excluded.contains(*id))
            .take(limit)
            .cloned()
            .collect()
    }
}
