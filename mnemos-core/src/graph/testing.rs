//! Fault-injecting backend for tests

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::{GraphBackend, QueryPattern, Row};
use super::memory::MemoryBackend;
use crate::edge::{Edge, EdgeId};
use crate::error::{MemoryError, Result};
use crate::node::{Node, NodeId};

/// Arena backend whose point reads fail for selected nodes
#[derive(Default)]
pub(crate) struct FaultyBackend {
    inner: MemoryBackend,
    failing: Mutex<HashSet<NodeId>>,
    index_statements: Mutex<Vec<String>>,
}

impl FaultyBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `get_node` and `edges_of` fail for `id` from now on
    pub(crate) fn fail_reads_of(&self, id: NodeId) {
        self.failing.lock().insert(id);
    }

    pub(crate) fn index_statements(&self) -> Vec<String> {
        self.index_statements.lock().clone()
    }

    fn check(&self, id: NodeId) -> Result<()> {
        if self.failing.lock().contains(&id) {
            return Err(MemoryError::backing_store(format!("read of {id} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphBackend for FaultyBackend {
    async fn ensure_indexes(&self, statements: &[&str]) -> Result<()> {
        self.index_statements
            .lock()
            .extend(statements.iter().map(|s| s.to_string()));
        self.inner.ensure_indexes(statements).await
    }

    async fn put_node(&self, node: &Node) -> Result<()> {
        self.inner.put_node(node).await
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        self.check(id)?;
        self.inner.get_node(id).await
    }

    async fn update_node(
        &self,
        id: NodeId,
        f: &mut (dyn for<'n> FnMut(&'n mut Node) -> bool + Send),
    ) -> Result<Option<Node>> {
        self.inner.update_node(id, f).await
    }

    async fn delete_node(&self, id: NodeId) -> Result<Option<Vec<EdgeId>>> {
        self.inner.delete_node(id).await
    }

    async fn put_edge(&self, edge: &Edge) -> Result<()> {
        self.inner.put_edge(edge).await
    }

    async fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>> {
        self.inner.get_edge(id).await
    }

    async fn delete_edge(&self, id: EdgeId) -> Result<bool> {
        self.inner.delete_edge(id).await
    }

    async fn edges_of(&self, id: NodeId) -> Result<Vec<Edge>> {
        self.check(id)?;
        self.inner.edges_of(id).await
    }

    async fn run(&self, pattern: &QueryPattern) -> Result<Vec<Row>> {
        self.inner.run(pattern).await
    }

    fn name(&self) -> &'static str {
        "faulty"
    }
}
