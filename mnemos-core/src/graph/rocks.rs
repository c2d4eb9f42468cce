//! RocksDB persistent backend
//!
//! Write-through storage with LZ4 compression. All records are loaded into
//! the in-memory tables on open and queries are answered from there.
//!
//! Key layout:
//! - `node:{id}` node record as JSON, embedding stripped
//! - `edge:{id}` edge record as JSON
//! - `vec:{id}` node embedding as bincode `Vec<f32>`
//! - `_schema_version` little-endian u32

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{IteratorMode, Options, WriteBatch, DB};

use super::backend::{GraphBackend, QueryPattern, Row};
use super::memory::MemoryBackend;
use crate::edge::{Edge, EdgeId};
use crate::error::{MemoryError, Result};
use crate::node::{Node, NodeId};

const SCHEMA_VERSION_KEY: &[u8] = b"_schema_version";
const CURRENT_SCHEMA_VERSION: u32 = 1;

const NODE_PREFIX: &str = "node:";
const EDGE_PREFIX: &str = "edge:";
const VEC_PREFIX: &str = "vec:";

/// Node write locks, striped by id
const LOCK_STRIPES: usize = 64;

/// RocksDB-backed graph store
pub struct RocksBackend {
    db: Arc<DB>,
    tables: MemoryBackend,
    /// Serializes writes of the same node across the db and the tables
    locks: Vec<Mutex<()>>,
    path: PathBuf,
}

impl RocksBackend {
    /// Open (or create) a store at `path` and load its records
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(2);
        opts.set_bytes_per_sync(1048576); // 1MB
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        check_schema_version(&db)?;

        tracing::info!(path = %path.display(), "graph store opened");

        let backend = Self {
            db: Arc::new(db),
            tables: MemoryBackend::new(),
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            path: path.to_path_buf(),
        };
        backend.load()?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn load(&self) -> Result<()> {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut vectors: HashMap<String, Vec<f32>> = HashMap::new();
        let mut skipped = 0usize;

        for item in self.db.iterator(IteratorMode::Start) {
            let (key, value) = item?;
            let key_str = String::from_utf8_lossy(&key);

            if let Some(id) = key_str.strip_prefix(NODE_PREFIX) {
                match serde_json::from_slice::<Node>(&value) {
                    Ok(node) => nodes.push(node),
                    Err(e) => {
                        tracing::warn!(id, error = %e, "skipping unreadable node record");
                        skipped += 1;
                    }
                }
            } else if let Some(id) = key_str.strip_prefix(EDGE_PREFIX) {
                match serde_json::from_slice::<Edge>(&value) {
                    Ok(edge) => edges.push(edge),
                    Err(e) => {
                        tracing::warn!(id, error = %e, "skipping unreadable edge record");
                        skipped += 1;
                    }
                }
            } else if let Some(id) = key_str.strip_prefix(VEC_PREFIX) {
                match bincode::deserialize::<Vec<f32>>(&value) {
                    Ok(vector) => {
                        vectors.insert(id.to_string(), vector);
                    }
                    Err(e) => {
                        tracing::warn!(id, error = %e, "skipping unreadable embedding");
                        skipped += 1;
                    }
                }
            }
        }

        let node_count = nodes.len();
        for mut node in nodes {
            node.embedding = vectors.remove(&node.id.to_string());
            self.tables.upsert_node(&node);
        }

        let mut edge_count = 0usize;
        for edge in edges {
            if self.tables.node(edge.source).is_none() || self.tables.node(edge.target).is_none() {
                tracing::warn!(edge = %edge.id, "skipping edge with missing endpoint");
                skipped += 1;
                continue;
            }
            self.tables.upsert_edge(&edge);
            edge_count += 1;
        }

        tracing::info!(
            nodes = node_count,
            edges = edge_count,
            skipped,
            "loaded graph from disk"
        );
        Ok(())
    }

    fn stripe(&self, id: NodeId) -> &Mutex<()> {
        &self.locks[(id.0.as_u128() % LOCK_STRIPES as u128) as usize]
    }

    fn update_locked(
        &self,
        id: NodeId,
        f: &mut (dyn FnMut(&mut Node) -> bool + Send),
    ) -> Result<Option<Node>> {
        let _guard = self.stripe(id).lock();
        let Some(mut node) = self.tables.node(id) else {
            return Ok(None);
        };
        if f(&mut node) {
            self.write_node(&node)?;
            self.tables.upsert_node(&node);
        }
        Ok(Some(node))
    }

    fn delete_locked(&self, id: NodeId) -> Result<Option<Vec<EdgeId>>> {
        let _guard = self.stripe(id).lock();
        if self.tables.node(id).is_none() {
            return Ok(None);
        }
        let incident: Vec<EdgeId> = self.tables.incident_edges(id).iter().map(|e| e.id).collect();

        let mut batch = WriteBatch::default();
        batch.delete(node_key(id));
        batch.delete(vec_key(id));
        for edge_id in &incident {
            batch.delete(edge_key(*edge_id));
        }
        self.db.write(batch)?;

        Ok(self.tables.remove_node(id))
    }

    fn write_node(&self, node: &Node) -> Result<()> {
        let mut record = node.clone();
        let embedding = record.embedding.take();

        let mut batch = WriteBatch::default();
        batch.put(node_key(node.id), serde_json::to_vec(&record)?);
        match embedding {
            Some(vector) => batch.put(vec_key(node.id), bincode::serialize(&vector)?),
            None => batch.delete(vec_key(node.id)),
        }
        self.db.write(batch)?;
        Ok(())
    }
}

fn node_key(id: NodeId) -> String {
    format!("{NODE_PREFIX}{id}")
}

fn edge_key(id: EdgeId) -> String {
    format!("{EDGE_PREFIX}{id}")
}

fn vec_key(id: NodeId) -> String {
    format!("{VEC_PREFIX}{id}")
}

/// Stamp a fresh database, refuse one written by a newer schema
fn check_schema_version(db: &DB) -> Result<()> {
    let stored = match db.get(SCHEMA_VERSION_KEY)? {
        Some(bytes) => {
            let bytes_slice: &[u8] = bytes.as_ref();
            let version_bytes: [u8; 4] = bytes_slice
                .try_into()
                .map_err(|_| MemoryError::backing_store("invalid schema version format"))?;
            Some(u32::from_le_bytes(version_bytes))
        }
        None => None,
    };

    match stored {
        None => {
            db.put(SCHEMA_VERSION_KEY, CURRENT_SCHEMA_VERSION.to_le_bytes())?;
            tracing::debug!(version = CURRENT_SCHEMA_VERSION, "schema version stamped");
        }
        Some(version) if version > CURRENT_SCHEMA_VERSION => {
            return Err(MemoryError::backing_store(format!(
                "store schema v{version} is newer than supported v{CURRENT_SCHEMA_VERSION}"
            )));
        }
        Some(version) => {
            tracing::debug!(version, "schema version ok");
        }
    }
    Ok(())
}

#[async_trait]
impl GraphBackend for RocksBackend {
    async fn ensure_indexes(&self, statements: &[&str]) -> Result<()> {
        for statement in statements {
            tracing::trace!(backend = "rocksdb", statement, "served by in-memory tables");
        }
        tracing::debug!(backend = "rocksdb", indexes = statements.len(), "indexes ready");
        Ok(())
    }

    async fn put_node(&self, node: &Node) -> Result<()> {
        let _guard = self.stripe(node.id).lock();
        self.write_node(node)?;
        self.tables.upsert_node(node);
        Ok(())
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.tables.node(id))
    }

    async fn update_node(
        &self,
        id: NodeId,
        f: &mut (dyn for<'n> FnMut(&'n mut Node) -> bool + Send),
    ) -> Result<Option<Node>> {
        self.update_locked(id, f)
    }

    async fn delete_node(&self, id: NodeId) -> Result<Option<Vec<EdgeId>>> {
        self.delete_locked(id)
    }

    async fn put_edge(&self, edge: &Edge) -> Result<()> {
        self.db.put(edge_key(edge.id), serde_json::to_vec(edge)?)?;
        self.tables.upsert_edge(edge);
        Ok(())
    }

    async fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>> {
        Ok(self.tables.edge(id))
    }

    async fn delete_edge(&self, id: EdgeId) -> Result<bool> {
        if self.tables.edge(id).is_none() {
            return Ok(false);
        }
        self.db.delete(edge_key(id))?;
        Ok(self.tables.remove_edge(id))
    }

    async fn edges_of(&self, id: NodeId) -> Result<Vec<Edge>> {
        Ok(self.tables.incident_edges(id))
    }

    async fn run(&self, pattern: &QueryPattern) -> Result<Vec<Row>> {
        Ok(self.tables.evaluate(pattern))
    }

    fn name(&self) -> &'static str {
        "rocksdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeType;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reopen_restores_nodes_edges_and_vectors() {
        let temp_dir = TempDir::new().unwrap();
        let a = Node::builder()
            .fact("persisted fact")
            .embedding(vec![0.1, 0.2, 0.3])
            .build()
            .unwrap();
        let b = Node::builder().event("persisted event").build().unwrap();
        let edge = Edge::new(a.id, b.id, EdgeType::Supports);

        {
            let backend = RocksBackend::open(temp_dir.path()).unwrap();
            backend.put_node(&a).await.unwrap();
            backend.put_node(&b).await.unwrap();
            backend.put_edge(&edge).await.unwrap();
            backend.flush().unwrap();
        }

        let backend = RocksBackend::open(temp_dir.path()).unwrap();
        let loaded = backend.get_node(a.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "persisted fact");
        assert_eq!(loaded.embedding, Some(vec![0.1, 0.2, 0.3]));
        assert!(backend.get_node(b.id).await.unwrap().unwrap().embedding.is_none());
        assert_eq!(backend.edges_of(a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_node_removes_records() {
        let temp_dir = TempDir::new().unwrap();
        let a = Node::builder().fact("a").embedding(vec![1.0]).build().unwrap();
        let b = Node::builder().fact("b").build().unwrap();

        {
            let backend = RocksBackend::open(temp_dir.path()).unwrap();
            backend.put_node(&a).await.unwrap();
            backend.put_node(&b).await.unwrap();
            backend
                .put_edge(&Edge::new(a.id, b.id, EdgeType::RelatesTo))
                .await
                .unwrap();
            let removed = backend.delete_node(a.id).await.unwrap().unwrap();
            assert_eq!(removed.len(), 1);
            assert!(backend.delete_node(a.id).await.unwrap().is_none());
        }

        let backend = RocksBackend::open(temp_dir.path()).unwrap();
        assert!(backend.get_node(a.id).await.unwrap().is_none());
        assert!(backend.edges_of(b.id).await.unwrap().is_empty());
        assert!(backend.db.get(vec_key(a.id)).unwrap().is_none());
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut opts = Options::default();
            opts.create_if_missing(true);
            let db = DB::open(&opts, temp_dir.path()).unwrap();
            db.put(SCHEMA_VERSION_KEY, (CURRENT_SCHEMA_VERSION + 1).to_le_bytes())
                .unwrap();
        }

        let result = RocksBackend::open(temp_dir.path());
        assert!(matches!(result, Err(MemoryError::BackingStore(_))));
    }

    #[test]
    fn test_fresh_store_is_stamped() {
        let temp_dir = TempDir::new().unwrap();
        let backend = RocksBackend::open(temp_dir.path()).unwrap();
        let bytes = backend.db.get(SCHEMA_VERSION_KEY).unwrap().unwrap();
        let version = u32::from_le_bytes(bytes.as_slice().try_into().unwrap());
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        {
            let backend = RocksBackend::open(temp_dir.path()).unwrap();
            backend.db.put(b"node:garbage", b"not json").unwrap();
        }
        let backend = RocksBackend::open(temp_dir.path()).unwrap();
        assert_eq!(backend.tables.node_count(), 0);
    }
}
