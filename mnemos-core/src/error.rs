//! Error types for mnemos-core

use thiserror::Error;

/// Errors that can occur in the memory engine
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Node or edge missing by id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Schema or shape violation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Edge endpoint does not reference an existing node
    #[error("Referential integrity error: edge {source_id} -> {target_id} references a missing node")]
    ReferentialIntegrity {
        source_id: String,
        target_id: String,
    },

    /// Vector index degraded
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// Embedding provider failure
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Underlying graph database failure
    #[error("Backing store error: {0}")]
    BackingStore(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serialization error (bincode)
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// MessagePack encoding error
    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error
    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// UUID parsing error
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation observed its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<rocksdb::Error> for MemoryError {
    fn from(err: rocksdb::Error) -> Self {
        Self::BackingStore(err.to_string())
    }
}

impl MemoryError {
    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a referential integrity error for an edge
    pub fn dangling_edge(source: impl ToString, target: impl ToString) -> Self {
        Self::ReferentialIntegrity {
            source_id: source.to_string(),
            target_id: target.to_string(),
        }
    }

    /// Create an index unavailable error
    pub fn index_unavailable(msg: impl Into<String>) -> Self {
        Self::IndexUnavailable(msg.into())
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::EmbeddingFailed(msg.into())
    }

    /// Create a backing store error
    pub fn backing_store(msg: impl Into<String>) -> Self {
        Self::BackingStore(msg.into())
    }

    /// True for errors that leave the engine usable with degraded results
    pub fn is_degradation(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_) | Self::EmbeddingFailed(_))
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;
