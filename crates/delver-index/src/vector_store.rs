use std::future::Future;
use std::time::Duration;

use crate::embedder::BoxFuture;
use crate::types::{RecordFilter, ScoredRecord, VectorRecord};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("vector store {op} timed out after {}ms", .timeout.as_millis())]
    Timeout { op: &'static str, timeout: Duration },
    #[error("store dimension is {stored}, embedder produces {requested}")]
    DimensionMismatch { stored: usize, requested: usize },
}

impl From<sqlx::Error> for VectorStoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

/// Nearest-neighbor store of chunk embeddings.
///
/// Implementations must treat `upsert` as idempotent per id, never return
/// more than `top_k` results, and answer queries on an empty store with an
/// empty list.
pub trait VectorStore: Send + Sync {
    /// Backend identity for logs.
    fn name(&self) -> &'static str;

    /// Create the collection for `dimension`, or verify an existing one matches.
    fn ensure(&self, dimension: usize) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Whether the collection has been created.
    fn exists(&self) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn upsert(&self, records: Vec<VectorRecord>) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<RecordFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>, VectorStoreError>>;

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn count(&self) -> BoxFuture<'_, Result<usize, VectorStoreError>>;
}

/// Bound a store call by `timeout`.
///
/// # Errors
///
/// Returns [`VectorStoreError::Timeout`] when the deadline passes first, or
/// the store's own error.
pub async fn with_timeout<T>(
    op: &'static str,
    timeout: Duration,
    fut: impl Future<Output = Result<T, VectorStoreError>>,
) -> Result<T, VectorStoreError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| VectorStoreError::Timeout { op, timeout })?
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Sort by score descending, then path and ordinal, and keep the top `k`.
pub(crate) fn rank(mut scored: Vec<ScoredRecord>, k: usize) -> Vec<ScoredRecord> {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.metadata.path.cmp(&b.metadata.path))
            .then_with(|| a.metadata.ordinal.cmp(&b.metadata.ordinal))
    });
    scored.truncate(k);
    scored
}
