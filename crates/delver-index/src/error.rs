//! Error types for ingestion and index maintenance.

use crate::embedder::EmbedError;
use crate::vector_store::VectorStoreError;

/// Errors raised while building or maintaining the index.
///
/// Per-file read failures never surface here; they are recorded in the
/// ingestion report and the pass continues.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error outside of per-file reads (data directory, workspace root).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `SQLite` error in the manifest or local store database.
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Embedding backend outage; aborts the pass.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    /// Vector store outage; aborts the pass.
    #[error("vector store failed: {0}")]
    Store(#[from] VectorStoreError),

    /// Inconsistent chunking or store configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors raised by the retrieval channels.
///
/// The hybrid retriever absorbs backend failures into a degraded note; only
/// the single-channel entry points surface them.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("vector store query failed: {0}")]
    Store(#[from] VectorStoreError),
}
