//! Workspace indexing and hybrid retrieval.
//!
//! Files (source, text and PDF documents) are chunked, embedded and written to a [`vector_store::VectorStore`]
//! (local `SQLite` or remote Qdrant). Queries fuse exact line matches over the
//! raw files with nearest-neighbour search over the stored chunks.

pub mod chunker;
pub mod db;
pub mod embedder;
pub mod error;
pub mod exact;
pub mod languages;
pub mod local_store;
pub mod manifest;
#[cfg(feature = "pdf")]
pub mod pdf;
pub mod pipeline;
pub mod qdrant_store;
pub mod retriever;
pub mod structure;
pub mod types;
pub mod vector_store;
pub mod workspace;

pub use error::{IndexError, Result, RetrievalError};
