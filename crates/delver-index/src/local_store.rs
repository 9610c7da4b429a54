//! Disk-backed vector store on `SQLite`.
//!
//! Vectors are stored as little-endian `f32` blobs and scored with brute-force
//! cosine similarity. The store is a derived cache of the workspace and can be
//! dropped and rebuilt at any time.

use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::embedder::BoxFuture;
use crate::types::{RecordFilter, RecordMetadata, ScoredRecord, VectorRecord};
use crate::vector_store::{VectorStore, VectorStoreError, cosine_similarity, rank};

type RecordRow = (String, String, i64, i64, i64, String, Vec<u8>);

pub struct LocalStore {
    pool: SqlitePool,
    collection: String,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    #[must_use]
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn ensure_impl(&self, dimension: usize) -> Result<(), VectorStoreError> {
        let stored: Option<i64> =
            sqlx::query_scalar("SELECT dimension FROM store_meta WHERE collection = ?")
                .bind(&self.collection)
                .fetch_optional(&self.pool)
                .await?;
        match stored {
            Some(d) => {
                let stored = usize::try_from(d).unwrap_or(0);
                if stored != dimension {
                    return Err(VectorStoreError::DimensionMismatch {
                        stored,
                        requested: dimension,
                    });
                }
            }
            None => {
                let dim = i64::try_from(dimension)
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
                sqlx::query("INSERT INTO store_meta (collection, dimension) VALUES (?, ?)")
                    .bind(&self.collection)
                    .bind(dim)
                    .execute(&self.pool)
                    .await?;
                tracing::info!(collection = %self.collection, dimension, "created local collection");
            }
        }
        Ok(())
    }

    async fn exists_impl(&self) -> Result<bool, VectorStoreError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM store_meta WHERE collection = ?")
                .bind(&self.collection)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn upsert_impl(&self, records: Vec<VectorRecord>) -> Result<(), VectorStoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                "INSERT INTO records \
                 (collection, id, path, ordinal, start_char, end_char, text, vector) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (collection, id) DO UPDATE SET \
                 path = excluded.path, ordinal = excluded.ordinal, \
                 start_char = excluded.start_char, end_char = excluded.end_char, \
                 text = excluded.text, vector = excluded.vector",
            )
            .bind(&self.collection)
            .bind(&r.id)
            .bind(&r.metadata.path)
            .bind(to_i64(r.metadata.ordinal)?)
            .bind(to_i64(r.metadata.start)?)
            .bind(to_i64(r.metadata.end)?)
            .bind(&r.metadata.text)
            .bind(vector_to_blob(&r.vector))
            .execute(&mut *tx)
            .await
            .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
        Ok(())
    }

    async fn query_impl(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<RecordFilter>,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT id, path, ordinal, start_char, end_char, text, vector \
             FROM records WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VectorStoreError::Query(e.to_string()))?;

        let scored = rows
            .into_iter()
            .map(|(id, path, ordinal, start, end, text, blob)| {
                let stored = blob_to_vector(&blob);
                ScoredRecord {
                    id,
                    score: cosine_similarity(&vector, &stored),
                    metadata: RecordMetadata {
                        path,
                        ordinal: to_usize(ordinal),
                        text,
                        start: to_usize(start),
                        end: to_usize(end),
                    },
                }
            })
            .filter(|r| filter.as_ref().is_none_or(|f| f.matches(&r.metadata)))
            .collect();

        Ok(rank(scored, top_k))
    }

    async fn delete_impl(&self, ids: Vec<String>) -> Result<(), VectorStoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        for id in &ids {
            sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
                .bind(&self.collection)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
        Ok(())
    }

    async fn count_impl(&self) -> Result<usize, VectorStoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(to_usize(n))
    }
}

impl VectorStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn ensure(&self, dimension: usize) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(self.ensure_impl(dimension))
    }

    fn exists(&self) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        Box::pin(self.exists_impl())
    }

    fn upsert(&self, records: Vec<VectorRecord>) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(self.upsert_impl(records))
    }

    fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<RecordFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredRecord>, VectorStoreError>> {
        Box::pin(self.query_impl(vector, top_k, filter))
    }

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(self.delete_impl(ids))
    }

    fn count(&self) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        Box::pin(self.count_impl())
    }
}

fn to_i64(n: usize) -> Result<i64, VectorStoreError> {
    i64::try_from(n).map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

fn to_usize(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
