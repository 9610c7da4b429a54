use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::error::Result;

/// What the last successful ingestion recorded for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub fingerprint: String,
    pub chunk_count: usize,
}

/// Per-file fingerprints persisted next to the local store, used to skip
/// unchanged files and to find stale records.
#[derive(Debug, Clone)]
pub struct IngestManifest {
    pool: SqlitePool,
}

impl IngestManifest {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load every entry recorded under `scope`, keyed by relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn load(&self, scope: &str) -> Result<HashMap<String, ManifestEntry>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT path, fingerprint, chunk_count FROM ingested_files WHERE scope = ?",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(path, fingerprint, count)| {
                (
                    path,
                    ManifestEntry {
                        fingerprint,
                        chunk_count: usize::try_from(count).unwrap_or(0),
                    },
                )
            })
            .collect())
    }

    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn record(
        &self,
        scope: &str,
        path: &str,
        fingerprint: &str,
        chunk_count: usize,
    ) -> Result<()> {
        let count = i64::try_from(chunk_count).unwrap_or(i64::MAX);
        sqlx::query(
            "INSERT INTO ingested_files (scope, path, fingerprint, chunk_count) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (scope, path) DO UPDATE SET \
             fingerprint = excluded.fingerprint, chunk_count = excluded.chunk_count, \
             indexed_at = unixepoch()",
        )
        .bind(scope)
        .bind(path)
        .bind(fingerprint)
        .bind(count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn remove(&self, scope: &str, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM ingested_files WHERE scope = ? AND path = ?")
            .bind(scope)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Forget every file recorded under `scope`, forcing a full re-ingest.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear(&self, scope: &str) -> Result<u64> {
        let done = sqlx::query("DELETE FROM ingested_files WHERE scope = ?")
            .bind(scope)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    /// Stamp a completed pass for `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn mark_run(&self, scope: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO ingest_runs (scope, finished_at) VALUES (?, unixepoch()) \
             ON CONFLICT (scope) DO UPDATE SET finished_at = unixepoch()",
        )
        .bind(scope)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Unix time of the last completed pass, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn last_run(&self, scope: &str) -> Result<Option<i64>> {
        let ts: Option<i64> =
            sqlx::query_scalar("SELECT finished_at FROM ingest_runs WHERE scope = ?")
                .bind(scope)
                .fetch_optional(&self.pool)
                .await?;
        Ok(ts)
    }
}
