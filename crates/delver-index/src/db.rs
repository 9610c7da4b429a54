use std::path::Path;
use std::str::FromStr;

pub use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::error::Result;

/// Open (or create) the index database and run migrations.
///
/// Holds both the local vector store tables and the ingestion manifest.
/// WAL journaling lets queries proceed while an ingestion pass writes.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or migrations fail.
pub async fn open_index_db(path: &Path) -> Result<SqlitePool> {
    let in_memory = path.as_os_str() == ":memory:";
    let url = if in_memory {
        "sqlite::memory:".to_owned()
    } else {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        format!("sqlite:{}?mode=rwc", path.display())
    };

    let opts = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    // every in-memory connection is its own database
    let max_connections = if in_memory { 1 } else { 5 };
    let mut pool_opts = SqlitePoolOptions::new().max_connections(max_connections);
    if in_memory {
        pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool_opts
        .connect_with(opts)
        .await?;

    sqlx::migrate!().run(&pool).await?;
    tracing::debug!(path = %path.display(), "index database ready");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_parent_dirs_and_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/index.db");
        let pool = open_index_db(&path).await.unwrap();
        assert!(path.exists());

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[tokio::test]
    async fn in_memory_database_migrates() {
        let pool = open_index_db(Path::new(":memory:")).await.unwrap();
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }
}
