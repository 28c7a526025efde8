//! SQLite connection pool.
//!
//! The database runs in WAL mode so HTTP readers are not blocked by an
//! analysis publishing its result. Foreign keys are enforced; enrichment
//! rows cascade with their analysis snapshot.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;

const MAX_CONNECTIONS: u32 = 5;

fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal)
}

/// Opens the pool for `[db].path`, creating the file and its directory.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let path = &config.db.path;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating database directory {}", dir.display()))?;
    }

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(connect_options(path))
        .await
        .with_context(|| format!("opening database {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_nested_directory_and_uses_wal() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_db_path(tmp.path().join("a/b/atlas.sqlite"));
        let pool = connect(&config).await.unwrap();

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(config.db.path.exists());
        pool.close().await;
    }
}
