use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Creates the database file and schema. Idempotent.
pub async fn init_database(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Timestamps are Unix milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            full_name TEXT NOT NULL,
            url TEXT NOT NULL,
            stars INTEGER NOT NULL DEFAULT 0,
            forks INTEGER NOT NULL DEFAULT 0,
            primary_language TEXT,
            default_branch TEXT,
            upstream_pushed_at INTEGER,
            analysis_status TEXT NOT NULL DEFAULT 'pending',
            analysis_started_at INTEGER,
            last_analyzed INTEGER,
            last_error TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            repo_id TEXT NOT NULL UNIQUE,
            framework TEXT NOT NULL,
            file_tree_json TEXT NOT NULL,
            languages_json TEXT NOT NULL,
            subsystems_json TEXT NOT NULL,
            main_files_json TEXT NOT NULL,
            config_files_json TEXT NOT NULL,
            documentation_files_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (repo_id) REFERENCES repositories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subsystem_descriptions (
            analysis_id TEXT NOT NULL,
            name TEXT NOT NULL,
            purpose TEXT NOT NULL,
            entry_points_json TEXT NOT NULL,
            dependencies_json TEXT NOT NULL,
            key_files_json TEXT NOT NULL,
            technologies_json TEXT NOT NULL,
            created_seq INTEGER NOT NULL,
            PRIMARY KEY (analysis_id, name),
            FOREIGN KEY (analysis_id) REFERENCES analyses(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_explanations (
            analysis_id TEXT NOT NULL,
            file_key TEXT NOT NULL,
            explanation TEXT NOT NULL,
            generated_at INTEGER NOT NULL,
            PRIMARY KEY (analysis_id, file_key),
            FOREIGN KEY (analysis_id) REFERENCES analyses(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS description_cache (
            key TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            generated_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_sessions (
            id TEXT PRIMARY KEY,
            repo_id TEXT NOT NULL,
            client TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_updated INTEGER NOT NULL,
            UNIQUE(repo_id, client)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // seq preserves insertion order independent of clock resolution.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES chat_sessions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, seq)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_description_cache_expires ON description_cache(expires_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
