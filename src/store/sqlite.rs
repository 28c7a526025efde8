//! SQLite-backed [`Store`] implementation.
//!
//! Repositories, analyses, and chat sessions are rows; the nested parts of
//! an analysis that never change after completion (file tree, subsystems,
//! well-known file lists) are JSON columns, while the parts that grow
//! lazily (subsystem descriptions, file explanations) have their own tables
//! so each can be upserted without rewriting the analysis row.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{
    AnalysisResult, CachedDescription, ChatMessage, ChatSession, FileExplanation, Repository,
    SubsystemDescription,
};
use crate::repo_ref::RepoRef;

use super::{new_repository, StatusUpdate, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow::anyhow!("invalid timestamp: {}", ms))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn from_json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.get(column);
    serde_json::from_str(&raw).with_context(|| format!("corrupt JSON in column {}", column))
}

fn row_to_repository(row: &SqliteRow) -> Result<Repository> {
    let status: String = row.get("analysis_status");
    let stars: i64 = row.get("stars");
    let forks: i64 = row.get("forks");
    Ok(Repository {
        id: row.get("id"),
        owner: row.get("owner"),
        name: row.get("name"),
        full_name: row.get("full_name"),
        url: row.get("url"),
        stars: stars.max(0) as u64,
        forks: forks.max(0) as u64,
        primary_language: row.get("primary_language"),
        default_branch: row.get("default_branch"),
        upstream_pushed_at: opt_from_millis(row.get("upstream_pushed_at"))?,
        analysis_status: status.parse()?,
        analysis_started_at: opt_from_millis(row.get("analysis_started_at"))?,
        last_analyzed: opt_from_millis(row.get("last_analyzed"))?,
        last_error: row.get("last_error"),
        version: row.get("version"),
        created_at: from_millis(row.get("created_at"))?,
    })
}

fn row_to_session(row: &SqliteRow) -> Result<ChatSession> {
    Ok(ChatSession {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        client: row.get("client"),
        created_at: from_millis(row.get("created_at"))?,
        last_updated: from_millis(row.get("last_updated"))?,
    })
}

const SELECT_REPOSITORY: &str = "SELECT id, owner, name, full_name, url, stars, forks, \
     primary_language, default_branch, upstream_pushed_at, analysis_status, \
     analysis_started_at, last_analyzed, last_error, version, created_at \
     FROM repositories WHERE id = ?";

async fn insert_description(
    conn: &mut sqlx::SqliteConnection,
    analysis_id: &str,
    description: &SubsystemDescription,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO subsystem_descriptions (analysis_id, name, purpose, entry_points_json,
                                            dependencies_json, key_files_json,
                                            technologies_json, created_seq)
        SELECT ?, ?, ?, ?, ?, ?, ?,
               (SELECT COALESCE(MAX(created_seq), 0) + 1
                FROM subsystem_descriptions WHERE analysis_id = ?)
        WHERE EXISTS (SELECT 1 FROM analyses WHERE id = ?)
        ON CONFLICT(analysis_id, name) DO UPDATE SET
            purpose = excluded.purpose,
            entry_points_json = excluded.entry_points_json,
            dependencies_json = excluded.dependencies_json,
            key_files_json = excluded.key_files_json,
            technologies_json = excluded.technologies_json
        "#,
    )
    .bind(analysis_id)
    .bind(&description.name)
    .bind(&description.purpose)
    .bind(serde_json::to_string(&description.entry_points)?)
    .bind(serde_json::to_string(&description.dependencies)?)
    .bind(serde_json::to_string(&description.key_files)?)
    .bind(serde_json::to_string(&description.technologies)?)
    .bind(analysis_id)
    .bind(analysis_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

async fn insert_explanation(
    conn: &mut sqlx::SqliteConnection,
    analysis_id: &str,
    file_key: &str,
    explanation: &FileExplanation,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO file_explanations (analysis_id, file_key, explanation, generated_at)
        SELECT ?, ?, ?, ?
        WHERE EXISTS (SELECT 1 FROM analyses WHERE id = ?)
        ON CONFLICT(analysis_id, file_key) DO UPDATE SET
            explanation = excluded.explanation,
            generated_at = excluded.generated_at
        "#,
    )
    .bind(analysis_id)
    .bind(file_key)
    .bind(&explanation.explanation)
    .bind(to_millis(explanation.generated_at))
    .bind(analysis_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_or_create_repository(
        &self,
        repo: &RepoRef,
        now: DateTime<Utc>,
    ) -> Result<Repository> {
        let fresh = new_repository(repo, now);
        sqlx::query(
            r#"
            INSERT INTO repositories (id, owner, name, full_name, url, analysis_status,
                                      version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&fresh.id)
        .bind(&fresh.owner)
        .bind(&fresh.name)
        .bind(&fresh.full_name)
        .bind(&fresh.url)
        .bind(fresh.analysis_status.as_str())
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        self.get_repository(&fresh.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("repository {} vanished after insert", fresh.id))
    }

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let row = sqlx::query(SELECT_REPOSITORY)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_repository).transpose()
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected_version: i64,
        update: &StatusUpdate,
    ) -> Result<Option<Repository>> {
        let mut tx = self.pool.begin().await?;

        // The conditional UPDATE is the compare-and-swap; it is the first
        // statement so the transaction takes the write lock immediately.
        let affected = match update {
            StatusUpdate::Analyzing { started_at } => sqlx::query(
                r#"
                UPDATE repositories
                SET analysis_status = 'analyzing', analysis_started_at = ?,
                    version = version + 1
                WHERE id = ? AND version = ?
                "#,
            )
            .bind(to_millis(*started_at))
            .bind(id)
            .bind(expected_version)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            StatusUpdate::Completed {
                metadata,
                analyzed_at,
                ..
            } => sqlx::query(
                r#"
                UPDATE repositories
                SET analysis_status = 'completed', full_name = ?, url = ?, stars = ?,
                    forks = ?, primary_language = ?, default_branch = ?,
                    upstream_pushed_at = ?, last_analyzed = ?, last_error = NULL,
                    analysis_started_at = NULL, version = version + 1
                WHERE id = ? AND version = ?
                "#,
            )
            .bind(&metadata.full_name)
            .bind(&metadata.url)
            .bind(metadata.stars as i64)
            .bind(metadata.forks as i64)
            .bind(&metadata.primary_language)
            .bind(&metadata.default_branch)
            .bind(to_millis(metadata.pushed_at))
            .bind(to_millis(*analyzed_at))
            .bind(id)
            .bind(expected_version)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            StatusUpdate::Failed { error } => sqlx::query(
                r#"
                UPDATE repositories
                SET analysis_status = 'failed', last_error = ?, analysis_started_at = NULL,
                    version = version + 1
                WHERE id = ? AND version = ?
                "#,
            )
            .bind(error)
            .bind(id)
            .bind(expected_version)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
        };

        if affected == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        if let StatusUpdate::Completed { result, .. } = update {
            sqlx::query(
                "DELETE FROM subsystem_descriptions WHERE analysis_id IN \
                 (SELECT id FROM analyses WHERE repo_id = ?)",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "DELETE FROM file_explanations WHERE analysis_id IN \
                 (SELECT id FROM analyses WHERE repo_id = ?)",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM analyses WHERE repo_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT INTO analyses (id, repo_id, framework, file_tree_json, languages_json,
                                      subsystems_json, main_files_json, config_files_json,
                                      documentation_files_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&result.id)
            .bind(id)
            .bind(result.framework.as_str())
            .bind(serde_json::to_string(&result.file_tree)?)
            .bind(serde_json::to_string(&result.languages)?)
            .bind(serde_json::to_string(&result.subsystems)?)
            .bind(serde_json::to_string(&result.main_files)?)
            .bind(serde_json::to_string(&result.config_files)?)
            .bind(serde_json::to_string(&result.documentation_files)?)
            .bind(to_millis(result.created_at))
            .execute(&mut *tx)
            .await?;

            for description in &result.subsystem_descriptions {
                insert_description(&mut *tx, &result.id, description).await?;
            }
            for (key, explanation) in &result.file_explanations {
                insert_explanation(&mut *tx, &result.id, key, explanation).await?;
            }
        }

        let row = sqlx::query(SELECT_REPOSITORY)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let repo = row_to_repository(&row)?;
        tx.commit().await?;
        Ok(Some(repo))
    }

    async fn load_analysis(&self, repo_id: &str) -> Result<Option<AnalysisResult>> {
        let row = sqlx::query(
            r#"
            SELECT a.id, a.framework, a.file_tree_json, a.languages_json, a.subsystems_json,
                   a.main_files_json, a.config_files_json, a.documentation_files_json,
                   a.created_at
            FROM analyses a
            JOIN repositories r ON r.id = a.repo_id
            WHERE a.repo_id = ? AND r.analysis_status = 'completed'
            "#,
        )
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let analysis_id: String = row.get("id");
        let framework: String = row.get("framework");

        let description_rows = sqlx::query(
            r#"
            SELECT name, purpose, entry_points_json, dependencies_json, key_files_json,
                   technologies_json
            FROM subsystem_descriptions
            WHERE analysis_id = ?
            ORDER BY created_seq ASC
            "#,
        )
        .bind(&analysis_id)
        .fetch_all(&self.pool)
        .await?;

        let mut subsystem_descriptions = Vec::with_capacity(description_rows.len());
        for r in &description_rows {
            subsystem_descriptions.push(SubsystemDescription {
                name: r.get("name"),
                purpose: r.get("purpose"),
                entry_points: from_json(r, "entry_points_json")?,
                dependencies: from_json(r, "dependencies_json")?,
                key_files: from_json(r, "key_files_json")?,
                technologies: from_json(r, "technologies_json")?,
            });
        }

        let explanation_rows = sqlx::query(
            "SELECT file_key, explanation, generated_at FROM file_explanations WHERE analysis_id = ?",
        )
        .bind(&analysis_id)
        .fetch_all(&self.pool)
        .await?;

        let mut file_explanations = BTreeMap::new();
        for r in &explanation_rows {
            file_explanations.insert(
                r.get::<String, _>("file_key"),
                FileExplanation {
                    explanation: r.get("explanation"),
                    generated_at: from_millis(r.get("generated_at"))?,
                },
            );
        }

        Ok(Some(AnalysisResult {
            id: analysis_id,
            framework: framework.parse()?,
            file_tree: from_json(&row, "file_tree_json")?,
            languages: from_json(&row, "languages_json")?,
            subsystems: from_json(&row, "subsystems_json")?,
            subsystem_descriptions,
            file_explanations,
            main_files: from_json(&row, "main_files_json")?,
            config_files: from_json(&row, "config_files_json")?,
            documentation_files: from_json(&row, "documentation_files_json")?,
            created_at: from_millis(row.get("created_at"))?,
        }))
    }

    async fn upsert_subsystem_description(
        &self,
        analysis_id: &str,
        description: &SubsystemDescription,
    ) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let affected = insert_description(&mut *conn, analysis_id, description).await?;
        Ok(affected > 0)
    }

    async fn upsert_file_explanation(
        &self,
        analysis_id: &str,
        file_key: &str,
        explanation: &FileExplanation,
    ) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let affected = insert_explanation(&mut *conn, analysis_id, file_key, explanation).await?;
        Ok(affected > 0)
    }

    async fn get_cached(&self, key: &str) -> Result<Option<CachedDescription>> {
        let row = sqlx::query(
            "SELECT key, content, generated_at, expires_at FROM description_cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(CachedDescription {
                key: r.get("key"),
                content: r.get("content"),
                generated_at: from_millis(r.get("generated_at"))?,
                expires_at: from_millis(r.get("expires_at"))?,
            })
        })
        .transpose()
    }

    async fn put_cached(&self, entry: &CachedDescription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO description_cache (key, content, generated_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content = excluded.content,
                generated_at = excluded.generated_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&entry.key)
        .bind(&entry.content)
        .bind(to_millis(entry.generated_at))
        .bind(to_millis(entry.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_or_create_session(
        &self,
        repo_id: &str,
        client: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatSession> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, repo_id, client, created_at, last_updated)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(repo_id, client) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(repo_id)
        .bind(client)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, repo_id, client, created_at, last_updated FROM chat_sessions \
             WHERE repo_id = ? AND client = ?",
        )
        .bind(repo_id)
        .bind(client)
        .fetch_one(&self.pool)
        .await?;
        row_to_session(&row)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let row = sqlx::query(
            "SELECT id, repo_id, client, created_at, last_updated FROM chat_sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn append_message(&self, session_id: &str, message: &ChatMessage) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query(
            "UPDATE chat_sessions SET last_updated = MAX(last_updated, ?) WHERE id = ?",
        )
        .bind(to_millis(message.timestamp))
        .bind(session_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if touched == 0 {
            tx.rollback().await?;
            anyhow::bail!("chat session not found: {}", session_id);
        }

        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(to_millis(message.timestamp))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, role, content, timestamp FROM chat_messages WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let role: String = r.get("role");
                Ok(ChatMessage {
                    id: r.get("id"),
                    role: role.parse()?,
                    content: r.get("content"),
                    timestamp: from_millis(r.get("timestamp"))?,
                })
            })
            .collect()
    }
}
