//! Storage abstraction.
//!
//! The [`Store`] trait is the document-store seam of the pipeline. Every
//! write is either a compare-and-swap on a repository's status version or
//! an upsert of one nested item (a subsystem description, a file
//! explanation, a cache entry, a chat message), never a blind overwrite of
//! a whole document.
//!
//! Two backends exist: [`sqlite::SqliteStore`] for real use and
//! [`memory::InMemoryStore`] for tests and in-process use.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    AnalysisResult, AnalysisStatus, CachedDescription, ChatMessage, ChatSession, FileExplanation,
    RepoMetadata, Repository, SubsystemDescription,
};
use crate::repo_ref::RepoRef;

/// The change a status compare-and-swap applies.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    /// Claim the single-flight lease.
    Analyzing { started_at: DateTime<Utc> },
    /// Publish a finished analysis together with the metadata it was built
    /// from. The previous snapshot and its enrichment are replaced.
    Completed {
        metadata: RepoMetadata,
        result: Box<AnalysisResult>,
        analyzed_at: DateTime<Utc>,
    },
    /// Record a terminal failure.
    Failed { error: String },
}

impl StatusUpdate {
    pub fn target(&self) -> AnalysisStatus {
        match self {
            Self::Analyzing { .. } => AnalysisStatus::Analyzing,
            Self::Completed { .. } => AnalysisStatus::Completed,
            Self::Failed { .. } => AnalysisStatus::Failed,
        }
    }
}

/// Applies a [`StatusUpdate`] to an in-memory [`Repository`] value and
/// bumps its version. Shared by both backends so they agree on which
/// fields each transition touches.
pub(crate) fn apply_update(repo: &mut Repository, update: &StatusUpdate) {
    match update {
        StatusUpdate::Analyzing { started_at } => {
            repo.analysis_status = AnalysisStatus::Analyzing;
            repo.analysis_started_at = Some(*started_at);
        }
        StatusUpdate::Completed {
            metadata,
            analyzed_at,
            ..
        } => {
            repo.analysis_status = AnalysisStatus::Completed;
            repo.full_name = metadata.full_name.clone();
            repo.url = metadata.url.clone();
            repo.stars = metadata.stars;
            repo.forks = metadata.forks;
            repo.primary_language = metadata.primary_language.clone();
            repo.default_branch = Some(metadata.default_branch.clone());
            repo.upstream_pushed_at = Some(metadata.pushed_at);
            repo.last_analyzed = Some(*analyzed_at);
            repo.last_error = None;
            repo.analysis_started_at = None;
        }
        StatusUpdate::Failed { error } => {
            repo.analysis_status = AnalysisStatus::Failed;
            repo.last_error = Some(error.clone());
            repo.analysis_started_at = None;
        }
    }
    repo.version += 1;
}

/// A freshly created, never analyzed repository record.
pub(crate) fn new_repository(repo: &RepoRef, now: DateTime<Utc>) -> Repository {
    Repository {
        id: repo.id(),
        owner: repo.owner.clone(),
        name: repo.name.clone(),
        full_name: repo.full_name(),
        url: repo.html_url(),
        stars: 0,
        forks: 0,
        primary_language: None,
        default_branch: None,
        upstream_pushed_at: None,
        analysis_status: AnalysisStatus::Pending,
        analysis_started_at: None,
        last_analyzed: None,
        last_error: None,
        version: 0,
        created_at: now,
    }
}

/// Abstract document store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_or_create_repository`](Store::find_or_create_repository) | Idempotent repository creation |
/// | [`compare_and_set_status`](Store::compare_and_set_status) | Atomic conditional status write |
/// | [`load_analysis`](Store::load_analysis) | Completed analysis with its enrichment |
/// | [`upsert_subsystem_description`](Store::upsert_subsystem_description) | Upsert one description by name |
/// | [`upsert_file_explanation`](Store::upsert_file_explanation) | Upsert one explanation by file key |
/// | [`get_cached`](Store::get_cached) / [`put_cached`](Store::put_cached) | TTL description cache |
/// | [`get_or_create_session`](Store::get_or_create_session) | Current chat session per repo and client |
/// | [`append_message`](Store::append_message) / [`load_messages`](Store::load_messages) | Append-only chat log |
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the repository with `repo.id()`, creating a `pending` record
    /// on first sight. Concurrent callers all observe the same record.
    async fn find_or_create_repository(
        &self,
        repo: &RepoRef,
        now: DateTime<Utc>,
    ) -> Result<Repository>;

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>>;

    /// Applies `update` only if the stored version equals
    /// `expected_version`. Returns the updated record, or `None` when the
    /// version moved (another writer won) or the repository does not exist.
    ///
    /// A `Completed` update stores its analysis in the same atomic step.
    async fn compare_and_set_status(
        &self,
        id: &str,
        expected_version: i64,
        update: &StatusUpdate,
    ) -> Result<Option<Repository>>;

    /// The current analysis, only while the repository is `completed`.
    async fn load_analysis(&self, repo_id: &str) -> Result<Option<AnalysisResult>>;

    /// Upserts a description into analysis snapshot `analysis_id`. Returns
    /// `false` if that snapshot has been superseded.
    async fn upsert_subsystem_description(
        &self,
        analysis_id: &str,
        description: &SubsystemDescription,
    ) -> Result<bool>;

    /// Upserts an explanation into analysis snapshot `analysis_id` under
    /// `file_key`. Returns `false` if that snapshot has been superseded.
    async fn upsert_file_explanation(
        &self,
        analysis_id: &str,
        file_key: &str,
        explanation: &FileExplanation,
    ) -> Result<bool>;

    /// Returns the entry even if it has expired; callers check expiry.
    async fn get_cached(&self, key: &str) -> Result<Option<CachedDescription>>;

    async fn put_cached(&self, entry: &CachedDescription) -> Result<()>;

    /// Returns the current session for `(repo_id, client)`, creating it if
    /// none exists.
    async fn get_or_create_session(
        &self,
        repo_id: &str,
        client: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatSession>;

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>>;

    /// Appends to the session log and bumps `last_updated`.
    async fn append_message(&self, session_id: &str, message: &ChatMessage) -> Result<()>;

    /// All messages in insertion order.
    async fn load_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>>;
}
