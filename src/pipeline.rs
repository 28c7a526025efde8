//! Analysis orchestration.
//!
//! [`Pipeline`] wires the components together along the data flow
//! fetch → classify → partition → persist, and exposes the read side
//! (descriptions, explanations, related subsystems, graph, chat) over the
//! persisted analysis.
//!
//! # Analysis Run
//!
//! 1. Parse the reference and find-or-create the repository record.
//! 2. If the record is `completed` and the run is not forced, fetch live
//!    metadata and return [`AnalysisOutcome::Fresh`] when the stored
//!    analysis is not older than upstream. This check takes no lock.
//! 3. Claim the single-flight lease (`→ analyzing`). Losing the race
//!    returns [`AnalysisOutcome::InProgress`].
//! 4. In a spawned task, fetch metadata and the file tree, build the
//!    [`AnalysisResult`], and publish it (`→ completed`) or record the
//!    categorized error (`→ failed`). The task is not tied to the caller,
//!    so a dropped request cannot leave the lease dangling.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::chat::{ChatReply, ChatService};
use crate::classify::classify;
use crate::config::Config;
use crate::describe::{DescriptionSynthesizer, Enrichment};
use crate::error::{AnalysisError, QueryError, StatusError};
use crate::events::{EventBus, PipelineEvent};
use crate::freshness::FreshnessTracker;
use crate::generation::TextGenerator;
use crate::github::HostingApi;
use crate::graph::{augment_with_related, build_graph, Graph};
use crate::inventory::take_inventory;
use crate::models::{
    AnalysisResult, AnalysisStatus, ChatMessage, ChatSession, FileExplanation, FileRecord,
    RepoMetadata, Repository, SubsystemDescription,
};
use crate::partition::partition;
use crate::related::related_subsystems;
use crate::repo_ref::RepoRef;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "repository", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// The stored analysis is current; nothing was fetched beyond metadata.
    Fresh(Repository),
    /// A new analysis was built and published.
    Completed(Repository),
    /// Another run holds the lease.
    InProgress(Repository),
}

impl AnalysisOutcome {
    pub fn repository(&self) -> &Repository {
        match self {
            Self::Fresh(r) | Self::Completed(r) | Self::InProgress(r) => r,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn Store>,
    hosting: Arc<dyn HostingApi>,
    tracker: Arc<FreshnessTracker>,
    describer: Arc<DescriptionSynthesizer>,
    chat: Arc<ChatService>,
    events: EventBus,
    related_limit: usize,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        hosting: Arc<dyn HostingApi>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let events = EventBus::new();
        let tracker = FreshnessTracker::new(store.clone(), events.clone(), config.analysis.lease_secs);
        let describer = DescriptionSynthesizer::new(
            store.clone(),
            generator.clone(),
            hosting.clone(),
            events.clone(),
            &config.generation,
            &config.cache,
        );
        let chat = ChatService::new(store.clone(), generator, config.chat.history_window);

        Self {
            store,
            hosting,
            tracker: Arc::new(tracker),
            describer: Arc::new(describer),
            chat: Arc::new(chat),
            events,
            related_limit: config.analysis.related_limit,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn tracker(&self) -> &FreshnessTracker {
        &self.tracker
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn chat_service(&self) -> &ChatService {
        &self.chat
    }

    // ============ Analysis ============

    /// Runs (or skips) an analysis of `input`. Fetch failures during a run
    /// are recorded on the repository and returned. A failed freshness
    /// check on a completed repository is returned without touching it.
    pub async fn analyze(&self, input: &str, force: bool) -> Result<AnalysisOutcome, AnalysisError> {
        let repo_ref = RepoRef::parse(input)?;
        let record = self
            .store
            .find_or_create_repository(&repo_ref, Utc::now())
            .await?;

        if record.analysis_status == AnalysisStatus::Completed && !force {
            match self.hosting.repository(&repo_ref).await {
                Ok(metadata) => {
                    if self.tracker.check_freshness(&record.id, metadata.pushed_at).await? {
                        tracing::info!(repo = %record.id, "analysis is fresh");
                        return Ok(AnalysisOutcome::Fresh(record));
                    }
                    tracing::info!(repo = %record.id, pushed_at = %metadata.pushed_at, "analysis is stale");
                }
                Err(err) => {
                    // The stored analysis stays published; nothing is claimed.
                    tracing::warn!(repo = %record.id, category = err.category(), error = %err, "freshness check failed");
                    return Err(err);
                }
            }
        }

        let repo_id = record.id.clone();
        let lease = match self.tracker.begin_analysis(&repo_id, Utc::now()).await {
            Ok(lease) => lease,
            Err(StatusError::AlreadyAnalyzing(_)) => {
                let current = self.store.get_repository(&repo_id).await?.unwrap_or(record);
                tracing::info!(repo = %current.id, "analysis already in progress");
                return Ok(AnalysisOutcome::InProgress(current));
            }
            Err(err) => return Err(status_error(err)),
        };

        let this = self.clone();
        tokio::spawn(async move { this.run_locked(repo_ref, lease).await })
            .await
            .map_err(|e| AnalysisError::Persistence(format!("analysis task failed: {}", e)))?
    }

    async fn run_locked(
        &self,
        repo_ref: RepoRef,
        lease: Repository,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        tracing::info!(repo = %lease.id, "analysis started");
        match build_analysis(self.hosting.as_ref(), &repo_ref).await {
            Ok((metadata, result)) => {
                let subsystems = result.subsystems.len();
                let files = result.file_tree.len();
                let framework = result.framework;
                match self.tracker.complete(&lease, metadata, result, Utc::now()).await {
                    Ok(done) => {
                        tracing::info!(repo = %done.id, %framework, files, subsystems, "analysis completed");
                        Ok(AnalysisOutcome::Completed(done))
                    }
                    Err(StatusError::Conflict(id)) => {
                        tracing::warn!(repo = %id, "lease lost before publishing, result discarded");
                        Err(status_error(StatusError::Conflict(id)))
                    }
                    Err(err) => {
                        let err = status_error(err);
                        if let Err(status) = self.tracker.fail(&lease, &err).await {
                            tracing::error!(repo = %lease.id, error = %status, "could not record analysis failure");
                        }
                        Err(err)
                    }
                }
            }
            Err(err) => {
                tracing::warn!(repo = %lease.id, category = err.category(), error = %err, "analysis failed");
                if let Err(status) = self.tracker.fail(&lease, &err).await {
                    tracing::error!(repo = %lease.id, error = %status, "could not record analysis failure");
                }
                Err(err)
            }
        }
    }

    // ============ Read side ============

    pub async fn repository(&self, input: &str) -> Result<Option<Repository>, QueryError> {
        let repo_ref = RepoRef::parse(input)?;
        Ok(self.store.get_repository(&repo_ref.id()).await?)
    }

    /// The repository and its completed analysis.
    pub async fn analysis(&self, input: &str) -> Result<(Repository, AnalysisResult), QueryError> {
        let repo_ref = RepoRef::parse(input)?;
        let id = repo_ref.id();
        let repo = self
            .store
            .get_repository(&id)
            .await?
            .ok_or_else(|| QueryError::NotAnalyzed(id.clone()))?;
        let analysis = self
            .store
            .load_analysis(&id)
            .await?
            .ok_or(QueryError::NotAnalyzed(id))?;
        Ok((repo, analysis))
    }

    pub async fn describe(
        &self,
        input: &str,
        subsystem: &str,
        refresh: bool,
    ) -> Result<Enrichment<SubsystemDescription>, QueryError> {
        let (repo, analysis) = self.analysis(input).await?;
        let target = analysis
            .subsystem(subsystem)
            .ok_or_else(|| QueryError::UnknownSubsystem(subsystem.to_string()))?;
        Ok(self
            .describer
            .describe_subsystem(&repo, &analysis, target, refresh)
            .await?)
    }

    pub async fn describe_all(
        &self,
        input: &str,
    ) -> Result<Vec<(String, Enrichment<SubsystemDescription>)>, QueryError> {
        let (repo, analysis) = self.analysis(input).await?;
        Ok(self.describer.describe_all(&repo, &analysis).await?)
    }

    pub async fn explain(
        &self,
        input: &str,
        path: &str,
        refresh: bool,
    ) -> Result<Enrichment<FileExplanation>, QueryError> {
        let (repo, analysis) = self.analysis(input).await?;
        let file = analysis
            .file(path)
            .ok_or_else(|| QueryError::UnknownFile(path.to_string()))?;
        Ok(self
            .describer
            .explain_file(&repo, &analysis, file, refresh)
            .await?)
    }

    pub async fn related(
        &self,
        input: &str,
        subsystem: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, QueryError> {
        let (_, analysis) = self.analysis(input).await?;
        let target = analysis
            .subsystem(subsystem)
            .ok_or_else(|| QueryError::UnknownSubsystem(subsystem.to_string()))?;
        Ok(related_subsystems(
            target,
            &analysis.subsystems,
            limit.unwrap_or(self.related_limit),
        ))
    }

    pub async fn graph(&self, input: &str, with_related: bool) -> Result<Graph, QueryError> {
        let (_, analysis) = self.analysis(input).await?;
        let mut graph = build_graph(&analysis.subsystems, analysis.framework);
        if with_related {
            augment_with_related(&mut graph, &analysis.subsystems, self.related_limit);
        }
        Ok(graph)
    }

    pub async fn chat(
        &self,
        input: &str,
        client: &str,
        question: &str,
    ) -> Result<ChatReply, QueryError> {
        let (repo, analysis) = self.analysis(input).await?;
        Ok(self.chat.ask(&repo, &analysis, client, question).await?)
    }

    /// The current session for `(input, client)` and its recent messages.
    pub async fn history(
        &self,
        input: &str,
        client: &str,
    ) -> Result<(ChatSession, Vec<ChatMessage>), QueryError> {
        let repo_ref = RepoRef::parse(input)?;
        let id = repo_ref.id();
        if self.store.get_repository(&id).await?.is_none() {
            return Err(QueryError::NotAnalyzed(id));
        }
        let session = self.chat.get_or_create_session(&id, client).await?;
        let messages = self.chat.recent_messages(&session.id).await?;
        Ok((session, messages))
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }
}

fn status_error(err: StatusError) -> AnalysisError {
    match err {
        StatusError::Persistence(e) => AnalysisError::from(e),
        other => AnalysisError::Persistence(other.to_string()),
    }
}

/// Fetches metadata and the file tree and builds a complete analysis.
pub async fn build_analysis(
    hosting: &dyn HostingApi,
    repo_ref: &RepoRef,
) -> Result<(RepoMetadata, AnalysisResult), AnalysisError> {
    let metadata = hosting.repository(repo_ref).await?;
    let entries = hosting
        .file_tree(repo_ref, &metadata.default_branch)
        .await?;

    let mut seen = HashSet::new();
    let file_tree: Vec<FileRecord> = entries
        .into_iter()
        .filter(|e| seen.insert(e.path.clone()))
        .map(|e| FileRecord::new(e.path, e.size))
        .collect();

    let framework = classify(&file_tree);
    let subsystems = partition(&file_tree, framework);
    let inventory = take_inventory(&file_tree)?;

    let result = AnalysisResult {
        id: Uuid::new_v4().to_string(),
        framework,
        file_tree,
        languages: inventory.languages,
        subsystems,
        subsystem_descriptions: Vec::new(),
        file_explanations: Default::default(),
        main_files: inventory.main_files,
        config_files: inventory.config_files,
        documentation_files: inventory.documentation_files,
        created_at: Utc::now(),
    };
    Ok((metadata, result))
}
