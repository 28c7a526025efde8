//! In-memory [`Store`] implementation for tests and in-process use.
//!
//! All state sits behind one `Mutex`, so every trait method is atomic with
//! respect to every other, which is what the compare-and-swap needs.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AnalysisResult, AnalysisStatus, CachedDescription, ChatMessage, ChatSession, FileExplanation,
    Repository, SubsystemDescription,
};
use crate::repo_ref::RepoRef;

use super::{apply_update, new_repository, StatusUpdate, Store};

#[derive(Default)]
struct State {
    repos: HashMap<String, Repository>,
    /// Keyed by repository id.
    analyses: HashMap<String, AnalysisResult>,
    cache: HashMap<String, CachedDescription>,
    sessions: HashMap<String, ChatSession>,
    /// `(repo_id, client)` to session id.
    current_sessions: HashMap<(String, String), String>,
    messages: HashMap<String, Vec<ChatMessage>>,
}

impl State {
    fn analysis_by_id(&mut self, analysis_id: &str) -> Option<&mut AnalysisResult> {
        self.analyses.values_mut().find(|a| a.id == analysis_id)
    }
}

/// In-memory store.
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_or_create_repository(
        &self,
        repo: &RepoRef,
        now: DateTime<Utc>,
    ) -> Result<Repository> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .repos
            .entry(repo.id())
            .or_insert_with(|| new_repository(repo, now));
        Ok(record.clone())
    }

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let state = self.state.lock().unwrap();
        Ok(state.repos.get(id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected_version: i64,
        update: &StatusUpdate,
    ) -> Result<Option<Repository>> {
        let mut state = self.state.lock().unwrap();
        let updated = match state.repos.get_mut(id) {
            Some(repo) if repo.version == expected_version => {
                apply_update(repo, update);
                repo.clone()
            }
            _ => return Ok(None),
        };
        if let StatusUpdate::Completed { result, .. } = update {
            state.analyses.insert(id.to_string(), (**result).clone());
        }
        Ok(Some(updated))
    }

    async fn load_analysis(&self, repo_id: &str) -> Result<Option<AnalysisResult>> {
        let state = self.state.lock().unwrap();
        let completed = state
            .repos
            .get(repo_id)
            .is_some_and(|r| r.analysis_status == AnalysisStatus::Completed);
        if !completed {
            return Ok(None);
        }
        Ok(state.analyses.get(repo_id).cloned())
    }

    async fn upsert_subsystem_description(
        &self,
        analysis_id: &str,
        description: &SubsystemDescription,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(analysis) = state.analysis_by_id(analysis_id) else {
            return Ok(false);
        };
        match analysis
            .subsystem_descriptions
            .iter_mut()
            .find(|d| d.name == description.name)
        {
            Some(existing) => *existing = description.clone(),
            None => analysis.subsystem_descriptions.push(description.clone()),
        }
        Ok(true)
    }

    async fn upsert_file_explanation(
        &self,
        analysis_id: &str,
        file_key: &str,
        explanation: &FileExplanation,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(analysis) = state.analysis_by_id(analysis_id) else {
            return Ok(false);
        };
        analysis
            .file_explanations
            .insert(file_key.to_string(), explanation.clone());
        Ok(true)
    }

    async fn get_cached(&self, key: &str) -> Result<Option<CachedDescription>> {
        let state = self.state.lock().unwrap();
        Ok(state.cache.get(key).cloned())
    }

    async fn put_cached(&self, entry: &CachedDescription) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.cache.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn get_or_create_session(
        &self,
        repo_id: &str,
        client: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatSession> {
        let mut state = self.state.lock().unwrap();
        let slot = (repo_id.to_string(), client.to_string());
        if let Some(id) = state.current_sessions.get(&slot) {
            if let Some(session) = state.sessions.get(id) {
                return Ok(session.clone());
            }
        }

        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            repo_id: repo_id.to_string(),
            client: client.to_string(),
            created_at: now,
            last_updated: now,
        };
        state.current_sessions.insert(slot, session.id.clone());
        state.sessions.insert(session.id.clone(), session.clone());
        state.messages.insert(session.id.clone(), Vec::new());
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let state = self.state.lock().unwrap();
        Ok(state.sessions.get(session_id).cloned())
    }

    async fn append_message(&self, session_id: &str, message: &ChatMessage) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(session) = state.sessions.get_mut(session_id) else {
            bail!("chat session not found: {}", session_id);
        };
        if message.timestamp > session.last_updated {
            session.last_updated = message.timestamp;
        }
        state
            .messages
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let state = self.state.lock().unwrap();
        Ok(state.messages.get(session_id).cloned().unwrap_or_default())
    }
}
