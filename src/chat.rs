//! Chat sessions and grounded question answering.
//!
//! Each `(repository, client)` pair has one current [`ChatSession`] whose
//! messages are append-only. [`ChatService::ask`] answers a question from
//! the completed analysis (framework, subsystems, stored descriptions and
//! files whose paths mention the question's terms) plus the most recent
//! `chat.history_window` messages. History is truncated when read, never
//! when stored.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::describe::Origin;
use crate::generation::TextGenerator;
use crate::models::{AnalysisResult, ChatMessage, ChatRole, ChatSession, Repository};
use crate::store::Store;

/// Client context used when a caller does not name one.
pub const DEFAULT_CLIENT: &str = "default";

/// Assistant text stored when the generator could not answer.
pub const FALLBACK_ANSWER: &str =
    "I could not generate an answer right now. The analysis is still available; please try again later.";

const MAX_MATCHED_FILES: usize = 15;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub session_id: String,
    pub question: ChatMessage,
    pub answer: ChatMessage,
    pub origin: Origin,
}

pub struct ChatService {
    store: Arc<dyn Store>,
    generator: Arc<dyn TextGenerator>,
    history_window: usize,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>, generator: Arc<dyn TextGenerator>, history_window: usize) -> Self {
        Self {
            store,
            generator,
            history_window: history_window.max(1),
        }
    }

    pub async fn get_or_create_session(&self, repo_id: &str, client: &str) -> Result<ChatSession> {
        self.store
            .get_or_create_session(repo_id, client, Utc::now())
            .await
    }

    pub async fn append_message(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
    ) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        self.store.append_message(session_id, &message).await?;
        Ok(message)
    }

    /// Every message of the session, oldest first.
    pub async fn load_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.store.load_messages(session_id).await
    }

    /// The last `history_window` messages, oldest first.
    pub async fn recent_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let messages = self.store.load_messages(session_id).await?;
        Ok(tail(messages, self.history_window))
    }

    /// Appends `question` and an answer to the current session of
    /// `(repo, client)`. A generation failure stores [`FALLBACK_ANSWER`]
    /// instead of failing.
    pub async fn ask(
        &self,
        repo: &Repository,
        analysis: &AnalysisResult,
        client: &str,
        question: &str,
    ) -> Result<ChatReply> {
        let question = question.trim();
        if question.is_empty() {
            bail!("question must not be empty");
        }

        let session = self.get_or_create_session(&repo.id, client).await?;
        let history = self.recent_messages(&session.id).await?;
        let prompt = answer_prompt(repo, analysis, &history, question);

        let asked = self
            .append_message(&session.id, ChatRole::User, question)
            .await?;

        let (text, origin) = match self.generator.generate(&prompt).await {
            Ok(text) => (text, Origin::Generated),
            Err(err) => {
                tracing::warn!(repo = %repo.id, session = %session.id, error = %err, "chat generation failed");
                (FALLBACK_ANSWER.to_string(), Origin::Fallback)
            }
        };
        let answer = self
            .append_message(&session.id, ChatRole::Assistant, &text)
            .await?;

        Ok(ChatReply {
            session_id: session.id,
            question: asked,
            answer,
            origin,
        })
    }
}

fn tail(mut messages: Vec<ChatMessage>, window: usize) -> Vec<ChatMessage> {
    if messages.len() > window {
        messages.drain(..messages.len() - window);
    }
    messages
}

fn question_terms(question: &str) -> Vec<String> {
    question
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .filter(|t| t.chars().count() >= 3)
        .map(|t| t.to_lowercase())
        .collect()
}

fn matching_files<'a>(analysis: &'a AnalysisResult, question: &str) -> Vec<&'a str> {
    let terms = question_terms(question);
    if terms.is_empty() {
        return Vec::new();
    }
    analysis
        .file_tree
        .iter()
        .map(|f| f.path.as_str())
        .filter(|path| {
            let lower = path.to_lowercase();
            terms.iter().any(|t| lower.contains(t.as_str()))
        })
        .take(MAX_MATCHED_FILES)
        .collect()
}

fn answer_prompt(
    repo: &Repository,
    analysis: &AnalysisResult,
    history: &[ChatMessage],
    question: &str,
) -> String {
    let mut prompt = format!(
        "You answer questions about the {} repository, a {} project with {} files.\n\
         Answer only from the context below; say so when it is not enough.\n\nSubsystems:\n",
        repo.full_name,
        analysis.framework.display_name(),
        analysis.file_tree.len(),
    );
    for subsystem in &analysis.subsystems {
        let purpose = analysis
            .description_for(&subsystem.name)
            .map(|d| d.purpose.as_str())
            .unwrap_or(subsystem.description.as_str());
        prompt.push_str(&format!(
            "- {} ({} files): {}\n",
            subsystem.name,
            subsystem.files.len(),
            purpose
        ));
    }

    let files = matching_files(analysis, question);
    if !files.is_empty() {
        prompt.push_str("\nFiles that may be relevant:\n");
        for path in files {
            prompt.push_str(&format!("- {}\n", path));
            if let Some(explanation) = analysis.explanation_for(path) {
                prompt.push_str(&format!("  {}\n", explanation.explanation));
            }
        }
    }

    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        for message in history {
            prompt.push_str(&format!("{}: {}\n", message.role.as_str(), message.content));
        }
    }

    prompt.push_str(&format!("\nQuestion: {}\n", question));
    prompt
}
