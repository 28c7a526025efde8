//! Description synthesis.
//!
//! [`DescriptionSynthesizer`] produces the optional natural-language layer
//! of an analysis: a [`SubsystemDescription`] per subsystem and a
//! [`FileExplanation`] per file, both generated lazily on first request.
//!
//! # Caching
//!
//! Every generated value is written to the TTL cache under a
//! content-derived key (SHA-256 over the repository id, the subsystem name
//! and its file list, or the file path and size), and upserted into the
//! owning analysis snapshot. A request that finds a non-expired cache
//! entry returns it without calling the generator. Concurrent requests for
//! the same key are serialized so they share one generation call.
//!
//! # Failure Policy
//!
//! Enrichment never fails the caller because the generator failed. On a
//! generation error the previous value is returned if one exists (an
//! expired cache entry, or the description already stored in the
//! analysis), otherwise a placeholder built from partition-time data.
//! Only store failures are returned as errors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;

use crate::config::{CacheConfig, GenerationConfig};
use crate::events::{EventBus, PipelineEvent};
use crate::generation::TextGenerator;
use crate::github::HostingApi;
use crate::inventory::language_for_extension;
use crate::models::{
    file_key, AnalysisResult, CachedDescription, FileExplanation, FileRecord, Repository,
    Subsystem, SubsystemDescription,
};
use crate::repo_ref::RepoRef;
use crate::store::Store;

/// Text returned when no explanation could be produced for a file.
pub const NO_EXPLANATION: &str = "No explanation available for this file yet.";

/// Where an enrichment value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// A non-expired cache entry; no generation call was made.
    Cached,
    /// Freshly generated and persisted.
    Generated,
    /// Generation failed; a previously generated value was reused.
    Stale,
    /// Generation failed and nothing was stored; placeholder text.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enrichment<T> {
    pub value: T,
    pub origin: Origin,
}

impl<T> Enrichment<T> {
    fn new(value: T, origin: Origin) -> Self {
        Self { value, origin }
    }
}

/// Lenient shape of the generator's JSON answer.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct DescriptionDraft {
    purpose: String,
    entry_points: Vec<String>,
    dependencies: Vec<String>,
    key_files: Vec<String>,
    technologies: Vec<String>,
}

pub struct DescriptionSynthesizer {
    store: Arc<dyn Store>,
    generator: Arc<dyn TextGenerator>,
    hosting: Arc<dyn HostingApi>,
    events: EventBus,
    ttl: Duration,
    concurrency: usize,
    max_prompt_files: usize,
    max_file_chars: usize,
    in_flight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DescriptionSynthesizer {
    pub fn new(
        store: Arc<dyn Store>,
        generator: Arc<dyn TextGenerator>,
        hosting: Arc<dyn HostingApi>,
        events: EventBus,
        generation: &GenerationConfig,
        cache: &CacheConfig,
    ) -> Self {
        Self {
            store,
            generator,
            hosting,
            events,
            ttl: Duration::seconds(cache.ttl_secs),
            concurrency: generation.concurrency.max(1),
            max_prompt_files: generation.max_prompt_files,
            max_file_chars: generation.max_file_chars,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.in_flight.lock().unwrap();
        map.entry(key.to_string()).or_default().clone()
    }

    fn release_key(&self, key: &str) {
        let mut map = self.in_flight.lock().unwrap();
        if map.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(key);
        }
    }

    fn cache_entry(&self, key: String, content: String) -> CachedDescription {
        let now = Utc::now();
        CachedDescription {
            key,
            content,
            generated_at: now,
            expires_at: now + self.ttl,
        }
    }

    /// Description of `subsystem`, generating it unless a non-expired
    /// cache entry exists. `refresh` forces a generation attempt.
    pub async fn describe_subsystem(
        &self,
        repo: &Repository,
        analysis: &AnalysisResult,
        subsystem: &Subsystem,
        refresh: bool,
    ) -> Result<Enrichment<SubsystemDescription>> {
        let key = subsystem_cache_key(&repo.id, subsystem);
        let lock = self.key_lock(&key);
        let outcome = {
            let _guard = lock.lock().await;
            self.describe_locked(repo, analysis, subsystem, &key, refresh)
                .await
        };
        drop(lock);
        self.release_key(&key);
        outcome
    }

    async fn describe_locked(
        &self,
        repo: &Repository,
        analysis: &AnalysisResult,
        subsystem: &Subsystem,
        key: &str,
        refresh: bool,
    ) -> Result<Enrichment<SubsystemDescription>> {
        let cached = self.store.get_cached(key).await?;
        let now = Utc::now();

        if !refresh {
            if let Some(entry) = cached.as_ref().filter(|e| !e.is_expired(now)) {
                if let Ok(description) = serde_json::from_str::<SubsystemDescription>(&entry.content)
                {
                    if analysis.description_for(&subsystem.name) != Some(&description) {
                        self.store
                            .upsert_subsystem_description(&analysis.id, &description)
                            .await?;
                    }
                    return Ok(Enrichment::new(description, Origin::Cached));
                }
                tracing::warn!(key, "discarding unreadable cache entry");
            }
        }

        let prompt = subsystem_prompt(repo, analysis, subsystem, self.max_prompt_files);
        match self.generator.generate(&prompt).await {
            Ok(text) => {
                let description = parse_description(&text, subsystem);
                let content = serde_json::to_string(&description)?;
                self.store
                    .put_cached(&self.cache_entry(key.to_string(), content))
                    .await?;
                let stored = self
                    .store
                    .upsert_subsystem_description(&analysis.id, &description)
                    .await?;
                if !stored {
                    tracing::debug!(repo = %repo.id, subsystem = %subsystem.name, "analysis superseded, description cached only");
                }
                tracing::info!(
                    repo = %repo.id,
                    subsystem = %subsystem.name,
                    model = self.generator.model_name(),
                    "subsystem description generated"
                );
                self.events.publish(PipelineEvent::DescriptionReady {
                    repo_id: repo.id.clone(),
                    subsystem: subsystem.name.clone(),
                });
                Ok(Enrichment::new(description, Origin::Generated))
            }
            Err(err) => {
                tracing::warn!(
                    repo = %repo.id,
                    subsystem = %subsystem.name,
                    error = %err,
                    "description generation failed, falling back"
                );
                let previous = cached
                    .and_then(|e| serde_json::from_str::<SubsystemDescription>(&e.content).ok())
                    .or_else(|| analysis.description_for(&subsystem.name).cloned());
                Ok(match previous {
                    Some(description) => Enrichment::new(description, Origin::Stale),
                    None => Enrichment::new(fallback_description(subsystem), Origin::Fallback),
                })
            }
        }
    }

    /// Explanation of the file at `file.path`. The file's text is fetched
    /// from the hosting API to ground the prompt; if that fails the prompt
    /// uses metadata only.
    pub async fn explain_file(
        &self,
        repo: &Repository,
        analysis: &AnalysisResult,
        file: &FileRecord,
        refresh: bool,
    ) -> Result<Enrichment<FileExplanation>> {
        let key = file_cache_key(&repo.id, file);
        let lock = self.key_lock(&key);
        let outcome = {
            let _guard = lock.lock().await;
            self.explain_locked(repo, analysis, file, &key, refresh).await
        };
        drop(lock);
        self.release_key(&key);
        outcome
    }

    async fn explain_locked(
        &self,
        repo: &Repository,
        analysis: &AnalysisResult,
        file: &FileRecord,
        key: &str,
        refresh: bool,
    ) -> Result<Enrichment<FileExplanation>> {
        let cached = self.store.get_cached(key).await?;
        let now = Utc::now();
        let path_key = file_key(&file.path);

        if !refresh {
            if let Some(entry) = cached.as_ref().filter(|e| !e.is_expired(now)) {
                let explanation = FileExplanation {
                    explanation: entry.content.clone(),
                    generated_at: entry.generated_at,
                };
                if analysis.file_explanations.get(&path_key) != Some(&explanation) {
                    self.store
                        .upsert_file_explanation(&analysis.id, &path_key, &explanation)
                        .await?;
                }
                return Ok(Enrichment::new(explanation, Origin::Cached));
            }
        }

        let repo_ref = RepoRef::new(repo.owner.clone(), repo.name.clone());
        let branch = repo.default_branch.as_deref().unwrap_or("HEAD");
        let content = match self.hosting.file_content(&repo_ref, branch, &file.path).await {
            Ok(text) => Some(truncate_chars(&text, self.max_file_chars)),
            Err(err) => {
                tracing::warn!(repo = %repo.id, path = %file.path, error = %err, "could not fetch file content");
                None
            }
        };

        let prompt = file_prompt(repo, analysis, file, content.as_deref());
        match self.generator.generate(&prompt).await {
            Ok(text) => {
                let entry = self.cache_entry(key.to_string(), text.trim().to_string());
                self.store.put_cached(&entry).await?;
                let explanation = FileExplanation {
                    explanation: entry.content,
                    generated_at: entry.generated_at,
                };
                let stored = self
                    .store
                    .upsert_file_explanation(&analysis.id, &path_key, &explanation)
                    .await?;
                if !stored {
                    tracing::debug!(repo = %repo.id, path = %file.path, "analysis superseded, explanation cached only");
                }
                self.events.publish(PipelineEvent::ExplanationReady {
                    repo_id: repo.id.clone(),
                    path: file.path.clone(),
                });
                Ok(Enrichment::new(explanation, Origin::Generated))
            }
            Err(err) => {
                tracing::warn!(
                    repo = %repo.id,
                    path = %file.path,
                    error = %err,
                    "file explanation failed, falling back"
                );
                let previous = cached
                    .map(|e| FileExplanation {
                        explanation: e.content,
                        generated_at: e.generated_at,
                    })
                    .or_else(|| analysis.file_explanations.get(&path_key).cloned());
                Ok(match previous {
                    Some(explanation) => Enrichment::new(explanation, Origin::Stale),
                    None => Enrichment::new(
                        FileExplanation {
                            explanation: NO_EXPLANATION.to_string(),
                            generated_at: now,
                        },
                        Origin::Fallback,
                    ),
                })
            }
        }
    }

    /// Describes every subsystem that has no stored description yet, with
    /// at most `generation.concurrency` generation calls in flight. Results
    /// come back in subsystem order. A failing subsystem does not cancel
    /// the others; the first error is returned once all have finished.
    pub async fn describe_all(
        self: &Arc<Self>,
        repo: &Repository,
        analysis: &AnalysisResult,
    ) -> Result<Vec<(String, Enrichment<SubsystemDescription>)>> {
        let repo = Arc::new(repo.clone());
        let analysis = Arc::new(analysis.clone());
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (idx, subsystem) in analysis.subsystems.iter().enumerate() {
            if analysis.description_for(&subsystem.name).is_some() {
                continue;
            }
            let this = Arc::clone(self);
            let repo = Arc::clone(&repo);
            let analysis = Arc::clone(&analysis);
            let permits = Arc::clone(&permits);
            let subsystem = subsystem.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await?;
                let described = this
                    .describe_subsystem(&repo, &analysis, &subsystem, false)
                    .await?;
                anyhow::Ok((idx, subsystem.name, described))
            });
        }

        // Every task runs to completion; the first failure is returned after.
        let mut results = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(anyhow::Error::from).and_then(|r| r) {
                Ok(described) => results.push(described),
                Err(err) => {
                    tracing::warn!(repo = %repo.id, error = %err, "subsystem description failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        results.sort_by_key(|(idx, _, _)| *idx);
        Ok(results
            .into_iter()
            .map(|(_, name, described)| (name, described))
            .collect())
    }
}

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Cache key for a subsystem: changes whenever its file set changes.
pub fn subsystem_cache_key(repo_id: &str, subsystem: &Subsystem) -> String {
    let mut files: Vec<&str> = subsystem.files.iter().map(String::as_str).collect();
    files.sort_unstable();
    let mut parts = vec!["subsystem", repo_id, subsystem.name.as_str()];
    parts.extend(files);
    format!("subsystem:{}", hash_parts(&parts))
}

/// Cache key for a file: its path and size.
pub fn file_cache_key(repo_id: &str, file: &FileRecord) -> String {
    let size = file.size.to_string();
    format!(
        "file:{}",
        hash_parts(&["file", repo_id, file.path.as_str(), size.as_str()])
    )
}

/// Placeholder used when nothing better is available.
pub fn fallback_description(subsystem: &Subsystem) -> SubsystemDescription {
    SubsystemDescription {
        name: subsystem.name.clone(),
        purpose: subsystem.description.clone(),
        entry_points: Vec::new(),
        dependencies: Vec::new(),
        key_files: subsystem.files.iter().take(5).cloned().collect(),
        technologies: Vec::new(),
    }
}

fn subsystem_prompt(
    repo: &Repository,
    analysis: &AnalysisResult,
    subsystem: &Subsystem,
    max_files: usize,
) -> String {
    let mut prompt = format!(
        "You are documenting the {} repository, a {} project.\n\
         Describe the \"{}\" subsystem ({}).\n\n\
         Files ({} total",
        repo.full_name,
        analysis.framework.display_name(),
        subsystem.name,
        subsystem.description,
        subsystem.files.len(),
    );
    if subsystem.files.len() > max_files {
        prompt.push_str(&format!(", first {} shown", max_files));
    }
    prompt.push_str("):\n");
    for path in subsystem.files.iter().take(max_files) {
        let size = analysis.file(path).map(|f| f.size).unwrap_or(0);
        prompt.push_str(&format!("- {} ({} bytes)\n", path, size));
    }
    prompt.push_str(
        "\nRespond with only a JSON object with these fields:\n\
         \"purpose\": one or two sentences on what this subsystem does,\n\
         \"entryPoints\": files from the list above where usage or execution starts,\n\
         \"dependencies\": libraries or services it depends on,\n\
         \"keyFiles\": the most important files from the list above,\n\
         \"technologies\": languages and frameworks it uses.\n",
    );
    prompt
}

fn file_prompt(
    repo: &Repository,
    analysis: &AnalysisResult,
    file: &FileRecord,
    content: Option<&str>,
) -> String {
    let language = file
        .extension
        .as_deref()
        .and_then(language_for_extension)
        .unwrap_or("unknown language");
    let subsystem = analysis
        .subsystems
        .iter()
        .find(|s| s.files.iter().any(|f| f == &file.path))
        .map(|s| s.name.as_str())
        .unwrap_or("no subsystem");

    let mut prompt = format!(
        "You are documenting the {} repository, a {} project.\n\
         Explain the role of the file `{}` ({}, {} bytes, part of the {} subsystem) \
         in a short paragraph for a developer new to the codebase.\n",
        repo.full_name,
        analysis.framework.display_name(),
        file.path,
        language,
        file.size,
        subsystem,
    );
    match content {
        Some(text) => {
            prompt.push_str("\nFile content:\n```\n");
            prompt.push_str(text);
            prompt.push_str("\n```\n");
        }
        None => prompt.push_str("\nThe file content is unavailable; infer from its path.\n"),
    }
    prompt
}

/// Parses the generator's answer. Accepts a bare JSON object or one
/// embedded in prose or a code fence; anything else becomes the purpose.
/// File lists are restricted to the subsystem's own files.
fn parse_description(text: &str, subsystem: &Subsystem) -> SubsystemDescription {
    let draft = text
        .find('{')
        .zip(text.rfind('}'))
        .filter(|(start, end)| start < end)
        .and_then(|(start, end)| serde_json::from_str::<DescriptionDraft>(&text[start..=end]).ok())
        .unwrap_or_else(|| DescriptionDraft {
            purpose: text.trim().to_string(),
            ..DescriptionDraft::default()
        });

    let own = |paths: Vec<String>| -> Vec<String> {
        paths
            .into_iter()
            .filter(|p| subsystem.files.contains(p))
            .collect()
    };

    let purpose = if draft.purpose.trim().is_empty() {
        subsystem.description.clone()
    } else {
        draft.purpose.trim().to_string()
    };

    SubsystemDescription {
        name: subsystem.name.clone(),
        purpose,
        entry_points: own(draft.entry_points),
        dependencies: draft.dependencies,
        key_files: own(draft.key_files),
        technologies: draft.technologies,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> Subsystem {
        Subsystem {
            name: "Routes".into(),
            files: vec!["src/routes/+page.svelte".into(), "src/routes/+layout.ts".into()],
            description: "SvelteKit routes".into(),
        }
    }

    #[test]
    fn parses_fenced_json_and_filters_foreign_files() {
        let text = "Here you go:\n```json\n{\"purpose\": \"Serves pages.\", \
                    \"entryPoints\": [\"src/routes/+page.svelte\", \"src/main.ts\"], \
                    \"keyFiles\": [\"src/routes/+layout.ts\"], \
                    \"technologies\": [\"Svelte\"]}\n```";
        let d = parse_description(text, &routes());
        assert_eq!(d.name, "Routes");
        assert_eq!(d.purpose, "Serves pages.");
        assert_eq!(d.entry_points, vec!["src/routes/+page.svelte"]);
        assert_eq!(d.key_files, vec!["src/routes/+layout.ts"]);
        assert_eq!(d.technologies, vec!["Svelte"]);
        assert!(d.dependencies.is_empty());
    }

    #[test]
    fn prose_answer_becomes_purpose() {
        let d = parse_description("It renders every page.", &routes());
        assert_eq!(d.purpose, "It renders every page.");
        assert!(d.entry_points.is_empty());
    }

    #[test]
    fn empty_purpose_uses_partition_description() {
        let d = parse_description("{\"purpose\": \"\"}", &routes());
        assert_eq!(d.purpose, "SvelteKit routes");
    }

    #[test]
    fn subsystem_key_ignores_file_order() {
        let mut reordered = routes();
        reordered.files.reverse();
        assert_eq!(
            subsystem_cache_key("a/b", &routes()),
            subsystem_cache_key("a/b", &reordered)
        );
        assert_ne!(
            subsystem_cache_key("a/b", &routes()),
            subsystem_cache_key("a/c", &routes())
        );
    }

    #[test]
    fn file_key_tracks_size() {
        let a = FileRecord::new("src/lib.rs", 10);
        let b = FileRecord::new("src/lib.rs", 11);
        assert_ne!(file_cache_key("a/b", &a), file_cache_key("a/b", &b));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé\n[truncated]");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[test]
    fn fallback_uses_placeholder_text() {
        let d = fallback_description(&routes());
        assert_eq!(d.purpose, "SvelteKit routes");
        assert_eq!(d.key_files.len(), 2);
    }
}
